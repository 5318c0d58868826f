//! Entity persistence against the wiki.
//!
//! - `policy` — the per-field merge rules applied between the remote
//!   `jsondata` and the local entity on every store,
//! - `client` — the store/load engine with bounded parallel batches,
//! - `package` — the Page Exchange bundle format for filesystem
//!   round-trips and bulk installs.

pub mod client;
pub mod package;
pub mod policy;

pub use client::{BatchResult, LoadParam, OswClient, StoreParam};
pub use package::{
    install, read_package, write_package, PackageLayout, PackagePage, PagePackage,
    PagePackageBundle, PackageSlot, PageContent,
};
pub use policy::{apply, OverwritePolicy};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("malformed page package: {0}")]
    BadPackage(String),
    #[error(transparent)]
    Wiki(#[from] osw_wiki::WikiError),
    #[error(transparent)]
    Schema(#[from] osw_schema::SchemaError),
    #[error(transparent)]
    Id(#[from] osw_ids::IdError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
