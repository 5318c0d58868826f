//! JSON-Schema driven entity classes.
//!
//! Category pages on the wiki carry a JSON-Schema in their `jsonschema`
//! slot; entity pages carry a JSON instance in `jsondata`. This crate
//! owns the machinery between the two:
//!
//! - `entity` — the in-memory entity object with its open field set,
//! - `codec` — the schemaJson ↔ wikiJson transform for template slots,
//! - `introspect` — the small JSON-Schema queries everything relies on,
//! - `resolver` — recursive schema fetch, `$ref` rewriting, disk cache,
//! - `generator` — class descriptors derived from a schema set,
//! - `registry` — the process-wide class namespace, swapped atomically.
//!
//! Runtime class objects are deliberately *descriptors*, not generated
//! source: the registry snapshot is replaced in one step so consumers
//! never observe a partially populated class set, and multi-category
//! instances resolve to a composite of applicable classes instead of a
//! synthesized subclass.

pub mod codec;
pub mod entity;
pub mod generator;
pub mod introspect;
pub mod registry;
pub mod resolver;

pub use entity::{cast, Entity, LangText};
pub use generator::{ClassGenerator, ExternalGenerator, SchemaClassGenerator};
pub use introspect::{PropertySpec, PropertyType};
pub use registry::{ClassRegistry, EntityClass, RegistrySnapshot, ResolvedClass};
pub use resolver::{FetchMode, FetchedSchema, SchemaResolver};

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("bad schema: {0}")]
    BadSchema(String),
    #[error("schemaJson has no osl_template")]
    MissingTemplate,
    #[error("extension count mismatch: header has {header}, footer has {footer}")]
    ExtensionMismatch { header: usize, footer: usize },
    #[error("no known class for types: {0}")]
    UnknownEntityType(String),
    #[error("code generator unavailable: {0}")]
    CodegenUnavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Id(#[from] osw_ids::IdError),
    #[error(transparent)]
    Wiki(#[from] osw_wiki::WikiError),
}
