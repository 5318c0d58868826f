//! Wiki I/O port and the multi-slot page handle.
//!
//! This crate sits at the wiki boundary:
//!
//! - `WikiPort` is the minimum async surface the rest of the toolkit
//!   depends on (read page with slots, write slot, move, delete,
//!   prefix/semantic search, tokens, file helpers).
//! - `MockWiki` is an always-available in-memory backend used by every
//!   test.
//! - `HttpWiki` (feature `http`) speaks the MediaWiki action API with
//!   the content-slot extension over `reqwest`.
//! - `WikiPage` is the in-memory view of one page: per-slot contents,
//!   content models, dirty flags, and template-level helpers.
//!
//! Batched reads may come back in any order; every record carries its
//! original title.

pub mod mock;
pub mod page;

#[cfg(feature = "http")]
pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub use mock::MockWiki;
pub use page::{PageCache, WikiPage};

#[derive(Debug, thiserror::Error)]
pub enum WikiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("edit conflict on {0}")]
    Conflict(String),
    #[error("authentication required")]
    AuthRequired,
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("bad csrf token")]
    BadToken,
    #[error("slot {slot} of {title} does not hold valid JSON: {detail}")]
    BadSlotJson {
        title: String,
        slot: String,
        detail: String,
    },
    #[error(transparent)]
    Wikitext(#[from] osw_wikitext::WikitextError),
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// Slot model
// ============================================================================

/// Well-known slot names.
pub mod slots {
    pub const MAIN: &str = "main";
    pub const JSONDATA: &str = "jsondata";
    pub const JSONSCHEMA: &str = "jsonschema";
    pub const HEADER: &str = "header";
    pub const FOOTER: &str = "footer";
    pub const HEADER_TEMPLATE: &str = "header_template";
    pub const FOOTER_TEMPLATE: &str = "footer_template";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentModel {
    #[serde(rename = "wikitext")]
    Wikitext,
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "Scribunto")]
    Scribunto,
}

impl ContentModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentModel::Wikitext => "wikitext",
            ContentModel::Json => "json",
            ContentModel::Scribunto => "Scribunto",
        }
    }

    pub fn from_str_lossy(s: &str) -> ContentModel {
        match s {
            "json" => ContentModel::Json,
            "Scribunto" | "scribunto" => ContentModel::Scribunto,
            _ => ContentModel::Wikitext,
        }
    }
}

/// Decoded slot payload: text for wikitext/Scribunto, a JSON value for
/// `json` slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SlotPayload {
    Text(String),
    Json(Value),
}

impl SlotPayload {
    /// Wire text for the edit-slot API.
    pub fn encode(&self) -> Result<String, WikiError> {
        match self {
            SlotPayload::Text(t) => Ok(t.clone()),
            SlotPayload::Json(v) => serde_json::to_string_pretty(v)
                .map_err(|e| WikiError::Transport(e.to_string())),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SlotPayload::Text(t) => Some(t),
            SlotPayload::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            SlotPayload::Json(v) => Some(v),
            SlotPayload::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub content_model: ContentModel,
    pub payload: SlotPayload,
}

/// One fetched revision of one page, all slots decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub title: String,
    pub exists: bool,
    pub revision: Option<u64>,
    pub slots: BTreeMap<String, SlotRecord>,
}

impl PageRecord {
    pub fn missing(title: &str) -> Self {
        Self {
            title: title.to_string(),
            exists: false,
            revision: None,
            slots: BTreeMap::new(),
        }
    }
}

/// Result of `file_info_and_usage`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileInfo {
    pub title: String,
    pub url: Option<String>,
    pub size: Option<u64>,
    /// Titles of pages using the file.
    pub usage: Vec<String>,
}

/// Bot credentials for the HTTP backend. The toolkit never reads these
/// from the process environment; the embedding application supplies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

// ============================================================================
// Port
// ============================================================================

/// The wiki surface the core depends on. Implementations may batch and
/// parallelize; callers must not assume ordering of batched results.
#[async_trait]
pub trait WikiPort: Send + Sync {
    /// Fetch one revision of one page with all slots in a single call.
    /// A missing page is a `PageRecord` with `exists == false`, not an
    /// error.
    async fn read_page(&self, title: &str) -> Result<PageRecord, WikiError>;

    /// Batched read. Default implementation loops over `read_page`.
    async fn read_pages(&self, titles: &[String]) -> Result<Vec<PageRecord>, WikiError> {
        let mut out = Vec::with_capacity(titles.len());
        for title in titles {
            out.push(self.read_page(title).await?);
        }
        Ok(out)
    }

    async fn edit_main(
        &self,
        title: &str,
        wikitext: &str,
        comment: &str,
        token: &str,
    ) -> Result<(), WikiError>;

    async fn edit_slot(
        &self,
        title: &str,
        slot: &str,
        text: &str,
        content_model: ContentModel,
        comment: &str,
        token: &str,
    ) -> Result<(), WikiError>;

    async fn move_page(
        &self,
        title: &str,
        new_title: &str,
        redirect: bool,
        comment: &str,
    ) -> Result<(), WikiError>;

    async fn delete_page(&self, title: &str, comment: &str) -> Result<(), WikiError>;

    async fn search_prefix(&self, text: &str, limit: usize) -> Result<Vec<String>, WikiError>;

    /// Semantic search, e.g. `[[SomeProperty::SomeValue]]`.
    async fn search_semantic(&self, query: &str, limit: usize) -> Result<Vec<String>, WikiError>;

    async fn get_token(&self, kind: &str) -> Result<String, WikiError>;

    async fn upload(&self, data: Vec<u8>, title: &str, comment: &str) -> Result<(), WikiError>;

    async fn file_info_and_usage(&self, title: &str) -> Result<FileInfo, WikiError>;

    /// Base URL used to render user-visible page links.
    fn site_url(&self) -> String;

    /// User-visible URL of a page.
    fn page_url(&self, title: &str) -> String {
        format!("{}/wiki/{}", self.site_url(), title.replace(' ', "_"))
    }
}
