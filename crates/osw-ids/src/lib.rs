//! Canonical OSW identifiers (versioned encoding).
//!
//! Every entity is keyed by a 128-bit UUID. Its textual *OSW-ID* is
//!
//! - encoding: `"OSW"` + the 32 lowercase hex digits of the UUID
//!   (hyphens removed)
//!
//! and its canonical page title is `<Namespace>:<Prefix><id-body>`, e.g.
//! `Item:OSW2ea5b605c91f4e5a95593dff79fdd4a5`. Property pages may carry a
//! human-readable local name instead of an OSW-ID body.
//!
//! All operations in this crate are pure and thread-safe.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

/// Prefix used in serialized OSW-IDs.
pub const OSW_ID_PREFIX: &str = "OSW";

#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

// ============================================================================
// Namespaces
// ============================================================================

/// Wiki namespaces the toolkit reads and writes.
///
/// `symbolic_code` is the constant used by the page-package bundle format
/// (MediaWiki Page Exchange), `canonical_name` the on-wire title prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    Main,
    Item,
    Category,
    Property,
    File,
    JsonSchema,
    Module,
    MediaWiki,
    Other(String),
}

impl Namespace {
    pub fn canonical_name(&self) -> &str {
        match self {
            Namespace::Main => "",
            Namespace::Item => "Item",
            Namespace::Category => "Category",
            Namespace::Property => "Property",
            Namespace::File => "File",
            Namespace::JsonSchema => "JsonSchema",
            Namespace::Module => "Module",
            Namespace::MediaWiki => "MediaWiki",
            Namespace::Other(name) => name,
        }
    }

    /// Symbolic constant used by the page-package format.
    pub fn symbolic_code(&self) -> &str {
        match self {
            Namespace::Main => "NS_MAIN",
            Namespace::Item => "NS_ITEM",
            Namespace::Category => "NS_CATEGORY",
            Namespace::Property => "NS_PROPERTY",
            Namespace::File => "NS_FILE",
            Namespace::JsonSchema => "NS_JSONSCHEMA",
            Namespace::Module => "NS_MODULE",
            Namespace::MediaWiki => "NS_MEDIAWIKI",
            Namespace::Other(_) => "NS_MAIN",
        }
    }

    pub fn from_name(name: &str) -> Namespace {
        match name {
            "" => Namespace::Main,
            "Item" => Namespace::Item,
            "Category" => Namespace::Category,
            "Property" => Namespace::Property,
            "File" => Namespace::File,
            "JsonSchema" => Namespace::JsonSchema,
            "Module" => Namespace::Module,
            "MediaWiki" => Namespace::MediaWiki,
            other => Namespace::Other(other.to_string()),
        }
    }

    pub fn from_symbolic_code(code: &str) -> Namespace {
        match code {
            "NS_MAIN" => Namespace::Main,
            "NS_ITEM" => Namespace::Item,
            "NS_CATEGORY" => Namespace::Category,
            "NS_PROPERTY" => Namespace::Property,
            "NS_FILE" => Namespace::File,
            "NS_JSONSCHEMA" => Namespace::JsonSchema,
            "NS_MODULE" => Namespace::Module,
            "NS_MEDIAWIKI" => Namespace::MediaWiki,
            other => Namespace::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

// ============================================================================
// OSW-ID codec
// ============================================================================

/// `uuid -> "OSW" + hex32`.
pub fn uuid_to_osw_id(uuid: &Uuid) -> String {
    format!("{OSW_ID_PREFIX}{}", uuid.simple())
}

/// `"OSW" + hex32 -> uuid`. Anything else is `IdError::InvalidIdentifier`.
pub fn osw_id_to_uuid(osw_id: &str) -> Result<Uuid, IdError> {
    let body = osw_id
        .strip_prefix(OSW_ID_PREFIX)
        .ok_or_else(|| IdError::InvalidIdentifier(osw_id.to_string()))?;
    if body.len() != 32 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(IdError::InvalidIdentifier(osw_id.to_string()));
    }
    Uuid::parse_str(body).map_err(|_| IdError::InvalidIdentifier(osw_id.to_string()))
}

// ============================================================================
// Full page titles
// ============================================================================

/// Parsed form of a canonical full page title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleParts {
    pub namespace: Namespace,
    /// Uppercase id prefix, typically `"OSW"`. Empty for free-form titles.
    pub prefix: String,
    /// OSW-ID body (32 hex chars) or a human-readable local name.
    pub id_body: String,
}

impl TitleParts {
    pub fn full_title(&self) -> String {
        format!(
            "{}:{}{}",
            self.namespace.canonical_name(),
            self.prefix,
            self.id_body
        )
    }
}

fn canonical_title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z][A-Za-z0-9_ ]*):([A-Z]+)([a-z\d\-]+)$").expect("static regex")
    })
}

/// Build the canonical page title for an entity UUID.
pub fn uuid_to_full_page_title(uuid: &Uuid, namespace: &Namespace, prefix: &str) -> String {
    format!(
        "{}:{}{}",
        namespace.canonical_name(),
        prefix,
        uuid.simple()
    )
}

/// Parse a full page title.
///
/// Canonical entity titles match `<Namespace>:<PREFIX><id-body>`; anything
/// else with a namespace separator parses as a free-form title with an
/// empty prefix (property pages use human-readable local names).
pub fn parse_full_page_title(title: &str) -> Result<TitleParts, IdError> {
    if let Some(caps) = canonical_title_re().captures(title) {
        return Ok(TitleParts {
            namespace: Namespace::from_name(&caps[1]),
            prefix: caps[2].to_string(),
            id_body: caps[3].to_string(),
        });
    }
    match title.split_once(':') {
        Some((ns, local)) if !ns.is_empty() && !local.is_empty() => Ok(TitleParts {
            namespace: Namespace::from_name(ns),
            prefix: String::new(),
            id_body: local.to_string(),
        }),
        _ => Err(IdError::InvalidIdentifier(title.to_string())),
    }
}

/// Extract the UUID from a canonical entity page title.
pub fn title_to_uuid(title: &str) -> Result<Uuid, IdError> {
    let parts = parse_full_page_title(title)?;
    osw_id_to_uuid(&format!("{}{}", parts.prefix, parts.id_body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn osw_id_round_trips() {
        let uuid = Uuid::new_v4();
        let osw_id = uuid_to_osw_id(&uuid);
        assert!(osw_id.starts_with(OSW_ID_PREFIX));
        assert_eq!(osw_id.len(), OSW_ID_PREFIX.len() + 32);
        assert_eq!(osw_id_to_uuid(&osw_id).unwrap(), uuid);
    }

    #[test]
    fn malformed_osw_ids_are_rejected() {
        assert!(osw_id_to_uuid("OSW1234").is_err());
        assert!(osw_id_to_uuid("2ea5b605c91f4e5a95593dff79fdd4a5").is_err());
        assert!(osw_id_to_uuid("OSWzzzzb605c91f4e5a95593dff79fdd4a5").is_err());
    }

    #[test]
    fn title_round_trips_through_parts() {
        let uuid = Uuid::new_v4();
        let title = uuid_to_full_page_title(&uuid, &Namespace::Item, "OSW");
        let parts = parse_full_page_title(&title).unwrap();
        assert_eq!(parts.namespace, Namespace::Item);
        assert_eq!(parts.prefix, "OSW");
        assert_eq!(parts.id_body, uuid.simple().to_string());
        assert_eq!(parts.full_title(), title);
        assert_eq!(title_to_uuid(&title).unwrap(), uuid);
    }

    #[test]
    fn free_form_property_titles_parse() {
        let parts = parse_full_page_title("Property:HasBoilingPoint").unwrap();
        assert_eq!(parts.namespace, Namespace::Property);
        assert_eq!(parts.prefix, "");
        assert_eq!(parts.id_body, "HasBoilingPoint");
    }

    #[test]
    fn namespace_symbolic_codes_round_trip() {
        for ns in [
            Namespace::Main,
            Namespace::Item,
            Namespace::Category,
            Namespace::Property,
            Namespace::File,
            Namespace::JsonSchema,
            Namespace::Module,
            Namespace::MediaWiki,
        ] {
            assert_eq!(Namespace::from_symbolic_code(ns.symbolic_code()), ns);
        }
    }
}
