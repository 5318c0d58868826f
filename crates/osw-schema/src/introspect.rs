//! Small JSON-Schema queries used across the crate.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Unknown,
}

impl PropertyType {
    fn from_schema_type(s: &str) -> PropertyType {
        match s {
            "string" => PropertyType::String,
            "integer" => PropertyType::Integer,
            "number" => PropertyType::Number,
            "boolean" => PropertyType::Boolean,
            "object" => PropertyType::Object,
            _ => PropertyType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySpec {
    pub ptype: PropertyType,
    pub array: bool,
}

/// Type information for one declared property, if the schema has any.
pub fn property_spec(schema: &Value, name: &str) -> Option<PropertySpec> {
    let prop = schema.get("properties")?.get(name)?;
    Some(spec_of(prop))
}

fn spec_of(prop: &Value) -> PropertySpec {
    let ty = prop.get("type").and_then(Value::as_str);
    match ty {
        Some("array") => {
            let items = prop.get("items");
            let ptype = items
                .and_then(|i| i.get("type"))
                .and_then(Value::as_str)
                .map(PropertyType::from_schema_type)
                .unwrap_or(PropertyType::Unknown);
            PropertySpec { ptype, array: true }
        }
        Some(other) => PropertySpec {
            ptype: PropertyType::from_schema_type(other),
            array: false,
        },
        None => PropertySpec {
            ptype: PropertyType::Unknown,
            array: false,
        },
    }
}

/// All declared properties with their specs.
pub fn property_specs(schema: &Value) -> BTreeMap<String, PropertySpec> {
    let mut out = BTreeMap::new();
    if let Some(Value::Object(props)) = schema.get("properties") {
        for (name, prop) in props {
            out.insert(name.clone(), spec_of(prop));
        }
    }
    out
}

fn wiki_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/wiki/([^?]+)\?action=raw&slot=jsonschema").expect("static regex")
    })
}

/// Extract the page title from a cross-schema `$ref` of the wiki form
/// `/wiki/<Title>?action=raw&slot=jsonschema`.
pub fn ref_title(reference: &str) -> Option<String> {
    wiki_ref_re()
        .captures(reference)
        .map(|c| c[1].replace("%3A", ":").replace('_', " "))
}

/// Parent category titles from `allOf` cross-references.
pub fn parent_titles(schema: &Value) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(Value::Array(all_of)) = schema.get("allOf") {
        for entry in all_of {
            if let Some(reference) = entry.get("$ref").and_then(Value::as_str) {
                if let Some(title) = ref_title(reference) {
                    out.push(title);
                }
            }
        }
    }
    out
}

/// Class name from the schema `title`, falling back to the trailing
/// title segment, pascal-cased.
pub fn class_name(schema: &Value, category_title: &str) -> String {
    if let Some(title) = schema.get("title").and_then(Value::as_str) {
        return title.replace([' ', '-'], "");
    }
    let local = category_title
        .rsplit([':', '/'])
        .next()
        .unwrap_or(category_title);
    pascal_case(local)
}

pub fn pascal_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper_next = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if upper_next {
                out.extend(c.to_uppercase());
                upper_next = false;
            } else {
                out.push(c);
            }
        } else {
            upper_next = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn specs_distinguish_arrays_and_scalars() {
        let schema = json!({
            "properties": {
                "count": {"type": "integer"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "open": {}
            }
        });
        assert_eq!(
            property_spec(&schema, "count"),
            Some(PropertySpec { ptype: PropertyType::Integer, array: false })
        );
        assert_eq!(
            property_spec(&schema, "tags"),
            Some(PropertySpec { ptype: PropertyType::String, array: true })
        );
        assert_eq!(
            property_spec(&schema, "open"),
            Some(PropertySpec { ptype: PropertyType::Unknown, array: false })
        );
        assert_eq!(property_spec(&schema, "absent"), None);
    }

    #[test]
    fn ref_title_parses_wiki_refs() {
        assert_eq!(
            ref_title("/wiki/Category:OSW44deaa5b806d41a2a88594f562b110e9?action=raw&slot=jsonschema"),
            Some("Category:OSW44deaa5b806d41a2a88594f562b110e9".to_string())
        );
        assert_eq!(ref_title("#/definitions/Label"), None);
    }

    #[test]
    fn parents_come_from_all_of() {
        let schema = json!({
            "allOf": [
                {"$ref": "/wiki/Category:Item?action=raw&slot=jsonschema"},
                {"properties": {}}
            ]
        });
        assert_eq!(parent_titles(&schema), vec!["Category:Item".to_string()]);
    }

    #[test]
    fn class_name_prefers_schema_title() {
        let schema = json!({"title": "Chemical Substance"});
        assert_eq!(class_name(&schema, "Category:OSWx"), "ChemicalSubstance");
        assert_eq!(class_name(&json!({}), "Category:some_subclass"), "SomeSubclass");
    }
}
