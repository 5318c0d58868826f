//! schemaJson ↔ wikiJson.
//!
//! The wiki side of an entity's template slots is the triple
//! `[header_record, main_text, footer_record]` in the flat content
//! structure's JSON form. The schema side is a single object with the
//! reserved keys `osl_template`, `osl_wikitext` and `osl_footer` plus
//! the open domain fields. Extensions pair header records with footer
//! records by positional index.
//!
//! Both directions are driven by a (possibly partial) JSON-Schema;
//! where the schema is silent, single-element lists collapse to
//! scalars and empty lists are dropped.

use crate::introspect::{property_spec, PropertySpec, PropertyType};
use crate::SchemaError;
use serde_json::{json, Map, Value};

pub const KEY_TEMPLATE: &str = "osl_template";
pub const KEY_WIKITEXT: &str = "osl_wikitext";
pub const KEY_FOOTER: &str = "osl_footer";
pub const KEY_EXTENSIONS: &str = "extensions";

fn is_reserved(key: &str) -> bool {
    key == KEY_TEMPLATE || key == KEY_WIKITEXT || key == KEY_FOOTER
}

/// `(template_name, params)` of a one-key record.
fn record_parts(record: &Value) -> Result<(&str, &Map<String, Value>), SchemaError> {
    let Value::Object(map) = record else {
        return Err(SchemaError::BadSchema(format!(
            "expected template record, got {record}"
        )));
    };
    let (name, params) = map
        .iter()
        .next()
        .ok_or_else(|| SchemaError::BadSchema("empty template record".to_string()))?;
    let Value::Object(params) = params else {
        return Err(SchemaError::BadSchema(format!(
            "template {name} has non-object parameters"
        )));
    };
    Ok((name, params))
}

// ============================================================================
// schemaJson -> wikiJson
// ============================================================================

/// Build the `[header, main, footer]` triple from a schemaJson object.
/// Fails with `MissingTemplate` when `osl_template` is absent.
pub fn schema_json_to_wiki_json(schema_json: &Value) -> Result<Value, SchemaError> {
    let Value::Object(obj) = schema_json else {
        return Err(SchemaError::BadSchema(format!(
            "schemaJson must be an object, got {schema_json}"
        )));
    };
    let template_name = obj
        .get(KEY_TEMPLATE)
        .and_then(Value::as_str)
        .ok_or(SchemaError::MissingTemplate)?;

    let mut header_params = Map::new();
    for (key, value) in obj {
        if is_reserved(key) || key.starts_with('_') || key == KEY_EXTENSIONS {
            continue;
        }
        if let Some(converted) = field_to_wiki(value)? {
            header_params.insert(key.clone(), converted);
        }
    }

    // Extensions: header record list here, footer record list below,
    // paired by index.
    let mut footer_ext_records = Vec::new();
    if let Some(Value::Array(extensions)) = obj.get(KEY_EXTENSIONS) {
        let mut header_ext_records = Vec::new();
        for extension in extensions {
            let Value::Object(ext) = extension else {
                return Err(SchemaError::BadSchema(format!(
                    "extension must be an object, got {extension}"
                )));
            };
            header_ext_records.push(record_of(ext)?);
            let footer = match ext.get(KEY_FOOTER) {
                Some(Value::Object(footer)) => record_of(footer)?,
                _ => {
                    // A footer-less extension still needs a positional
                    // counterpart on the footer side.
                    json!({ format!("{}/Footer", ext.get(KEY_TEMPLATE)
                        .and_then(Value::as_str).unwrap_or("Extension")): {} })
                }
            };
            footer_ext_records.push(footer);
        }
        if !header_ext_records.is_empty() {
            header_params.insert(KEY_EXTENSIONS.to_string(), Value::Array(header_ext_records));
        }
    }

    let header = json!({ template_name: Value::Object(header_params) });
    let main = obj
        .get(KEY_WIKITEXT)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let footer = match obj.get(KEY_FOOTER) {
        Some(Value::Object(footer_obj)) => {
            let record = record_of(footer_obj)?;
            let (name, params) = record_parts(&record)?;
            let mut params = params.clone();
            if !footer_ext_records.is_empty() {
                params.insert(KEY_EXTENSIONS.to_string(), Value::Array(footer_ext_records));
            }
            Some(json!({ name: Value::Object(params) }))
        }
        _ if !footer_ext_records.is_empty() => Err(SchemaError::BadSchema(
            "extensions require an osl_footer".to_string(),
        ))?,
        _ => None,
    };

    let mut triple = vec![header, Value::String(main)];
    if let Some(footer) = footer {
        triple.push(footer);
    }
    Ok(Value::Array(triple))
}

/// One-key header record of a (sub-)schemaJson object, ignoring its own
/// footer and free text.
fn record_of(obj: &Map<String, Value>) -> Result<Value, SchemaError> {
    let template_name = obj
        .get(KEY_TEMPLATE)
        .and_then(Value::as_str)
        .ok_or(SchemaError::MissingTemplate)?;
    let mut params = Map::new();
    for (key, value) in obj {
        if is_reserved(key) || key.starts_with('_') || key == KEY_EXTENSIONS {
            continue;
        }
        if let Some(converted) = field_to_wiki(value)? {
            params.insert(key.clone(), converted);
        }
    }
    Ok(json!({ template_name: Value::Object(params) }))
}

/// Schema value to wiki parameter value. `None` drops the field.
fn field_to_wiki(value: &Value) -> Result<Option<Value>, SchemaError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(Value::String(s.clone()))),
        Value::Number(n) => Ok(Some(Value::String(n.to_string()))),
        Value::Bool(b) => Ok(Some(Value::String(b.to_string()))),
        Value::Array(items) => {
            if items.is_empty() {
                // Empty list fields are dropped.
                return Ok(None);
            }
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Object(obj) if obj.contains_key(KEY_TEMPLATE) => {
                        out.push(record_of(obj)?)
                    }
                    Value::Object(_) => out.push(Value::String(item.to_string())),
                    other => {
                        if let Some(v) = field_to_wiki(other)? {
                            out.push(v);
                        }
                    }
                }
            }
            Ok(Some(Value::Array(out)))
        }
        Value::Object(obj) if obj.contains_key(KEY_TEMPLATE) => {
            Ok(Some(Value::Array(vec![record_of(obj)?])))
        }
        Value::Object(_) => Ok(Some(Value::String(value.to_string()))),
    }
}

// ============================================================================
// wikiJson -> schemaJson
// ============================================================================

/// Rebuild a schemaJson object from the `[header, main, footer]`
/// triple, driven by the schema's property types.
pub fn wiki_json_to_schema_json(schema: &Value, wiki_json: &Value) -> Result<Value, SchemaError> {
    let Value::Array(elements) = wiki_json else {
        return Err(SchemaError::BadSchema(format!(
            "wikiJson must be an array, got {wiki_json}"
        )));
    };

    let mut records = elements.iter().filter(|e| e.is_object());
    let header = records
        .next()
        .ok_or_else(|| SchemaError::BadSchema("wikiJson has no header record".to_string()))?;
    let footer = records.next();
    let main = elements
        .iter()
        .find_map(Value::as_str)
        .unwrap_or("")
        .to_string();

    let (header_name, header_params) = record_parts(header)?;

    let mut out = Map::new();
    out.insert(KEY_TEMPLATE.to_string(), Value::String(header_name.to_string()));
    if !main.is_empty() {
        out.insert(KEY_WIKITEXT.to_string(), Value::String(main));
    }

    for (key, value) in header_params {
        if key.starts_with('_') || key == KEY_EXTENSIONS {
            continue;
        }
        let spec = property_spec(schema, key);
        let item_schema = schema
            .pointer(&format!("/properties/{key}/items"))
            .cloned()
            .unwrap_or(json!({}));
        out.insert(key.clone(), param_to_schema(value, spec, &item_schema)?);
    }

    // Pair header extensions with footer extensions by index.
    let header_exts = header_params
        .get(KEY_EXTENSIONS)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let footer_exts = footer
        .and_then(|f| record_parts(f).ok())
        .and_then(|(_, params)| params.get(KEY_EXTENSIONS))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if !header_exts.is_empty() || !footer_exts.is_empty() {
        if header_exts.len() != footer_exts.len() {
            return Err(SchemaError::ExtensionMismatch {
                header: header_exts.len(),
                footer: footer_exts.len(),
            });
        }
        let ext_schema = schema
            .pointer(&format!("/properties/{KEY_EXTENSIONS}/items"))
            .cloned()
            .unwrap_or(json!({}));
        let mut extensions = Vec::with_capacity(header_exts.len());
        for (header_ext, footer_ext) in header_exts.iter().zip(footer_exts.iter()) {
            let mut ext =
                wiki_json_to_schema_json(&ext_schema, &Value::Array(vec![header_ext.clone()]))?;
            let footer_obj =
                wiki_json_to_schema_json(&json!({}), &Value::Array(vec![footer_ext.clone()]))?;
            if let Value::Object(map) = &mut ext {
                map.insert(KEY_FOOTER.to_string(), footer_obj);
            }
            extensions.push(ext);
        }
        out.insert(KEY_EXTENSIONS.to_string(), Value::Array(extensions));
    }

    if let Some(footer) = footer {
        let (footer_name, footer_params) = record_parts(footer)?;
        let mut footer_obj = Map::new();
        footer_obj.insert(
            KEY_TEMPLATE.to_string(),
            Value::String(footer_name.to_string()),
        );
        for (key, value) in footer_params {
            if key.starts_with('_') || key == KEY_EXTENSIONS {
                continue;
            }
            footer_obj.insert(key.clone(), param_to_schema(value, None, &json!({}))?);
        }
        out.insert(KEY_FOOTER.to_string(), Value::Object(footer_obj));
    }

    Ok(Value::Object(out))
}

/// Wiki parameter value to schema value, applying the property spec
/// where known and list-vs-scalar heuristics otherwise.
fn param_to_schema(
    value: &Value,
    spec: Option<PropertySpec>,
    item_schema: &Value,
) -> Result<Value, SchemaError> {
    match value {
        Value::String(s) => {
            let coerced = coerce_scalar(s, spec.map(|s| s.ptype));
            if spec.map(|s| s.array).unwrap_or(false) {
                Ok(Value::Array(vec![coerced]))
            } else {
                Ok(coerced)
            }
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Object(_) => out.push(wiki_json_to_schema_json(
                        item_schema,
                        &Value::Array(vec![item.clone()]),
                    )?),
                    Value::String(s) => out.push(coerce_scalar(s, spec.map(|s| s.ptype))),
                    other => out.push(other.clone()),
                }
            }
            let array = match spec {
                Some(spec) => spec.array,
                None => out.len() > 1,
            };
            if array {
                Ok(Value::Array(out))
            } else {
                Ok(out.into_iter().next().unwrap_or(Value::Null))
            }
        }
        other => Ok(other.clone()),
    }
}

fn coerce_scalar(s: &str, ptype: Option<PropertyType>) -> Value {
    match ptype {
        Some(PropertyType::Integer) => s
            .parse::<i64>()
            .map(|n| json!(n))
            .unwrap_or_else(|_| Value::String(s.to_string())),
        Some(PropertyType::Number) => s
            .parse::<f64>()
            .map(|n| json!(n))
            .unwrap_or_else(|_| Value::String(s.to_string())),
        Some(PropertyType::Boolean) => match s {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(s.to_string()),
        },
        _ => Value::String(s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Value {
        json!({
            "properties": {
                "name": {"type": "string"},
                "count": {"type": "integer"},
                "weight": {"type": "number"},
                "tags": {"type": "array", "items": {"type": "string"}},
            }
        })
    }

    fn sample_schema_json() -> Value {
        json!({
            "osl_template": "Template:Thing",
            "osl_wikitext": "Some free text.",
            "name": "A",
            "count": 3,
            "weight": 1.5,
            "tags": ["x", "y"],
            "osl_footer": {"osl_template": "Template:Thing/Footer"}
        })
    }

    #[test]
    fn full_round_trip_with_known_schema() {
        let schema = sample_schema();
        let schema_json = sample_schema_json();
        let wiki = schema_json_to_wiki_json(&schema_json).unwrap();
        let back = wiki_json_to_schema_json(&schema, &wiki).unwrap();
        assert_eq!(back, schema_json);
    }

    #[test]
    fn missing_template_fails() {
        let err = schema_json_to_wiki_json(&json!({"name": "A"})).unwrap_err();
        assert!(matches!(err, SchemaError::MissingTemplate));
    }

    #[test]
    fn empty_list_is_dropped() {
        let schema_json = json!({
            "osl_template": "Template:Thing",
            "tags": []
        });
        let wiki = schema_json_to_wiki_json(&schema_json).unwrap();
        let (_, params) = record_parts(&wiki[0]).unwrap();
        assert!(!params.contains_key("tags"));
    }

    #[test]
    fn singleton_list_unwraps_without_schema() {
        let wiki = json!([
            {"Template:Thing": {"only": ["one"], "many": ["a", "b"]}},
            ""
        ]);
        let back = wiki_json_to_schema_json(&json!({}), &wiki).unwrap();
        assert_eq!(back["only"], json!("one"));
        assert_eq!(back["many"], json!(["a", "b"]));
    }

    #[test]
    fn integer_coercion_follows_schema() {
        let wiki = json!([{"Template:Thing": {"count": "42"}}, ""]);
        let back = wiki_json_to_schema_json(&sample_schema(), &wiki).unwrap();
        assert_eq!(back["count"], json!(42));
    }

    #[test]
    fn extensions_pair_by_index() {
        let schema_json = json!({
            "osl_template": "Template:Thing",
            "osl_footer": {"osl_template": "Template:Thing/Footer"},
            "extensions": [
                {
                    "osl_template": "Template:Ext",
                    "p": "v",
                    "osl_footer": {"osl_template": "Template:Ext/Footer"}
                }
            ]
        });
        let wiki = schema_json_to_wiki_json(&schema_json).unwrap();
        let back = wiki_json_to_schema_json(&json!({}), &wiki).unwrap();
        assert_eq!(back, schema_json);
    }

    #[test]
    fn extension_count_mismatch_fails() {
        let wiki = json!([
            {"Template:Thing": {"extensions": [{"Template:Ext": {}}]}},
            "",
            {"Template:Thing/Footer": {"extensions": []}}
        ]);
        let err = wiki_json_to_schema_json(&json!({}), &wiki).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::ExtensionMismatch { header: 1, footer: 0 }
        ));
    }

    #[test]
    fn private_keys_are_never_written() {
        let schema_json = json!({
            "osl_template": "Template:Thing",
            "_private": "hidden",
            "name": "A"
        });
        let wiki = schema_json_to_wiki_json(&schema_json).unwrap();
        let (_, params) = record_parts(&wiki[0]).unwrap();
        assert!(!params.contains_key("_private"));
        assert!(params.contains_key("name"));
    }
}
