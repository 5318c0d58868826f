//! The in-memory entity object.
//!
//! An entity is a UUID-keyed domain object whose on-wiki surrogate is a
//! multi-slot page. Core fields are typed; everything the schema adds
//! beyond them lives in the flattened open field map.

use crate::registry::ResolvedClass;
use crate::SchemaError;
use osw_ids::{uuid_to_full_page_title, uuid_to_osw_id, Namespace};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

fn default_lang() -> String {
    "en".to_string()
}

/// A multilingual text value, `{text, lang}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LangText {
    pub text: String,
    #[serde(default = "default_lang")]
    pub lang: String,
}

impl LangText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            lang: default_lang(),
        }
    }

    pub fn with_lang(text: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            lang: lang.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub uuid: Uuid,
    /// Category full page titles; the last element is the closest
    /// category and drives class resolution.
    #[serde(rename = "type")]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label: Vec<LangText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub description: Vec<LangText>,
    /// Open, schema-described fields.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Entity {
    /// New entity with a fresh UUID.
    pub fn new(types: Vec<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            types,
            label: Vec::new(),
            name: None,
            description: Vec::new(),
            data: Map::new(),
        }
    }

    pub fn with_label(mut self, label: LangText) -> Self {
        self.label.push(label);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn osw_id(&self) -> String {
        uuid_to_osw_id(&self.uuid)
    }

    /// Canonical page title in the given namespace.
    pub fn title_in(&self, namespace: &Namespace) -> String {
        uuid_to_full_page_title(&self.uuid, namespace, "OSW")
    }

    /// Closest category (last element of `type`).
    pub fn closest_type(&self) -> Option<&str> {
        self.types.last().map(String::as_str)
    }

    pub fn to_jsondata(&self) -> Result<Value, SchemaError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_jsondata(value: &Value) -> Result<Self, SchemaError> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Main-slot free text, when the entity supplies one.
    pub fn osl_wikitext(&self) -> Option<&str> {
        self.data.get("osl_wikitext").and_then(Value::as_str)
    }
}

/// Rebuild an entity as an instance of `target`, keeping the UUID and
/// the fields the target class knows about. This is the idiomatic way
/// to convert between category types that share a UUID.
pub fn cast(entity: &Entity, target: &ResolvedClass) -> Entity {
    let known = target.properties();
    let data = entity
        .data
        .iter()
        .filter(|(k, _)| known.contains_key(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Entity {
        uuid: entity.uuid,
        types: target.category_titles(),
        label: entity.label.clone(),
        name: entity.name.clone(),
        description: entity.description.clone(),
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn jsondata_round_trips() {
        let entity = Entity::new(vec!["Category:OSWitem0000000000000000000000000000".into()])
            .with_label(LangText::new("Sample"))
            .with_field("boiling_point", json!(373.2));
        let value = entity.to_jsondata().unwrap();
        assert_eq!(value["type"][0], "Category:OSWitem0000000000000000000000000000");
        assert_eq!(value["label"][0]["text"], "Sample");
        assert_eq!(value["label"][0]["lang"], "en");
        assert_eq!(value["boiling_point"], json!(373.2));

        let back = Entity::from_jsondata(&value).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn title_matches_uuid() {
        let entity = Entity::new(vec![]);
        let title = entity.title_in(&osw_ids::Namespace::Item);
        assert_eq!(osw_ids::title_to_uuid(&title).unwrap(), entity.uuid);
    }

    #[test]
    fn lang_defaults_to_en() {
        let value = json!({
            "uuid": "2ea5b605-c91f-4e5a-9559-3dff79fdd4a5",
            "type": [],
            "label": [{"text": "NoLang"}]
        });
        let entity = Entity::from_jsondata(&value).unwrap();
        assert_eq!(entity.label[0].lang, "en");
    }
}
