//! In-memory wiki backend for tests.
//!
//! Stores pages and slots in a process-local map, hands out counting
//! CSRF tokens, and answers semantic `[[Prop::Value]]` queries by
//! scanning stored `jsondata` slots. One-shot failure injection covers
//! the badtoken and edit-conflict retry paths.

use crate::{
    slots, ContentModel, FileInfo, PageRecord, SlotPayload, SlotRecord, WikiError, WikiPort,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default, Clone)]
struct StoredPage {
    revision: u64,
    slots: BTreeMap<String, SlotRecord>,
}

#[derive(Default)]
struct MockState {
    pages: HashMap<String, StoredPage>,
    token_counter: u64,
    issued_tokens: Vec<String>,
    fail_next_edit_badtoken: u32,
    fail_next_edit_conflict: u32,
    edit_log: Vec<String>,
}

#[derive(Default)]
pub struct MockWiki {
    state: RwLock<MockState>,
}

impl MockWiki {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a page slot directly, bypassing the edit path.
    pub fn seed_slot(&self, title: &str, slot: &str, record: SlotRecord) {
        let mut state = self.state.write();
        let page = state.pages.entry(title.to_string()).or_default();
        page.revision += 1;
        page.slots.insert(slot.to_string(), record);
    }

    pub fn seed_json_slot(&self, title: &str, slot: &str, value: Value) {
        self.seed_slot(
            title,
            slot,
            SlotRecord {
                content_model: ContentModel::Json,
                payload: SlotPayload::Json(value),
            },
        );
    }

    pub fn seed_wikitext(&self, title: &str, text: &str) {
        self.seed_slot(
            title,
            slots::MAIN,
            SlotRecord {
                content_model: ContentModel::Wikitext,
                payload: SlotPayload::Text(text.to_string()),
            },
        );
    }

    /// Each call arms one more edit failure with `BadToken`.
    pub fn fail_next_edit_with_badtoken(&self) {
        self.state.write().fail_next_edit_badtoken += 1;
    }

    /// Each call arms one more edit failure with `Conflict`.
    pub fn fail_next_edit_with_conflict(&self) {
        self.state.write().fail_next_edit_conflict += 1;
    }

    pub fn page_exists(&self, title: &str) -> bool {
        self.state.read().pages.contains_key(title)
    }

    pub fn edit_count(&self) -> usize {
        self.state.read().edit_log.len()
    }

    pub fn titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = self.state.read().pages.keys().cloned().collect();
        titles.sort();
        titles
    }

    fn check_edit(&self, title: &str, token: &str) -> Result<(), WikiError> {
        let mut state = self.state.write();
        if state.fail_next_edit_badtoken > 0 {
            state.fail_next_edit_badtoken -= 1;
            return Err(WikiError::BadToken);
        }
        if state.fail_next_edit_conflict > 0 {
            state.fail_next_edit_conflict -= 1;
            return Err(WikiError::Conflict(title.to_string()));
        }
        if !state.issued_tokens.iter().any(|t| t == token) {
            return Err(WikiError::BadToken);
        }
        state.edit_log.push(title.to_string());
        Ok(())
    }
}

/// Does any object in `value` match `property`/`target`, either as a
/// direct `key == property` field or as a statement record with
/// `property`/`value` fields?
fn json_matches(value: &Value, property: &str, target: &str) -> bool {
    match value {
        Value::Object(map) => {
            let statement_match = map
                .get("property")
                .and_then(Value::as_str)
                .map(|p| p == property || p.ends_with(&format!(":{property}")))
                .unwrap_or(false)
                && map
                    .get("value")
                    .and_then(Value::as_str)
                    .map(|v| v == target)
                    .unwrap_or(false);
            if statement_match {
                return true;
            }
            map.iter().any(|(k, v)| {
                (k == property && v.as_str() == Some(target))
                    || (k == property
                        && v.as_array()
                            .map(|a| a.iter().any(|i| i.as_str() == Some(target)))
                            .unwrap_or(false))
                    || json_matches(v, property, target)
            })
        }
        Value::Array(items) => items.iter().any(|v| json_matches(v, property, target)),
        _ => false,
    }
}

#[async_trait]
impl WikiPort for MockWiki {
    async fn read_page(&self, title: &str) -> Result<PageRecord, WikiError> {
        let state = self.state.read();
        match state.pages.get(title) {
            Some(page) => Ok(PageRecord {
                title: title.to_string(),
                exists: true,
                revision: Some(page.revision),
                slots: page.slots.clone(),
            }),
            None => Ok(PageRecord::missing(title)),
        }
    }

    async fn edit_main(
        &self,
        title: &str,
        wikitext: &str,
        _comment: &str,
        token: &str,
    ) -> Result<(), WikiError> {
        self.check_edit(title, token)?;
        self.seed_wikitext(title, wikitext);
        Ok(())
    }

    async fn edit_slot(
        &self,
        title: &str,
        slot: &str,
        text: &str,
        content_model: ContentModel,
        _comment: &str,
        token: &str,
    ) -> Result<(), WikiError> {
        self.check_edit(title, token)?;
        let payload = match content_model {
            ContentModel::Json => {
                let value: Value =
                    serde_json::from_str(text).map_err(|e| WikiError::BadSlotJson {
                        title: title.to_string(),
                        slot: slot.to_string(),
                        detail: e.to_string(),
                    })?;
                SlotPayload::Json(value)
            }
            _ => SlotPayload::Text(text.to_string()),
        };
        self.seed_slot(
            title,
            slot,
            SlotRecord {
                content_model,
                payload,
            },
        );
        Ok(())
    }

    async fn move_page(
        &self,
        title: &str,
        new_title: &str,
        redirect: bool,
        _comment: &str,
    ) -> Result<(), WikiError> {
        let mut state = self.state.write();
        let page = state
            .pages
            .remove(title)
            .ok_or_else(|| WikiError::NotFound(title.to_string()))?;
        state.pages.insert(new_title.to_string(), page);
        if redirect {
            let mut redirect_slots = BTreeMap::new();
            redirect_slots.insert(
                slots::MAIN.to_string(),
                SlotRecord {
                    content_model: ContentModel::Wikitext,
                    payload: SlotPayload::Text(format!("#REDIRECT [[{new_title}]]")),
                },
            );
            state.pages.insert(
                title.to_string(),
                StoredPage {
                    revision: 1,
                    slots: redirect_slots,
                },
            );
        }
        Ok(())
    }

    async fn delete_page(&self, title: &str, _comment: &str) -> Result<(), WikiError> {
        self.state
            .write()
            .pages
            .remove(title)
            .map(|_| ())
            .ok_or_else(|| WikiError::NotFound(title.to_string()))
    }

    async fn search_prefix(&self, text: &str, limit: usize) -> Result<Vec<String>, WikiError> {
        let state = self.state.read();
        let mut hits: Vec<String> = state
            .pages
            .keys()
            .filter(|t| t.starts_with(text))
            .cloned()
            .collect();
        hits.sort();
        hits.truncate(limit);
        Ok(hits)
    }

    async fn search_semantic(&self, query: &str, limit: usize) -> Result<Vec<String>, WikiError> {
        // `[[Prop::Value]]`
        let inner = query
            .trim()
            .trim_start_matches("[[")
            .trim_end_matches("]]");
        let Some((property, target)) = inner.split_once("::") else {
            return Ok(Vec::new());
        };
        let state = self.state.read();
        let mut hits: Vec<String> = state
            .pages
            .iter()
            .filter(|(_, page)| {
                page.slots
                    .get(slots::JSONDATA)
                    .and_then(|s| s.payload.as_json())
                    .map(|v| json_matches(v, property, target))
                    .unwrap_or(false)
            })
            .map(|(title, _)| title.clone())
            .collect();
        hits.sort();
        hits.truncate(limit);
        Ok(hits)
    }

    async fn get_token(&self, kind: &str) -> Result<String, WikiError> {
        let mut state = self.state.write();
        state.token_counter += 1;
        let token = format!("{kind}-token-{}", state.token_counter);
        state.issued_tokens.push(token.clone());
        Ok(token)
    }

    async fn upload(&self, _data: Vec<u8>, title: &str, _comment: &str) -> Result<(), WikiError> {
        let mut state = self.state.write();
        state.pages.entry(title.to_string()).or_default().revision += 1;
        Ok(())
    }

    async fn file_info_and_usage(&self, title: &str) -> Result<FileInfo, WikiError> {
        let state = self.state.read();
        if !state.pages.contains_key(title) {
            return Err(WikiError::NotFound(title.to_string()));
        }
        Ok(FileInfo {
            title: title.to_string(),
            url: Some(format!("{}/wiki/{title}", self.site_url())),
            size: None,
            usage: Vec::new(),
        })
    }

    fn site_url(&self) -> String {
        "https://wiki.example.org".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn missing_page_reads_as_not_existing() {
        let wiki = MockWiki::new();
        let page = wiki.read_page("Item:OSWmissing").await.unwrap();
        assert!(!page.exists);
    }

    #[tokio::test]
    async fn edit_requires_issued_token() {
        let wiki = MockWiki::new();
        let err = wiki
            .edit_main("Item:Test", "text", "c", "bogus")
            .await
            .unwrap_err();
        assert!(matches!(err, WikiError::BadToken));

        let token = wiki.get_token("csrf").await.unwrap();
        wiki.edit_main("Item:Test", "text", "c", &token).await.unwrap();
        assert!(wiki.page_exists("Item:Test"));
    }

    #[tokio::test]
    async fn semantic_search_matches_statements() {
        let wiki = MockWiki::new();
        wiki.seed_json_slot(
            "Item:OSWaaaa",
            slots::JSONDATA,
            json!({
                "statements": [
                    {"property": "Property:TestProperty", "value": "TestValue"}
                ]
            }),
        );
        let hits = wiki
            .search_semantic("[[TestProperty::TestValue]]", 10)
            .await
            .unwrap();
        assert_eq!(hits, vec!["Item:OSWaaaa".to_string()]);
    }

    #[tokio::test]
    async fn move_with_redirect_leaves_pointer() {
        let wiki = MockWiki::new();
        wiki.seed_wikitext("Item:A", "content");
        wiki.move_page("Item:A", "Item:B", true, "mv").await.unwrap();
        let old = wiki.read_page("Item:A").await.unwrap();
        assert!(old.exists);
        let text = old.slots[slots::MAIN].payload.as_text().unwrap();
        assert!(text.contains("#REDIRECT"));
        assert!(wiki.page_exists("Item:B"));
    }
}
