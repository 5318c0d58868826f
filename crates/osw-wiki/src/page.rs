//! In-memory view of one wiki page.
//!
//! A `WikiPage` caches per-slot content, content models and dirty flags,
//! plus a parsed flat content structure for the main slot so template
//! edits can be expressed as structure operations. `edit` pushes every
//! dirty slot under a single CSRF token; a `badtoken` response is
//! retried once with a fresh token, an edit conflict once after a
//! re-read.

use crate::{slots, ContentModel, PageRecord, SlotPayload, WikiError, WikiPort};
use osw_wikitext::path::{get_values, set_value, ValuePath};
use osw_wikitext::{parse, serialize, ArrayMode, ContentNode, TemplateNode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct SlotState {
    content_model: ContentModel,
    payload: SlotPayload,
    dirty: bool,
}

pub struct WikiPage {
    port: Arc<dyn WikiPort>,
    title: String,
    exists: bool,
    revision: Option<u64>,
    slots: BTreeMap<String, SlotState>,
    /// Parsed main-slot structure, populated on first template access.
    main_nodes: Option<Vec<ContentNode>>,
}

impl WikiPage {
    /// Fetch one revision with all slots in a single port call.
    pub async fn open(port: Arc<dyn WikiPort>, title: &str) -> Result<Self, WikiError> {
        let record = port.read_page(title).await?;
        Ok(Self::from_record(port, record))
    }

    pub fn from_record(port: Arc<dyn WikiPort>, record: PageRecord) -> Self {
        let slots = record
            .slots
            .into_iter()
            .map(|(name, slot)| {
                (
                    name,
                    SlotState {
                        content_model: slot.content_model,
                        payload: slot.payload,
                        dirty: false,
                    },
                )
            })
            .collect();
        Self {
            port,
            title: record.title,
            exists: record.exists,
            revision: record.revision,
            slots,
            main_nodes: None,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    // ------------------------------------------------------------------
    // Slot access
    // ------------------------------------------------------------------

    pub fn get_slot_content(&self, slot: &str) -> Option<&SlotPayload> {
        self.slots.get(slot).map(|s| &s.payload)
    }

    pub fn get_slot_json(&self, slot: &str) -> Option<&Value> {
        self.get_slot_content(slot).and_then(|p| p.as_json())
    }

    pub fn slot_content_model(&self, slot: &str) -> Option<ContentModel> {
        self.slots.get(slot).map(|s| s.content_model)
    }

    /// Set a slot and mark it dirty. For slots not seen before the
    /// content model is inferred from the payload: text is wikitext,
    /// everything else JSON.
    pub fn set_slot_content(&mut self, slot: &str, payload: SlotPayload) {
        let content_model = self
            .slots
            .get(slot)
            .map(|s| s.content_model)
            .unwrap_or(match payload {
                SlotPayload::Text(_) => ContentModel::Wikitext,
                SlotPayload::Json(_) => ContentModel::Json,
            });
        if slot == slots::MAIN {
            self.main_nodes = None;
        }
        self.slots.insert(
            slot.to_string(),
            SlotState {
                content_model,
                payload,
                dirty: true,
            },
        );
    }

    pub fn set_slot_json(&mut self, slot: &str, value: Value) {
        self.set_slot_content(slot, SlotPayload::Json(value));
    }

    pub fn set_slot_text(&mut self, slot: &str, text: impl Into<String>) {
        self.set_slot_content(slot, SlotPayload::Text(text.into()));
    }

    pub fn dirty_slots(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, s)| s.dirty)
            .map(|(k, _)| k.clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Template-level helpers (main slot)
    // ------------------------------------------------------------------

    fn main_structure(&mut self) -> Result<&mut Vec<ContentNode>, WikiError> {
        if self.main_nodes.is_none() {
            let text = self
                .get_slot_content(slots::MAIN)
                .and_then(|p| p.as_text())
                .unwrap_or("")
                .to_string();
            self.main_nodes = Some(parse(&text, ArrayMode::OnlyMultiple)?);
        }
        Ok(self.main_nodes.as_mut().expect("populated above"))
    }

    pub fn append_template(&mut self, template: TemplateNode) -> Result<(), WikiError> {
        self.main_structure()?.push(ContentNode::Template(template));
        self.flush_main();
        Ok(())
    }

    pub fn get_value(&mut self, path: &str) -> Result<Vec<Value>, WikiError> {
        let path = ValuePath::parse(path)?;
        let nodes = self.main_structure()?;
        Ok(get_values(nodes, &path))
    }

    /// Update matches in place; with `replace` the matched subtree is
    /// substituted. Missing paths are created.
    pub fn set_value(&mut self, path: &str, value: &Value, replace: bool) -> Result<(), WikiError> {
        let path = ValuePath::parse(path)?;
        let nodes = self.main_structure()?;
        set_value(nodes, &path, value, replace)?;
        self.flush_main();
        Ok(())
    }

    fn flush_main(&mut self) {
        let Some(nodes) = &self.main_nodes else {
            return;
        };
        let text = serialize(nodes);
        let content_model = self
            .slots
            .get(slots::MAIN)
            .map(|s| s.content_model)
            .unwrap_or(ContentModel::Wikitext);
        self.slots.insert(
            slots::MAIN.to_string(),
            SlotState {
                content_model,
                payload: SlotPayload::Text(text),
                dirty: true,
            },
        );
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Push every dirty slot under a single CSRF token. If no slot
    /// encoding succeeds cleanly, no edit at all is issued.
    pub async fn edit(&mut self, comment: &str) -> Result<(), WikiError> {
        let dirty = self.dirty_slots();
        if dirty.is_empty() {
            debug!(title = %self.title, "edit skipped, no dirty slots");
            return Ok(());
        }

        // Encode everything up front so a broken payload never results
        // in a half-written page.
        let mut pending: Vec<(String, String, ContentModel)> = Vec::new();
        for name in &dirty {
            let slot = &self.slots[name];
            pending.push((name.clone(), slot.payload.encode()?, slot.content_model));
        }

        let mut token = self.port.get_token("csrf").await?;
        for (name, text, content_model) in pending {
            match self
                .port
                .edit_slot(&self.title, &name, &text, content_model, comment, &token)
                .await
            {
                Ok(()) => {}
                Err(WikiError::BadToken) => {
                    token = self.port.get_token("csrf").await?;
                    self.port
                        .edit_slot(&self.title, &name, &text, content_model, comment, &token)
                        .await?;
                }
                Err(WikiError::Conflict(_)) => {
                    let fresh = self.port.read_page(&self.title).await?;
                    self.revision = fresh.revision;
                    self.port
                        .edit_slot(&self.title, &name, &text, content_model, comment, &token)
                        .await?;
                }
                Err(e) => return Err(e),
            }
            if let Some(slot) = self.slots.get_mut(&name) {
                slot.dirty = false;
            }
        }
        self.exists = true;
        info!(title = %self.title, slots = dirty.len(), "page edited");
        Ok(())
    }

    pub async fn move_to(&mut self, new_title: &str, redirect: bool) -> Result<(), WikiError> {
        self.port
            .move_page(&self.title, new_title, redirect, "moved by osw toolkit")
            .await?;
        self.title = new_title.to_string();
        Ok(())
    }

    pub async fn delete(&self, comment: &str) -> Result<(), WikiError> {
        self.port.delete_page(&self.title, comment).await
    }
}

// ============================================================================
// Page cache
// ============================================================================

/// Optional per-session cache of fetched page records. Disabled by
/// default; callers that enable it own invalidation.
#[derive(Default)]
pub struct PageCache {
    records: BTreeMap<String, PageRecord>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, title: &str) -> Option<&PageRecord> {
        self.records.get(title)
    }

    pub fn put(&mut self, record: PageRecord) {
        self.records.insert(record.title.clone(), record);
    }

    pub fn invalidate(&mut self, title: &str) {
        self.records.remove(title);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockWiki;
    use serde_json::json;

    #[tokio::test]
    async fn slot_roundtrip_through_edit() {
        let wiki = Arc::new(MockWiki::new());
        let mut page = WikiPage::open(wiki.clone(), "Item:OSWtest").await.unwrap();
        assert!(!page.exists());

        page.set_slot_json(slots::JSONDATA, json!({"name": "X"}));
        page.set_slot_text(slots::HEADER, "{{#invoke:Entity|header}}");
        page.edit("test edit").await.unwrap();

        let fetched = WikiPage::open(wiki, "Item:OSWtest").await.unwrap();
        assert!(fetched.exists());
        assert_eq!(fetched.get_slot_json(slots::JSONDATA), Some(&json!({"name": "X"})));
        assert_eq!(
            fetched.slot_content_model(slots::HEADER),
            Some(ContentModel::Wikitext)
        );
    }

    #[tokio::test]
    async fn unknown_slot_model_is_inferred() {
        let wiki = Arc::new(MockWiki::new());
        let mut page = WikiPage::open(wiki, "Item:OSWinfer").await.unwrap();
        page.set_slot_text("custom_text", "plain");
        page.set_slot_json("custom_data", json!([1, 2]));
        assert_eq!(
            page.slot_content_model("custom_text"),
            Some(ContentModel::Wikitext)
        );
        assert_eq!(page.slot_content_model("custom_data"), Some(ContentModel::Json));
    }

    #[tokio::test]
    async fn badtoken_is_retried_once() {
        let wiki = Arc::new(MockWiki::new());
        let mut page = WikiPage::open(wiki.clone(), "Item:OSWretry").await.unwrap();
        page.set_slot_text(slots::MAIN, "hello");
        wiki.fail_next_edit_with_badtoken();
        page.edit("retry test").await.unwrap();
        assert!(wiki.page_exists("Item:OSWretry"));
    }

    #[tokio::test]
    async fn conflict_is_retried_after_reread() {
        let wiki = Arc::new(MockWiki::new());
        wiki.seed_wikitext("Item:OSWconflict", "old");
        let mut page = WikiPage::open(wiki.clone(), "Item:OSWconflict").await.unwrap();
        page.set_slot_text(slots::MAIN, "new");
        wiki.fail_next_edit_with_conflict();
        page.edit("conflict test").await.unwrap();
        let fetched = wiki.read_page("Item:OSWconflict").await.unwrap();
        assert_eq!(
            fetched.slots[slots::MAIN].payload.as_text().unwrap(),
            "new"
        );
    }

    #[tokio::test]
    async fn template_helpers_edit_main_structure() {
        let wiki = Arc::new(MockWiki::new());
        wiki.seed_wikitext("Item:OSWtpl", "{{Info|a=1}}");
        let mut page = WikiPage::open(wiki, "Item:OSWtpl").await.unwrap();

        assert_eq!(page.get_value("Info.a").unwrap(), vec![json!("1")]);
        page.set_value("Info.a", &json!("2"), false).unwrap();
        assert_eq!(page.get_value("Info.a").unwrap(), vec![json!("2")]);

        page.append_template(TemplateNode::new("Extra")).unwrap();
        let text = page.get_slot_content(slots::MAIN).unwrap().as_text().unwrap();
        assert!(text.contains("{{Extra"));
    }
}
