//! The store/load engine.
//!
//! Entities go to the wiki as multi-slot pages: `jsondata` carries the
//! instance, `header`/`footer` carry fixed invoke strings for
//! rendering, `jsonschema` is regenerated for category entities and
//! `main` is only touched when the entity supplies free text.
//!
//! Batches run through a bounded task pool (size 1 by default). Each
//! task buffers its progress line so interleaved output is flushed in
//! input order when the batch completes; a failing entity is counted
//! and logged, never aborts the batch.

use crate::policy::{self, OverwritePolicy};
use crate::StoreError;
use osw_ids::{title_to_uuid, Namespace};
use osw_schema::{cast, ClassRegistry, Entity};
use osw_wiki::{slots, PageCache, WikiError, WikiPage, WikiPort};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Rendering hooks written to every entity page.
pub const HEADER_INVOKE: &str = "{{#invoke:Entity|header}}";
pub const FOOTER_INVOKE: &str = "{{#invoke:Entity|footer}}";

/// Category roots that decide the target namespace of an entity.
const CATEGORY_ROOT: &str = "Category:Category";
const PROPERTY_ROOT: &str = "Category:Property";
const FILE_ROOT: &str = "Category:WikiFile";

#[derive(Debug, Clone)]
pub struct StoreParam {
    /// Target namespace; inferred from the closest type when `None`.
    pub namespace: Option<Namespace>,
    pub overwrite: OverwritePolicy,
    pub comment: Option<String>,
    /// Task pool size for the batch.
    pub parallel: usize,
}

impl Default for StoreParam {
    fn default() -> Self {
        Self {
            namespace: None,
            overwrite: OverwritePolicy::default(),
            comment: None,
            parallel: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadParam {
    pub disable_cache: bool,
}

/// Outcome of a batch; per-item failures never abort the rest.
#[derive(Debug)]
pub struct BatchResult<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<(String, StoreError)>,
}

// Not derived: a derive would demand `T: Default`, and item types like
// `Entity` have none.
impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchResult<T> {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct OswClient {
    port: Arc<dyn WikiPort>,
    registry: Arc<ClassRegistry>,
    cache: Mutex<PageCache>,
}

impl OswClient {
    pub fn new(port: Arc<dyn WikiPort>, registry: Arc<ClassRegistry>) -> Self {
        Self {
            port,
            registry,
            cache: Mutex::new(PageCache::new()),
        }
    }

    pub fn port(&self) -> &Arc<dyn WikiPort> {
        &self.port
    }

    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    /// Store a batch. Effect order is input order; progress lines are
    /// buffered per task and flushed at the end in that same order.
    pub async fn store_entities(
        &self,
        entities: &[Entity],
        param: &StoreParam,
    ) -> BatchResult<String> {
        let pool = param.parallel.max(1);
        let semaphore = Arc::new(Semaphore::new(pool));
        let mut set = JoinSet::new();
        for (index, entity) in entities.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let port = Arc::clone(&self.port);
            let registry = Arc::clone(&self.registry);
            let param = param.clone();
            let id = entity.osw_id();
            set.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => store_one(port, registry, entity, &param).await,
                    Err(e) => Err(StoreError::Wiki(WikiError::Transport(e.to_string()))),
                };
                (index, id, outcome)
            });
        }

        let mut slots_out: Vec<Option<(String, Result<(String, String), StoreError>)>> =
            (0..entities.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, id, outcome)) => slots_out[index] = Some((id, outcome)),
                Err(e) => warn!("store task failed to join: {e}"),
            }
        }

        let mut result = BatchResult::default();
        for entry in slots_out.into_iter().flatten() {
            match entry {
                (_, Ok((title, line))) => {
                    info!("{line}");
                    self.cache.lock().invalidate(&title);
                    result.succeeded.push(title);
                }
                (id, Err(e)) => {
                    warn!(entity = %id, "store failed: {e}");
                    result.failed.push((id, e));
                }
            }
        }
        result
    }

    pub async fn load_entities(
        &self,
        titles: &[String],
        param: &LoadParam,
    ) -> BatchResult<Entity> {
        let mut result = BatchResult::default();
        for title in titles {
            match self.load_one(title, param).await {
                Ok(entity) => result.succeeded.push(entity),
                Err(e) => {
                    warn!(%title, "load failed: {e}");
                    result.failed.push((title.clone(), e));
                }
            }
        }
        result
    }

    async fn load_one(&self, title: &str, param: &LoadParam) -> Result<Entity, StoreError> {
        let record = if param.disable_cache {
            self.port.read_page(title).await?
        } else {
            let cached = self.cache.lock().get(title).cloned();
            match cached {
                Some(record) => record,
                None => {
                    let record = self.port.read_page(title).await?;
                    self.cache.lock().put(record.clone());
                    record
                }
            }
        };
        if !record.exists {
            return Err(StoreError::Wiki(WikiError::NotFound(title.to_string())));
        }
        let jsondata = record
            .slots
            .get(slots::JSONDATA)
            .and_then(|slot| slot.payload.as_json())
            .ok_or_else(|| {
                StoreError::Wiki(WikiError::BadSlotJson {
                    title: title.to_string(),
                    slot: slots::JSONDATA.to_string(),
                    detail: "slot missing or not JSON".to_string(),
                })
            })?;
        let entity = Entity::from_jsondata(jsondata)?;
        if let Ok(uuid) = title_to_uuid(title) {
            if uuid != entity.uuid {
                warn!(%title, "jsondata uuid does not match the page title");
            }
        }
        let resolved = self.registry.resolve_types(&entity.types)?;
        Ok(cast(&entity, &resolved))
    }

    pub async fn delete_entity(
        &self,
        entity: &Entity,
        comment: &str,
    ) -> Result<(), StoreError> {
        let namespace = infer_namespace(&self.registry, entity);
        let title = entity.title_in(&namespace);
        self.port.delete_page(&title, comment).await?;
        self.cache.lock().invalidate(&title);
        Ok(())
    }

    /// Titles of all instances of a category, via semantic search over
    /// the `type` property.
    pub async fn query_instances(
        &self,
        category_title: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let query = format!("[[type::{category_title}]]");
        Ok(self.port.search_semantic(&query, limit).await?)
    }
}

/// Namespace of an entity: chase the closest type's parent chain to
/// one of the well-known roots, `Item` otherwise.
pub fn infer_namespace(registry: &ClassRegistry, entity: &Entity) -> Namespace {
    let Some(closest) = entity.closest_type() else {
        return Namespace::Item;
    };
    let snapshot = registry.snapshot();
    let mut seen = HashSet::new();
    let mut stack = vec![closest.to_string()];
    while let Some(title) = stack.pop() {
        if !seen.insert(title.clone()) {
            continue;
        }
        match title.as_str() {
            CATEGORY_ROOT => return Namespace::Category,
            PROPERTY_ROOT => return Namespace::Property,
            FILE_ROOT => return Namespace::File,
            _ => {}
        }
        if let Some(class) = snapshot.by_title(&title) {
            stack.extend(class.parents.iter().cloned());
        }
    }
    Namespace::Item
}

async fn store_one(
    port: Arc<dyn WikiPort>,
    registry: Arc<ClassRegistry>,
    entity: Entity,
    param: &StoreParam,
) -> Result<(String, String), StoreError> {
    let namespace = param
        .namespace
        .clone()
        .unwrap_or_else(|| infer_namespace(&registry, &entity));
    // `meta.wiki_page.title` pins pages whose title is not derived
    // from the UUID, e.g. label-named property pages.
    let title = entity
        .data
        .get("meta")
        .and_then(|meta| meta.get("wiki_page"))
        .and_then(|page| page.get("title"))
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| entity.title_in(&namespace));

    // Missing page: the remote side of the policy merge is `{}`.
    let mut page = WikiPage::open(Arc::clone(&port), &title).await?;
    let remote = page
        .get_slot_json(slots::JSONDATA)
        .cloned()
        .unwrap_or_else(|| json!({}));
    let local = entity.to_jsondata()?;
    let merged = policy::apply(&remote, &local, param.overwrite);

    page.set_slot_json(slots::JSONDATA, merged);
    page.set_slot_text(slots::HEADER, HEADER_INVOKE);
    page.set_slot_text(slots::FOOTER, FOOTER_INVOKE);
    if namespace == Namespace::Category {
        if let Some(schema) = entity.data.get("json_schema") {
            page.set_slot_json(slots::JSONSCHEMA, schema.clone());
        }
    }
    if let Some(text) = entity.osl_wikitext() {
        page.set_slot_text(slots::MAIN, text);
    }

    let comment = format!(
        "[bot] {}",
        param.comment.as_deref().unwrap_or("store entity")
    );
    page.edit(&comment).await?;
    let url = port.page_url(&title);
    Ok((title, format!("stored {url}")))
}
