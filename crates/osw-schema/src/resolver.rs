//! Recursive schema fetch with `$ref` rewriting and a disk cache.
//!
//! Category schemas cross-reference each other with wiki-absolute
//! `$ref`s (`/wiki/<Title>?action=raw&slot=jsonschema`). The resolver
//! pulls the transitive closure once per title, rewrites those refs to
//! file-relative paths so the cached set validates offline, persists
//! each schema under `<cache_dir>/<name>.json`, and publishes the
//! generated classes to the registry in a single snapshot swap.

use crate::generator::{ClassGenerator, SchemaClassGenerator};
use crate::introspect::ref_title;
use crate::registry::ClassRegistry;
use crate::SchemaError;
use osw_wiki::{slots, SlotPayload, WikiError, WikiPort};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Merge into the current registry; already-known classes win.
    Append,
    /// The registry ends up with exactly the fetched set.
    Replace,
}

#[derive(Debug, Clone)]
pub struct FetchedSchema {
    /// Full page title the schema came from.
    pub title: String,
    /// File-safe name, `Category:X` -> `Category/X`. Slashes decide
    /// how many `../` hops rewritten refs need.
    pub name: String,
    /// The schema with refs rewritten.
    pub schema: Value,
}

/// `Category:X Y` -> `Category/X_Y`.
pub fn schema_file_name(title: &str) -> String {
    title.replace(' ', "_").replace(':', "/")
}

pub struct SchemaResolver {
    port: Arc<dyn WikiPort>,
    registry: Arc<ClassRegistry>,
    cache_dir: PathBuf,
    generator: Box<dyn ClassGenerator>,
}

impl SchemaResolver {
    pub fn new(
        port: Arc<dyn WikiPort>,
        registry: Arc<ClassRegistry>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            port,
            registry,
            cache_dir: cache_dir.into(),
            generator: Box::new(SchemaClassGenerator),
        }
    }

    pub fn with_generator(mut self, generator: Box<dyn ClassGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Fetch the given titles plus everything they reference, publish
    /// the resulting classes, and return the fetched set.
    pub async fn fetch_schemas(
        &self,
        titles: &[String],
        mode: FetchMode,
    ) -> Result<Vec<FetchedSchema>, SchemaError> {
        let mut queue: VecDeque<String> = titles.iter().cloned().collect();
        let mut visited: HashSet<String> = HashSet::new();
        let mut fetched = Vec::new();

        while let Some(title) = queue.pop_front() {
            if !visited.insert(title.clone()) {
                continue;
            }
            let mut schema = match self.read_schema(&title).await {
                Ok(schema) => schema,
                Err(SchemaError::Wiki(WikiError::NotFound(_))) => {
                    warn!(%title, "schema page missing, skipped");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let name = schema_file_name(&title);
            let depth = name.matches('/').count();
            rewrite_refs(&mut schema, depth, &mut |referenced| {
                queue.push_back(referenced);
            });
            self.persist(&name, &schema)?;
            debug!(%title, %name, "schema fetched");
            fetched.push(FetchedSchema {
                title,
                name,
                schema,
            });
        }

        let classes = self.generator.generate(&fetched)?;
        match mode {
            FetchMode::Replace => self.registry.replace(classes),
            FetchMode::Append => self.registry.append(classes),
        }
        Ok(fetched)
    }

    /// `jsonschema` slot for category pages, main content otherwise.
    async fn read_schema(&self, title: &str) -> Result<Value, SchemaError> {
        let page = self.port.read_page(title).await?;
        if !page.exists {
            return Err(SchemaError::Wiki(WikiError::NotFound(title.to_string())));
        }
        let slot = if title.starts_with("Category:") {
            slots::JSONSCHEMA
        } else {
            slots::MAIN
        };
        let record = page.slots.get(slot).ok_or_else(|| {
            SchemaError::BadSchema(format!("{title} has no {slot} slot"))
        })?;
        match &record.payload {
            SlotPayload::Json(value) => Ok(value.clone()),
            SlotPayload::Text(text) => serde_json::from_str(text)
                .map_err(|e| SchemaError::BadSchema(format!("{title}: {e}"))),
        }
    }

    fn persist(&self, name: &str, schema: &Value) -> Result<(), SchemaError> {
        let path = self.cache_dir.join(format!("{name}.json"));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(schema)?)?;
        Ok(())
    }
}

/// Rewrite wiki-form `$ref`s to file-relative paths, reporting each
/// referenced title. Self-refs (`#...`) and already-relative refs are
/// left alone.
fn rewrite_refs(value: &mut Value, depth: usize, on_ref: &mut impl FnMut(String)) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                if let Some(title) = ref_title(reference) {
                    let relative =
                        format!("{}{}.json", "../".repeat(depth), schema_file_name(&title));
                    map.insert("$ref".to_string(), Value::String(relative));
                    on_ref(title);
                }
            }
            for (_, v) in map.iter_mut() {
                rewrite_refs(v, depth, on_ref);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_refs(item, depth, on_ref);
            }
        }
        _ => {}
    }
}
