//! Class descriptor generation.
//!
//! The built-in generator derives `EntityClass` descriptors directly
//! from a fetched schema set, folding inherited properties down the
//! `allOf` parent chain. An external command can be plugged in instead
//! for deployments that generate classes out of process.

use crate::introspect::{class_name, parent_titles, property_specs, PropertySpec};
use crate::registry::EntityClass;
use crate::resolver::FetchedSchema;
use crate::SchemaError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

pub trait ClassGenerator: Send + Sync {
    fn generate(&self, fetched: &[FetchedSchema]) -> Result<Vec<EntityClass>, SchemaError>;
}

/// Built-in generator: one class per fetched category schema.
#[derive(Debug, Default)]
pub struct SchemaClassGenerator;

impl SchemaClassGenerator {
    /// Own properties plus everything inherited through parents found
    /// in the same fetched set. Child declarations win.
    fn folded_properties(
        title: &str,
        by_title: &HashMap<&str, &Value>,
        visited: &mut HashSet<String>,
    ) -> BTreeMap<String, PropertySpec> {
        let mut merged = BTreeMap::new();
        if !visited.insert(title.to_string()) {
            return merged;
        }
        let Some(schema) = by_title.get(title) else {
            return merged;
        };
        for parent in parent_titles(schema) {
            merged.extend(Self::folded_properties(&parent, by_title, visited));
        }
        merged.extend(property_specs(schema));
        merged
    }
}

impl ClassGenerator for SchemaClassGenerator {
    fn generate(&self, fetched: &[FetchedSchema]) -> Result<Vec<EntityClass>, SchemaError> {
        let by_title: HashMap<&str, &Value> = fetched
            .iter()
            .map(|f| (f.title.as_str(), &f.schema))
            .collect();
        let mut classes = Vec::with_capacity(fetched.len());
        for schema in fetched {
            let mut visited = HashSet::new();
            classes.push(EntityClass {
                name: class_name(&schema.schema, &schema.title),
                category_title: schema.title.clone(),
                parents: parent_titles(&schema.schema),
                schema: schema.schema.clone(),
                properties: Self::folded_properties(&schema.title, &by_title, &mut visited),
            });
        }
        Ok(classes)
    }
}

/// Descriptor emitted by an external generator command. Property specs
/// are re-derived from the schema it returns.
#[derive(Debug, Deserialize)]
struct ExternalClass {
    name: String,
    category_title: String,
    #[serde(default)]
    parents: Vec<String>,
    schema: Value,
}

/// Out-of-process generator: the command receives the fetched schema
/// set as JSON on stdin and prints class descriptors as JSON.
#[derive(Debug)]
pub struct ExternalGenerator {
    command: PathBuf,
}

impl ExternalGenerator {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl ClassGenerator for ExternalGenerator {
    fn generate(&self, fetched: &[FetchedSchema]) -> Result<Vec<EntityClass>, SchemaError> {
        let input: Vec<Value> = fetched
            .iter()
            .map(|f| {
                serde_json::json!({
                    "title": f.title,
                    "name": f.name,
                    "schema": f.schema,
                })
            })
            .collect();

        let mut child = Command::new(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| {
                SchemaError::CodegenUnavailable(format!("{}: {e}", self.command.display()))
            })?;
        child
            .stdin
            .take()
            .expect("stdin piped")
            .write_all(serde_json::to_string(&input)?.as_bytes())?;
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(SchemaError::CodegenUnavailable(format!(
                "{} exited with {}",
                self.command.display(),
                output.status
            )));
        }

        let emitted: Vec<ExternalClass> = serde_json::from_slice(&output.stdout)?;
        Ok(emitted
            .into_iter()
            .map(|e| EntityClass {
                properties: property_specs(&e.schema),
                name: e.name,
                category_title: e.category_title,
                parents: e.parents,
                schema: e.schema,
            })
            .collect())
    }
}
