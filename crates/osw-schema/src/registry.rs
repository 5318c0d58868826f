//! Process-wide class namespace.
//!
//! All lookups go through an immutable `RegistrySnapshot` behind an
//! `Arc`; publishing a new class set swaps the whole snapshot in one
//! store, so a reader either sees the old set or the new one, never a
//! half-written mix.

use crate::introspect::PropertySpec;
use crate::SchemaError;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One entity class derived from a category's JSON-Schema.
#[derive(Debug, Clone)]
pub struct EntityClass {
    /// Unqualified class name, e.g. `ChemicalSubstance`.
    pub name: String,
    /// Full page title of the backing category.
    pub category_title: String,
    /// Parent category titles, from `allOf` cross-references.
    pub parents: Vec<String>,
    /// The (ref-rewritten) schema itself.
    pub schema: Value,
    /// Declared properties, own and inherited.
    pub properties: BTreeMap<String, PropertySpec>,
}

#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    by_name: HashMap<String, Arc<EntityClass>>,
    by_title: HashMap<String, Arc<EntityClass>>,
}

impl RegistrySnapshot {
    pub fn from_classes(classes: Vec<EntityClass>) -> Self {
        let mut snapshot = RegistrySnapshot::default();
        for class in classes {
            snapshot.insert(Arc::new(class));
        }
        snapshot
    }

    fn insert(&mut self, class: Arc<EntityClass>) {
        self.by_title
            .insert(class.category_title.clone(), Arc::clone(&class));
        self.by_name.insert(class.name.clone(), class);
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<EntityClass>> {
        self.by_name.get(name).cloned()
    }

    pub fn by_title(&self, title: &str) -> Option<Arc<EntityClass>> {
        self.by_title.get(title).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Sorted class names, mainly for logs and tests.
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }
}

/// A class resolution result for an entity's `type` list.
///
/// Entities with several categories get a `Composite` over the
/// applicable classes in entity order (closest category last) instead
/// of a synthesized subclass.
#[derive(Debug, Clone)]
pub enum ResolvedClass {
    Single(Arc<EntityClass>),
    Composite(Vec<Arc<EntityClass>>),
}

impl ResolvedClass {
    pub fn name(&self) -> String {
        match self {
            ResolvedClass::Single(class) => class.name.clone(),
            ResolvedClass::Composite(classes) => classes
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join("And"),
        }
    }

    /// Category titles in entity `type` order.
    pub fn category_titles(&self) -> Vec<String> {
        match self {
            ResolvedClass::Single(class) => vec![class.category_title.clone()],
            ResolvedClass::Composite(classes) => {
                classes.iter().map(|c| c.category_title.clone()).collect()
            }
        }
    }

    /// Merged property specs. Later classes are more specific and win
    /// on conflicts.
    pub fn properties(&self) -> BTreeMap<String, PropertySpec> {
        match self {
            ResolvedClass::Single(class) => class.properties.clone(),
            ResolvedClass::Composite(classes) => {
                let mut merged = BTreeMap::new();
                for class in classes {
                    for (name, spec) in &class.properties {
                        merged.insert(name.clone(), *spec);
                    }
                }
                merged
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ClassRegistry {
    snapshot: RwLock<Arc<RegistrySnapshot>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot. Cheap; callers hold it as long as they like.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Replace the class set wholesale.
    pub fn replace(&self, classes: Vec<EntityClass>) {
        let next = Arc::new(RegistrySnapshot::from_classes(classes));
        tracing::debug!(classes = next.len(), "registry snapshot replaced");
        *self.snapshot.write() = next;
    }

    /// Merge new classes into the current set. Already-registered
    /// names keep their existing class; the result is a superset of
    /// the previous snapshot.
    pub fn append(&self, classes: Vec<EntityClass>) {
        let mut guard = self.snapshot.write();
        let mut next = RegistrySnapshot::default();
        for class in guard.by_name.values() {
            next.insert(Arc::clone(class));
        }
        for class in classes {
            if !next.by_name.contains_key(&class.name) {
                next.insert(Arc::new(class));
            }
        }
        tracing::debug!(classes = next.len(), "registry snapshot appended");
        *guard = Arc::new(next);
    }

    /// Resolve an entity's category titles, in entity order (closest
    /// category last), to its class. Every listed title must be
    /// registered: a partially-known list is an error, not a downcast
    /// to the known subset.
    pub fn resolve_types(&self, titles: &[String]) -> Result<ResolvedClass, SchemaError> {
        let snapshot = self.snapshot();
        let mut known: Vec<Arc<EntityClass>> = Vec::with_capacity(titles.len());
        let mut unknown: Vec<&str> = Vec::new();
        for title in titles {
            match snapshot.by_title(title) {
                Some(class) => known.push(class),
                None => unknown.push(title),
            }
        }
        if !unknown.is_empty() {
            return Err(SchemaError::UnknownEntityType(unknown.join(", ")));
        }
        match known.len() {
            0 => Err(SchemaError::UnknownEntityType("<none>".to_string())),
            1 => Ok(ResolvedClass::Single(known.remove(0))),
            _ => Ok(ResolvedClass::Composite(known)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{PropertyType, PropertySpec};
    use serde_json::json;

    fn class(name: &str, title: &str, props: &[(&str, bool)]) -> EntityClass {
        EntityClass {
            name: name.to_string(),
            category_title: title.to_string(),
            parents: Vec::new(),
            schema: json!({}),
            properties: props
                .iter()
                .map(|(p, array)| {
                    (
                        p.to_string(),
                        PropertySpec {
                            ptype: PropertyType::String,
                            array: *array,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn replace_swaps_whole_snapshot() {
        let registry = ClassRegistry::new();
        registry.replace(vec![class("A", "Category:A", &[])]);
        let before = registry.snapshot();
        registry.replace(vec![class("B", "Category:B", &[])]);
        // The old snapshot is unchanged for whoever still holds it.
        assert!(before.by_name("A").is_some());
        assert!(registry.snapshot().by_name("A").is_none());
        assert!(registry.snapshot().by_name("B").is_some());
    }

    #[test]
    fn append_keeps_existing_names() {
        let registry = ClassRegistry::new();
        registry.replace(vec![class("A", "Category:A", &[("kept", false)])]);
        registry.append(vec![
            class("A", "Category:Other", &[("clobbered", false)]),
            class("B", "Category:B", &[]),
        ]);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.class_names(), vec!["A", "B"]);
        assert_eq!(
            snapshot.by_name("A").unwrap().category_title,
            "Category:A"
        );
    }

    #[test]
    fn composite_merges_properties_most_specific_last() {
        let registry = ClassRegistry::new();
        registry.replace(vec![
            class("Base", "Category:Base", &[("shared", true), ("base_only", false)]),
            class("Leaf", "Category:Leaf", &[("shared", false)]),
        ]);
        let resolved = registry
            .resolve_types(&["Category:Base".into(), "Category:Leaf".into()])
            .unwrap();
        assert_eq!(resolved.name(), "BaseAndLeaf");
        let props = resolved.properties();
        assert!(!props["shared"].array);
        assert!(props.contains_key("base_only"));
    }

    #[test]
    fn unknown_types_error() {
        let registry = ClassRegistry::new();
        let err = registry.resolve_types(&["Category:Nope".into()]).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownEntityType(_)));
    }

    #[test]
    fn partially_unknown_types_error_instead_of_downcasting() {
        let registry = ClassRegistry::new();
        registry.replace(vec![class("Base", "Category:Base", &[])]);
        let err = registry
            .resolve_types(&["Category:Base".into(), "Category:Missing".into()])
            .unwrap_err();
        // The known subset must not be resolved on its own; the error
        // names exactly the titles the registry has no class for.
        assert!(
            matches!(err, SchemaError::UnknownEntityType(ref t) if t == "Category:Missing")
        );
    }
}
