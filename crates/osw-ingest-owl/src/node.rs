//! From the union graph to shaped, wiki-ready nodes.
//!
//! Nodes are keyed by IRI, compacted against a synthesized context,
//! sanitized (list `@type`, `www.` stripped, restrictions flattened or
//! extracted) and shaped (arrays, multilang, deterministic UUID,
//! pascal-cased name). The final order is `(rank, iri)` with
//! properties 0, classes 1, everything else 10, which makes a full
//! import reproducible.

use crate::graph::{
    Node, Object, Triple, OWL_ANNOTATION_PROPERTY, OWL_CLASS, OWL_DATA_PROPERTY,
    OWL_NAMED_INDIVIDUAL, OWL_OBJECT_PROPERTY, OWL_ON_PROPERTY, OWL_RESTRICTION,
    OWL_SOME_VALUES_FROM, RDFS_SUBCLASS_OF, RDF_TYPE,
};
use crate::{ImportError, ParserSettings};
use async_trait::async_trait;
use osw_wiki::{slots, WikiPort};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// What kind of wiki page a node becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Class,
    ObjectProperty,
    DataProperty,
    AnnotationProperty,
    Individual,
    Other,
}

impl NodeKind {
    pub fn rank(&self) -> u8 {
        match self {
            NodeKind::ObjectProperty
            | NodeKind::DataProperty
            | NodeKind::AnnotationProperty => 0,
            NodeKind::Class => 1,
            NodeKind::Individual | NodeKind::Other => 10,
        }
    }

    fn of_types(types: &[String]) -> NodeKind {
        for t in types {
            match t.as_str() {
                OWL_CLASS => return NodeKind::Class,
                OWL_OBJECT_PROPERTY => return NodeKind::ObjectProperty,
                OWL_DATA_PROPERTY => return NodeKind::DataProperty,
                OWL_ANNOTATION_PROPERTY => return NodeKind::AnnotationProperty,
                OWL_NAMED_INDIVIDUAL => return NodeKind::Individual,
                _ => {}
            }
        }
        NodeKind::Other
    }
}

#[derive(Debug, Clone)]
pub struct OntologyNode {
    pub iri: String,
    pub kind: NodeKind,
    /// rdf types, always a list.
    pub types: Vec<String>,
    /// Compacted, shaped fields.
    pub fields: Map<String, Value>,
}

/// Serves schema `@context` documents referenced as
/// `/wiki/<Title>?action=raw&slot=jsonschema` so the import never
/// touches the network for them.
#[async_trait]
pub trait ContextFetcher: Send + Sync {
    async fn fetch_context(&self, title: &str) -> Result<Value, ImportError>;
}

pub struct WikiContextFetcher {
    port: Arc<dyn WikiPort>,
}

impl WikiContextFetcher {
    pub fn new(port: Arc<dyn WikiPort>) -> Self {
        Self { port }
    }
}

#[async_trait]
impl ContextFetcher for WikiContextFetcher {
    async fn fetch_context(&self, title: &str) -> Result<Value, ImportError> {
        let page = self.port.read_page(title).await?;
        let context = page
            .slots
            .get(slots::JSONSCHEMA)
            .and_then(|slot| slot.payload.as_json())
            .and_then(|schema| schema.get("@context"))
            .cloned()
            .unwrap_or_else(|| json!({}));
        Ok(context)
    }
}

/// Term aliases every import understands, independent of the wiki's
/// category context.
fn local_aliases() -> Vec<(&'static str, &'static str)> {
    vec![
        ("label", "http://www.w3.org/2000/01/rdf-schema#label"),
        ("altLabel", "http://www.w3.org/2004/02/skos/core#altLabel"),
        ("description", "http://www.w3.org/2000/01/rdf-schema#comment"),
        ("subclass_of", RDFS_SUBCLASS_OF),
        (
            "subproperty_of",
            "http://www.w3.org/2000/01/rdf-schema#subPropertyOf",
        ),
        ("domain", "http://www.w3.org/2000/01/rdf-schema#domain"),
        ("range", "http://www.w3.org/2000/01/rdf-schema#range"),
        ("on_property", OWL_ON_PROPERTY),
        ("some_values_from", OWL_SOME_VALUES_FROM),
        (
            "all_values_from",
            "http://www.w3.org/2002/07/owl#allValuesFrom",
        ),
    ]
}

/// IRI → compact key map: the wiki's category context plus the local
/// aliases. Later entries never shadow the aliases.
pub fn build_context(wiki_context: &Value) -> HashMap<String, String> {
    let mut by_iri: HashMap<String, String> = HashMap::new();
    if let Value::Object(map) = wiki_context {
        for (key, value) in map {
            if let Some(iri) = value.as_str() {
                by_iri.insert(iri.to_string(), key.clone());
            }
        }
    }
    for (alias, iri) in local_aliases() {
        by_iri.insert(iri.to_string(), alias.to_string());
    }
    by_iri
}

fn strip_www(iri: &str) -> String {
    iri.replacen("://www.", "://", 1)
}

fn local_name(iri: &str) -> &str {
    iri.rsplit(['#', '/']).next().unwrap_or(iri)
}

fn object_to_value(object: &Object) -> Value {
    match object {
        Object::Node(Node::Iri(iri)) => Value::String(strip_www(iri)),
        Object::Node(Node::Blank(id)) => Value::String(format!("_:{id}")),
        Object::Literal { value, lang, .. } => match lang {
            Some(lang) => json!({"text": value, "lang": lang}),
            None => Value::String(value.clone()),
        },
    }
}

/// Group the union graph into compacted nodes, handling
/// `rdfs:subClassOf` restrictions per the parser settings.
pub fn build_nodes(
    triples: &[Triple],
    context: &HashMap<String, String>,
    settings: &ParserSettings,
) -> Vec<OntologyNode> {
    // Blank restriction nodes first so subclass targets can be
    // resolved against them.
    let mut blank: HashMap<String, BTreeMap<String, Vec<Value>>> = HashMap::new();
    let mut named: BTreeMap<String, BTreeMap<String, Vec<Value>>> = BTreeMap::new();
    let mut types: HashMap<String, Vec<String>> = HashMap::new();

    for triple in triples {
        let value = object_to_value(&triple.object);
        match &triple.subject {
            Node::Blank(id) => {
                blank
                    .entry(id.clone())
                    .or_default()
                    .entry(triple.predicate.clone())
                    .or_default()
                    .push(value);
            }
            Node::Iri(iri) => {
                let iri = strip_www(iri);
                if triple.predicate == RDF_TYPE {
                    if let Object::Node(Node::Iri(t)) = &triple.object {
                        types.entry(iri).or_default().push(t.clone());
                    }
                    continue;
                }
                named
                    .entry(iri)
                    .or_default()
                    .entry(triple.predicate.clone())
                    .or_default()
                    .push(value);
            }
        }
    }

    let restriction_of = |id: &str| -> Option<(Value, Value)> {
        let props = blank.get(id)?;
        let is_restriction = props
            .get(RDF_TYPE)
            .map(|t| t.iter().any(|v| v.as_str() == Some(OWL_RESTRICTION)))
            .unwrap_or(false);
        if !is_restriction {
            return None;
        }
        let on = props.get(OWL_ON_PROPERTY)?.first()?.clone();
        let from = props.get(OWL_SOME_VALUES_FROM)?.first()?.clone();
        Some((on, from))
    };

    // Nodes that only ever appear as rdf:type subjects still count.
    for iri in types.keys() {
        named.entry(iri.clone()).or_default();
    }

    let mut nodes = Vec::with_capacity(named.len());
    for (iri, predicates) in named {
        let node_types = types.remove(&iri).unwrap_or_default();
        let kind = NodeKind::of_types(&node_types);
        let mut fields: Map<String, Value> = Map::new();
        let mut restrictions: Vec<Value> = Vec::new();

        for (predicate, mut values) in predicates {
            if predicate == RDFS_SUBCLASS_OF {
                // Split restriction targets from plain superclasses.
                values.retain(|v| {
                    let Some(id) = v.as_str().and_then(|s| s.strip_prefix("_:")) else {
                        return true;
                    };
                    if let Some((on, from)) = restriction_of(id) {
                        restrictions
                            .push(json!({"on_property": on, "some_values_from": from}));
                    }
                    false
                });
            }
            if values.is_empty() {
                continue;
            }
            let key = context
                .get(&predicate)
                .cloned()
                .unwrap_or_else(|| local_name(&predicate).to_string());
            fields.insert(key, Value::Array(values));
        }

        if !restrictions.is_empty() {
            if settings.flatten_subclassof_restrictions {
                for restriction in &restrictions {
                    for field in ["on_property", "some_values_from"] {
                        if let Some(v) = restriction.get(field) {
                            let entry = fields
                                .entry(field.to_string())
                                .or_insert_with(|| Value::Array(Vec::new()));
                            if let Value::Array(items) = entry {
                                items.push(v.clone());
                            }
                        }
                    }
                }
            } else {
                fields.insert("restrictions".to_string(), Value::Array(restrictions));
            }
        }

        nodes.push(OntologyNode {
            iri,
            kind,
            types: node_types,
            fields,
        });
    }

    nodes.sort_by(|a, b| (a.kind.rank(), &a.iri).cmp(&(b.kind.rank(), &b.iri)));
    nodes
}

/// Apply array/multilang shaping and the label fallback in place.
/// Returns `false` when the node should be dropped (`remove_unnamed`).
pub fn shape_node(node: &mut OntologyNode, settings: &ParserSettings) -> bool {
    for field in &settings.ensure_multilang {
        if let Some(value) = node.fields.get_mut(field) {
            *value = to_multilang(value);
        }
    }
    for field in &settings.ensure_array {
        if let Some(value) = node.fields.get_mut(field) {
            if !value.is_array() {
                *value = Value::Array(vec![value.clone()]);
            }
        }
    }
    let unnamed = node
        .fields
        .get("label")
        .and_then(Value::as_array)
        .map(Vec::is_empty)
        .unwrap_or(true);
    if unnamed {
        if settings.remove_unnamed {
            return false;
        }
        let fallback = local_name(&node.iri).to_string();
        warn!(iri = %node.iri, "node has no label, using trailing IRI segment");
        node.fields.insert(
            "label".to_string(),
            json!([{"text": fallback, "lang": "en"}]),
        );
    }
    true
}

fn to_multilang(value: &Value) -> Value {
    let items: Vec<Value> = match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    Value::Array(
        items
            .into_iter()
            .map(|item| match item {
                Value::String(text) => json!({"text": text, "lang": "en"}),
                already => already,
            })
            .collect(),
    )
}

/// Deterministic UUID for an ontology term: a trailing 32-hex-char
/// segment (after `#` or `/`, case-insensitive) is taken verbatim,
/// anything else hashes the unmodified IRI under the URL namespace.
pub fn deterministic_uuid(iri: &str) -> Uuid {
    let tail = local_name(iri).to_ascii_lowercase();
    if tail.len() == 32 && tail.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(uuid) = Uuid::try_parse(&tail) {
            return uuid;
        }
    }
    Uuid::new_v5(&Uuid::NAMESPACE_URL, iri.as_bytes())
}
