//! RDF parsing and the recursive `owl:imports` walk.
//!
//! Sophia streams each serialization into a flat triple list; terms
//! are decoded from their display form, which is stable across the
//! parsers we use. The union graph is the concatenation of the root
//! document and every transitively imported ontology that resolves.

use crate::{ImportError, ImportResolver, RdfSerialization};
use sophia::api::prelude::*;
use sophia::api::triple::Triple as _;
use std::collections::HashSet;
use tracing::{debug, warn};

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const OWL_IMPORTS: &str = "http://www.w3.org/2002/07/owl#imports";
pub const OWL_CLASS: &str = "http://www.w3.org/2002/07/owl#Class";
pub const OWL_RESTRICTION: &str = "http://www.w3.org/2002/07/owl#Restriction";
pub const OWL_OBJECT_PROPERTY: &str = "http://www.w3.org/2002/07/owl#ObjectProperty";
pub const OWL_DATA_PROPERTY: &str = "http://www.w3.org/2002/07/owl#DatatypeProperty";
pub const OWL_ANNOTATION_PROPERTY: &str = "http://www.w3.org/2002/07/owl#AnnotationProperty";
pub const OWL_NAMED_INDIVIDUAL: &str = "http://www.w3.org/2002/07/owl#NamedIndividual";
pub const OWL_ON_PROPERTY: &str = "http://www.w3.org/2002/07/owl#onProperty";
pub const OWL_SOME_VALUES_FROM: &str = "http://www.w3.org/2002/07/owl#someValuesFrom";
pub const RDFS_SUBCLASS_OF: &str = "http://www.w3.org/2000/01/rdf-schema#subClassOf";
pub const RDFS_LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Iri(String),
    Blank(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Node(Node),
    Literal {
        value: String,
        lang: Option<String>,
        datatype: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub subject: Node,
    pub predicate: String,
    pub object: Object,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct SinkError(String);

impl From<ImportError> for SinkError {
    fn from(value: ImportError) -> Self {
        SinkError(value.to_string())
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Decode a term from its display form (`<iri>`, `_:b0`, `"lit"@en`,
/// `"lit"^^<dt>`).
fn parse_term(term: &str) -> Result<Object, ImportError> {
    let s = term.trim();
    if let Some(iri) = s.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        return Ok(Object::Node(Node::Iri(iri.to_string())));
    }
    if let Some(id) = s.strip_prefix("_:") {
        return Ok(Object::Node(Node::Blank(id.to_string())));
    }
    if s.starts_with('"') {
        let mut end_quote = None;
        let mut escaped = false;
        for (i, ch) in s.char_indices().skip(1) {
            if ch == '"' && !escaped {
                end_quote = Some(i);
                break;
            }
            escaped = ch == '\\' && !escaped;
        }
        let end = end_quote
            .ok_or_else(|| ImportError::Parse(format!("unterminated literal: {s}")))?;
        let value = unescape(&s[1..end]);
        let rest = s[end + 1..].trim();
        let (lang, datatype) = if let Some(lang) = rest.strip_prefix('@') {
            (Some(lang.to_string()), None)
        } else if let Some(dt) = rest.strip_prefix("^^") {
            let dt = dt.trim();
            let dt = dt
                .strip_prefix('<')
                .and_then(|t| t.strip_suffix('>'))
                .unwrap_or(dt);
            (None, Some(dt.to_string()))
        } else {
            (None, None)
        };
        return Ok(Object::Literal {
            value,
            lang,
            datatype,
        });
    }
    Err(ImportError::Parse(format!("unsupported RDF term: {s}")))
}

fn parse_node(term: &str) -> Result<Node, ImportError> {
    match parse_term(term)? {
        Object::Node(node) => Ok(node),
        Object::Literal { value, .. } => {
            Err(ImportError::Parse(format!("expected node, got literal {value:?}")))
        }
    }
}

fn collect_triple(out: &mut Vec<Triple>, s: &str, p: &str, o: &str) -> Result<(), SinkError> {
    let subject = parse_node(s)?;
    let Node::Iri(predicate) = parse_node(p)? else {
        return Ok(());
    };
    let object = parse_term(o)?;
    out.push(Triple {
        subject,
        predicate,
        object,
    });
    Ok(())
}

/// Parse one document into triples. Each serialization has its own
/// parser type, so the arms stay separate and errors are stringified
/// before they join.
pub fn parse_document(
    content: &str,
    format: RdfSerialization,
) -> Result<Vec<Triple>, ImportError> {
    let reader = std::io::BufReader::new(std::io::Cursor::new(content.as_bytes()));
    let mut out: Vec<Triple> = Vec::new();
    match format {
        RdfSerialization::Turtle => {
            let mut parser = sophia::turtle::parser::turtle::parse_bufread(reader);
            parser
                .try_for_each_triple(|t| -> Result<(), SinkError> {
                    collect_triple(
                        &mut out,
                        &t.s().to_string(),
                        &t.p().to_string(),
                        &t.o().to_string(),
                    )
                })
                .map_err(|e| ImportError::Parse(format!("turtle: {e}")))?;
        }
        RdfSerialization::NTriples => {
            let mut parser = sophia::turtle::parser::nt::parse_bufread(reader);
            parser
                .try_for_each_triple(|t| -> Result<(), SinkError> {
                    collect_triple(
                        &mut out,
                        &t.s().to_string(),
                        &t.p().to_string(),
                        &t.o().to_string(),
                    )
                })
                .map_err(|e| ImportError::Parse(format!("n-triples: {e}")))?;
        }
        RdfSerialization::RdfXml => {
            let mut parser = sophia::xml::parser::parse_bufread(reader);
            parser
                .try_for_each_triple(|t| -> Result<(), SinkError> {
                    collect_triple(
                        &mut out,
                        &t.s().to_string(),
                        &t.p().to_string(),
                        &t.o().to_string(),
                    )
                })
                .map_err(|e| ImportError::Parse(format!("rdf/xml: {e}")))?;
        }
    }
    Ok(out)
}

/// Parse the root document and union in every transitively imported
/// ontology. Unresolvable imports are skipped with a warning.
pub fn load_union_graph(
    root: &str,
    format: RdfSerialization,
    import_mapping: &std::collections::HashMap<String, String>,
    resolver: &dyn ImportResolver,
) -> Result<Vec<Triple>, ImportError> {
    let mut triples = parse_document(root, format)?;
    let mut visited: HashSet<String> = HashSet::new();
    let mut pending: Vec<String> = imports_of(&triples);

    while let Some(iri) = pending.pop() {
        if !visited.insert(iri.clone()) {
            continue;
        }
        let url = import_mapping.get(&iri).cloned().unwrap_or_else(|| iri.clone());
        let content = match resolver.load(&url) {
            Ok(content) => content,
            Err(e) => {
                warn!(%iri, %url, "owl:imports unresolvable, skipped: {e}");
                continue;
            }
        };
        let format = resolver.format_of(&url).unwrap_or(format);
        let imported = parse_document(&content, format)?;
        debug!(%iri, triples = imported.len(), "ontology imported");
        pending.extend(imports_of(&imported));
        triples.extend(imported);
    }
    Ok(triples)
}

fn imports_of(triples: &[Triple]) -> Vec<String> {
    triples
        .iter()
        .filter(|t| t.predicate == OWL_IMPORTS)
        .filter_map(|t| match &t.object {
            Object::Node(Node::Iri(iri)) => Some(iri.clone()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapResolver(HashMap<String, String>);

    impl ImportResolver for MapResolver {
        fn load(&self, url: &str) -> Result<String, ImportError> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| ImportError::Parse(format!("no fixture for {url}")))
        }
    }

    const ROOT: &str = r#"
<http://example.org/onto> <http://www.w3.org/1999/02/22-rdf-syntax-ns#type> <http://www.w3.org/2002/07/owl#Ontology> .
<http://example.org/onto> <http://www.w3.org/2002/07/owl#imports> <http://example.org/base> .
<http://example.org/onto#Thing> <http://www.w3.org/1999/02/22-rdf-syntax-ns#type> <http://www.w3.org/2002/07/owl#Class> .
"#;

    const BASE: &str = r#"
<http://example.org/base#Root> <http://www.w3.org/1999/02/22-rdf-syntax-ns#type> <http://www.w3.org/2002/07/owl#Class> .
<http://example.org/base#Root> <http://www.w3.org/2000/01/rdf-schema#label> "Root"@en .
"#;

    #[test]
    fn parses_ntriples_terms() {
        let triples = parse_document(BASE, RdfSerialization::NTriples).unwrap();
        assert_eq!(triples.len(), 2);
        assert_eq!(
            triples[1].object,
            Object::Literal {
                value: "Root".to_string(),
                lang: Some("en".to_string()),
                datatype: None,
            }
        );
    }

    #[test]
    fn parses_turtle_documents() {
        let doc = r#"@prefix owl: <http://www.w3.org/2002/07/owl#> .
<http://example.org/onto#Thing> a owl:Class ."#;
        let triples = parse_document(doc, RdfSerialization::Turtle).unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].predicate, RDF_TYPE);
        assert_eq!(
            triples[0].object,
            Object::Node(Node::Iri(OWL_CLASS.to_string()))
        );
    }

    #[test]
    fn parses_rdf_xml_documents() {
        let doc = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
         xmlns:owl="http://www.w3.org/2002/07/owl#">
  <owl:Class rdf:about="http://example.org/onto#Thing"/>
</rdf:RDF>"#;
        let triples = parse_document(doc, RdfSerialization::RdfXml).unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(
            triples[0].subject,
            Node::Iri("http://example.org/onto#Thing".to_string())
        );
        assert_eq!(triples[0].predicate, RDF_TYPE);
    }

    #[test]
    fn imports_are_unioned_through_the_mapping() {
        let resolver = MapResolver(HashMap::from([(
            "http://mirror.example/base.nt".to_string(),
            BASE.to_string(),
        )]));
        let mapping = HashMap::from([(
            "http://example.org/base".to_string(),
            "http://mirror.example/base.nt".to_string(),
        )]);
        let triples =
            load_union_graph(ROOT, RdfSerialization::NTriples, &mapping, &resolver).unwrap();
        assert_eq!(triples.len(), 5);
    }

    #[test]
    fn unresolvable_import_is_skipped() {
        let resolver = MapResolver(HashMap::new());
        let triples = load_union_graph(
            ROOT,
            RdfSerialization::NTriples,
            &HashMap::new(),
            &resolver,
        )
        .unwrap();
        // Root triples survive; the import is simply missing.
        assert_eq!(triples.len(), 3);
    }
}
