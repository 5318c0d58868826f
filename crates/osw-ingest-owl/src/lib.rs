//! OWL/RDF ontology import.
//!
//! Takes an RDF document (plus its transitive `owl:imports`), shapes
//! every class, property and named individual into a wiki entity, and
//! writes them through the store engine together with the
//! `MediaWiki:Smw_import_<prefix>` declaration pages SMW needs to
//! recognize the imported vocabulary. A dry run produces the same
//! entities and page texts without touching the wiki.

pub mod graph;
pub mod node;

pub use node::{ContextFetcher, NodeKind, OntologyNode, WikiContextFetcher};

use node::{build_context, build_nodes, deterministic_uuid, shape_node};
use osw_ids::{uuid_to_osw_id, Namespace};
use osw_schema::introspect::pascal_case;
use osw_schema::{Entity, LangText};
use osw_store::{OswClient, StoreError, StoreParam};
use osw_wiki::WikiError;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdfSerialization {
    Turtle,
    NTriples,
    RdfXml,
}

impl RdfSerialization {
    pub fn from_extension(url: &str) -> Option<RdfSerialization> {
        match url.rsplit('.').next() {
            Some("ttl" | "turtle") => Some(RdfSerialization::Turtle),
            Some("nt") => Some(RdfSerialization::NTriples),
            Some("rdf" | "owl" | "xml") => Some(RdfSerialization::RdfXml),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("rdf parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Wiki(#[from] WikiError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves ontology URLs to document text. The default reads the
/// local filesystem; embedders provide their own for live HTTP.
pub trait ImportResolver: Send + Sync {
    fn load(&self, url: &str) -> Result<String, ImportError>;

    fn format_of(&self, url: &str) -> Option<RdfSerialization> {
        RdfSerialization::from_extension(url)
    }
}

#[derive(Debug, Default)]
pub struct FileResolver;

impl ImportResolver for FileResolver {
    fn load(&self, url: &str) -> Result<String, ImportError> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        Ok(std::fs::read_to_string(path)?)
    }
}

/// One vocabulary involved in the import.
#[derive(Debug, Clone)]
pub struct OntologyDescriptor {
    pub iri: String,
    /// URI prefix its terms live under, e.g. `http://ex.org/onto#`.
    pub prefix: String,
    /// Short name used for the SMW import page, e.g. `ex`.
    pub prefix_name: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropertyNaming {
    /// Property pages titled by OSW-ID.
    Uuid,
    /// Titled by pascal-cased label.
    #[default]
    Label,
    /// `<prefix_name><delimiter><label>`.
    PrefixedLabel,
}

#[derive(Debug, Clone)]
pub struct NamingPolicy {
    pub property: PropertyNaming,
    pub delimiter: String,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self {
            property: PropertyNaming::default(),
            delimiter: "-".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParserSettings {
    /// Fields forced to lists.
    pub ensure_array: Vec<String>,
    /// Fields forced to `{text, lang}` records.
    pub ensure_multilang: Vec<String>,
    /// Drop nodes without a label instead of synthesizing one.
    pub remove_unnamed: bool,
    /// Fold `subClassOf` restrictions into `(on_property,
    /// some_values_from)` instead of a `restrictions` key.
    pub flatten_subclassof_restrictions: bool,
    /// Fields whose IRI values are remapped to wiki page titles.
    pub map_uuid_iri: Vec<String>,
}

impl Default for ParserSettings {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            ensure_array: strings(&[
                "label",
                "altLabel",
                "description",
                "subclass_of",
                "subproperty_of",
                "domain",
                "range",
                "on_property",
                "some_values_from",
            ]),
            ensure_multilang: strings(&["label", "altLabel", "description"]),
            remove_unnamed: false,
            flatten_subclassof_restrictions: true,
            map_uuid_iri: strings(&[
                "subclass_of",
                "on_property",
                "some_values_from",
                "all_values_from",
                "domain",
                "range",
                "subproperty_of",
            ]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// File path or URL of the root document, fed to the resolver.
    pub source: String,
    pub format: RdfSerialization,
    pub ontologies: Vec<OntologyDescriptor>,
    /// IRI → resolvable URL for ontologies whose IRI cannot be
    /// dereferenced.
    pub import_mapping: HashMap<String, String>,
    /// Category instantiated for imported classes.
    pub base_class: String,
    pub dump_files: bool,
    pub dump_path: Option<std::path::PathBuf>,
    pub dry_run: bool,
    pub naming: NamingPolicy,
}

/// Everything an import run produced; in a dry run nothing of it has
/// been written.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub entities: Vec<Entity>,
    /// `prefix_name` → SMW import page text.
    pub import_pages: BTreeMap<String, String>,
    pub stored: usize,
    pub failed: usize,
}

pub struct OntologyImporter {
    client: Arc<OswClient>,
    resolver: Box<dyn ImportResolver>,
    context: Box<dyn ContextFetcher>,
    settings: ParserSettings,
}

impl OntologyImporter {
    pub fn new(client: Arc<OswClient>) -> Self {
        let port = Arc::clone(client.port());
        Self {
            client,
            resolver: Box::new(FileResolver),
            context: Box::new(WikiContextFetcher::new(port)),
            settings: ParserSettings::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn ImportResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_context(mut self, context: Box<dyn ContextFetcher>) -> Self {
        self.context = context;
        self
    }

    pub fn with_settings(mut self, settings: ParserSettings) -> Self {
        self.settings = settings;
        self
    }

    pub async fn import(&self, config: &ImportConfig) -> Result<ImportReport, ImportError> {
        let root = self.resolver.load(&config.source)?;
        let triples = graph::load_union_graph(
            &root,
            config.format,
            &config.import_mapping,
            self.resolver.as_ref(),
        )?;
        info!(triples = triples.len(), "union graph loaded");

        let wiki_context = self.context.fetch_context(&config.base_class).await?;
        let context = build_context(&wiki_context);
        let mut nodes = build_nodes(&triples, &context, &self.settings);
        nodes.retain(|n| n.kind != NodeKind::Other);
        nodes.retain_mut(|n| shape_node(n, &self.settings));

        // Pass 1: one wiki page per IRI, last write wins.
        let mut titles: HashMap<String, String> = HashMap::new();
        let mut planned: Vec<(OntologyNode, Uuid, String)> = Vec::new();
        for node in nodes {
            let uuid = deterministic_uuid(&node.iri);
            let title = self.page_title(&node, &uuid, config);
            if let Some(previous) = titles.insert(node.iri.clone(), title.clone()) {
                warn!(iri = %node.iri, %previous, "IRI collision, last write wins");
                planned.retain(|(n, _, _)| n.iri != node.iri);
            }
            planned.push((node, uuid, title));
        }

        // Pass 2: remap IRI-valued fields to the titles we just chose.
        for (node, _, _) in &mut planned {
            for field in &self.settings.map_uuid_iri {
                if let Some(Value::Array(values)) = node.fields.get_mut(field) {
                    for value in values {
                        if let Some(mapped) =
                            value.as_str().and_then(|iri| titles.get(iri))
                        {
                            *value = Value::String(mapped.clone());
                        }
                    }
                }
            }
        }

        let entities: Vec<Entity> = planned
            .iter()
            .map(|(node, uuid, title)| self.to_entity(node, *uuid, title, config))
            .collect::<Result<_, _>>()?;

        let import_pages = build_import_pages(&planned, config);

        if config.dump_files {
            if let Some(dir) = &config.dump_path {
                std::fs::create_dir_all(dir)?;
                std::fs::write(
                    dir.join("entities.json"),
                    serde_json::to_string_pretty(&entities)?,
                )?;
            }
        }

        let mut report = ImportReport {
            entities,
            import_pages,
            ..ImportReport::default()
        };
        if config.dry_run {
            info!(entities = report.entities.len(), "dry run, nothing written");
            return Ok(report);
        }

        let port = self.client.port();
        let token = port.get_token("csrf").await?;
        for (prefix_name, text) in &report.import_pages {
            let title = format!("MediaWiki:Smw_import_{prefix_name}");
            port.edit_main(&title, text, "[bot] update SMW vocabulary import", &token)
                .await?;
        }
        let stored = self
            .client
            .store_entities(
                &report.entities,
                &StoreParam {
                    comment: Some("import ontology".to_string()),
                    ..StoreParam::default()
                },
            )
            .await;
        report.stored = stored.succeeded.len();
        report.failed = stored.failed.len();
        Ok(report)
    }

    fn page_title(&self, node: &OntologyNode, uuid: &Uuid, config: &ImportConfig) -> String {
        let osw = uuid_to_osw_id(uuid);
        match node.kind {
            NodeKind::Class => format!("Category:{osw}"),
            NodeKind::Individual | NodeKind::Other => format!("Item:{osw}"),
            NodeKind::ObjectProperty
            | NodeKind::DataProperty
            | NodeKind::AnnotationProperty => {
                let label = node_label(node);
                let name = match config.naming.property {
                    PropertyNaming::Uuid => osw,
                    PropertyNaming::Label => pascal_case(&label),
                    PropertyNaming::PrefixedLabel => {
                        let prefix = matching_descriptor(&config.ontologies, &node.iri)
                            .map(|d| d.prefix_name.as_str())
                            .unwrap_or("ex");
                        format!("{prefix}{}{}", config.naming.delimiter, pascal_case(&label))
                    }
                };
                format!("Property:{name}")
            }
        }
    }

    fn to_entity(
        &self,
        node: &OntologyNode,
        uuid: Uuid,
        title: &str,
        config: &ImportConfig,
    ) -> Result<Entity, ImportError> {
        let type_title = match node.kind {
            NodeKind::Class => config.base_class.clone(),
            NodeKind::ObjectProperty => "Category:ObjectProperty".to_string(),
            NodeKind::DataProperty => "Category:DataProperty".to_string(),
            NodeKind::AnnotationProperty => "Category:AnnotationProperty".to_string(),
            NodeKind::Individual | NodeKind::Other => "Category:OwlIndividual".to_string(),
        };
        let label: Vec<LangText> = node
            .fields
            .get("label")
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()?
            .unwrap_or_default();
        let description: Vec<LangText> = node
            .fields
            .get("description")
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()?
            .unwrap_or_default();

        let namespace = Namespace::from_name(title.split(':').next().unwrap_or(""));
        let mut data = node.fields.clone();
        data.remove("label");
        data.remove("description");
        data.insert("iri".to_string(), json!(node.iri));
        data.insert("rdf_type".to_string(), json!(node.types));
        data.insert(
            "meta".to_string(),
            json!({"wiki_page": {"namespace": namespace.canonical_name(), "title": title}}),
        );

        Ok(Entity {
            uuid,
            types: vec![type_title],
            name: Some(pascal_case(&node_label(node))),
            label,
            description,
            data,
        })
    }
}

fn node_label(node: &OntologyNode) -> String {
    node.fields
        .get("label")
        .and_then(|v| v.get(0))
        .and_then(|v| v.get("text"))
        .and_then(Value::as_str)
        .unwrap_or_else(|| node.iri.rsplit(['#', '/']).next().unwrap_or(&node.iri))
        .to_string()
}

fn matching_descriptor<'a>(
    ontologies: &'a [OntologyDescriptor],
    iri: &str,
) -> Option<&'a OntologyDescriptor> {
    ontologies
        .iter()
        .filter(|d| iri.starts_with(&normalize(&d.prefix)) || iri.starts_with(&normalize(&d.iri)))
        .max_by_key(|d| d.prefix.len())
}

fn normalize(iri: &str) -> String {
    iri.replacen("://www.", "://", 1)
}

fn smw_type(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Class => "Category",
        NodeKind::ObjectProperty => "Type:Page",
        NodeKind::DataProperty | NodeKind::AnnotationProperty => "Type:Text",
        NodeKind::Individual | NodeKind::Other => "Item",
    }
}

/// `MediaWiki:Smw_import_<prefix_name>` texts: `prefix | [link name]`
/// then one ` <local>|<smw_type>` line per term. The OBO namespace is
/// split by the prefix of its local names.
fn build_import_pages(
    planned: &[(OntologyNode, Uuid, String)],
    config: &ImportConfig,
) -> BTreeMap<String, String> {
    struct Group {
        uri: String,
        link: String,
        lines: Vec<String>,
    }
    let mut groups: BTreeMap<String, Group> = BTreeMap::new();

    for (node, _, _) in planned {
        let Some(descriptor) = matching_descriptor(&config.ontologies, &node.iri) else {
            warn!(iri = %node.iri, "no ontology descriptor matches, left out of SMW import");
            continue;
        };
        let prefix = normalize(&descriptor.prefix);
        let local = node
            .iri
            .strip_prefix(&prefix)
            .unwrap_or_else(|| node.iri.rsplit(['#', '/']).next().unwrap_or(&node.iri));

        let obo = prefix.contains("obolibrary.org/obo");
        let (key, uri, local) = if obo {
            match local.split_once('_') {
                Some((sub, rest)) => (
                    sub.to_ascii_lowercase(),
                    format!("{prefix}{sub}_"),
                    rest.to_string(),
                ),
                None => (
                    descriptor.prefix_name.clone(),
                    prefix.clone(),
                    local.to_string(),
                ),
            }
        } else {
            (
                descriptor.prefix_name.clone(),
                prefix.clone(),
                local.to_string(),
            )
        };

        let group = groups.entry(key.clone()).or_insert_with(|| Group {
            uri,
            link: descriptor
                .link
                .clone()
                .unwrap_or_else(|| descriptor.iri.clone()),
            lines: Vec::new(),
        });
        group
            .lines
            .push(format!(" {local}|{}", smw_type(node.kind)));
    }

    groups
        .into_iter()
        .map(|(key, group)| {
            let mut text = format!("{}|[{} {key}]\n", group.uri, group.link);
            for line in &group.lines {
                text.push_str(line);
                text.push('\n');
            }
            (key, text)
        })
        .collect()
}
