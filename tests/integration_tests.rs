//! Integration tests for the complete toolkit pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Wikitext codec → page handles → store engine
//! - Schema resolver → class registry → load engine
//! - Ontology import → entity batch store
//!
//! Run with: cargo test --test integration_tests

use std::collections::HashMap;
use std::sync::Arc;

use osw_ids::{osw_id_to_uuid, parse_full_page_title, uuid_to_osw_id, Namespace};
use osw_schema::{ClassRegistry, Entity, FetchMode, LangText, SchemaResolver};
use osw_store::{apply, LoadParam, OswClient, OverwritePolicy, StoreParam};
use osw_wiki::{slots, MockWiki, WikiPort};
use osw_wikitext::{parse, serialize, ArrayMode};
use serde_json::json;
use tempfile::tempdir;

fn mock_client(wiki: &Arc<MockWiki>) -> (Arc<OswClient>, Arc<ClassRegistry>) {
    let registry = Arc::new(ClassRegistry::new());
    let client = Arc::new(OswClient::new(
        Arc::clone(wiki) as Arc<dyn WikiPort>,
        Arc::clone(&registry),
    ));
    (client, registry)
}

async fn seed_item_schema(wiki: &Arc<MockWiki>, registry: &Arc<ClassRegistry>) {
    wiki.seed_json_slot(
        "Category:Item",
        slots::JSONSCHEMA,
        json!({
            "title": "Item",
            "properties": {
                "label": {"type": "array", "items": {"type": "object"}},
                "name": {"type": "string"},
                "statements": {"type": "array", "items": {"type": "object"}}
            }
        }),
    );
    let dir = tempdir().unwrap();
    let resolver = SchemaResolver::new(
        Arc::clone(wiki) as Arc<dyn WikiPort>,
        Arc::clone(registry),
        dir.path(),
    );
    resolver
        .fetch_schemas(&["Category:Item".to_string()], FetchMode::Replace)
        .await
        .unwrap();
}

// ============================================================================
// Identifier and wikitext invariants
// ============================================================================

#[test]
fn test_osw_id_round_trip_through_title() {
    let uuid = uuid::Uuid::new_v4();
    let osw_id = uuid_to_osw_id(&uuid);
    assert_eq!(osw_id_to_uuid(&osw_id).unwrap(), uuid);

    let entity = Entity {
        uuid,
        types: vec![],
        label: vec![],
        name: None,
        description: vec![],
        data: serde_json::Map::new(),
    };
    let title = entity.title_in(&Namespace::Item);
    let parts = parse_full_page_title(&title).unwrap();
    assert_eq!(parts.id_body, osw_id[3..]);
}

#[test]
fn test_one_parameter_template_round_trips() {
    let input = "{{T|a=1}}";
    let nodes = parse(input, ArrayMode::Force).unwrap();
    let as_json = osw_wikitext::to_json(&nodes);
    assert_eq!(as_json, json!([{"T": {"a": ["1"]}}]));

    let reparsed = parse(&serialize(&nodes), ArrayMode::Force).unwrap();
    assert_eq!(osw_wikitext::to_json(&reparsed), as_json);
}

// ============================================================================
// Store-then-load
// ============================================================================

#[tokio::test]
async fn test_store_then_load_by_canonical_title() {
    let wiki = Arc::new(MockWiki::new());
    let (client, registry) = mock_client(&wiki);
    seed_item_schema(&wiki, &registry).await;

    let entity = Entity::new(vec!["Category:Item".to_string()])
        .with_label(LangText::new("MyItem"));
    let stored = client
        .store_entities(std::slice::from_ref(&entity), &StoreParam::default())
        .await;
    assert!(stored.is_complete());
    let title = stored.succeeded[0].clone();
    assert!(title.starts_with("Item:OSW"));

    let loaded = client
        .load_entities(&[title.clone()], &LoadParam::default())
        .await;
    assert!(loaded.is_complete());
    let instance = &loaded.succeeded[0];
    assert_eq!(instance.label[0].text, "MyItem");
    assert_eq!(osw_ids::title_to_uuid(&title).unwrap(), instance.uuid);
}

#[tokio::test]
async fn test_unknown_type_fails_instead_of_downcasting() {
    let wiki = Arc::new(MockWiki::new());
    let (client, registry) = mock_client(&wiki);
    seed_item_schema(&wiki, &registry).await;

    let entity = Entity::new(vec!["Category:NeverFetched".to_string()]);
    let title = entity.title_in(&Namespace::Item);
    wiki.seed_json_slot(&title, slots::JSONDATA, entity.to_jsondata().unwrap());

    let loaded = client.load_entities(&[title], &LoadParam::default()).await;
    assert!(loaded.succeeded.is_empty());
    assert!(loaded.failed[0].1.to_string().contains("NeverFetched"));
}

#[tokio::test]
async fn test_partially_unknown_type_fails_instead_of_downcasting() {
    let wiki = Arc::new(MockWiki::new());
    let (client, registry) = mock_client(&wiki);
    seed_item_schema(&wiki, &registry).await;

    // One fetched category plus one the resolver never saw: the load
    // must fail rather than quietly shed the unknown type and its
    // fields.
    let entity = Entity::new(vec![
        "Category:Item".to_string(),
        "Category:NeverFetched".to_string(),
    ]);
    let title = entity.title_in(&Namespace::Item);
    wiki.seed_json_slot(&title, slots::JSONDATA, entity.to_jsondata().unwrap());

    let loaded = client.load_entities(&[title], &LoadParam::default()).await;
    assert!(loaded.succeeded.is_empty());
    let err = loaded.failed[0].1.to_string();
    assert!(err.contains("Category:NeverFetched"));
    assert!(!err.contains("Category:Item"));
}

// ============================================================================
// Overwrite policies (worked example)
// ============================================================================

fn remote_fixture() -> serde_json::Value {
    json!({
        "label": [{"text": "A", "lang": "en"}],
        "name": "A",
        "iri": "",
        "description": [],
        "image": "File:X.png"
    })
}

fn local_fixture() -> serde_json::Value {
    json!({
        "label": [{"text": "B", "lang": "en"}],
        "name": "B",
        "iri": "http://b",
        "description": [{"text": "d", "lang": "en"}],
        "attachments": ["File:Y.pdf"]
    })
}

#[test]
fn test_policy_local_wins() {
    let merged = apply(&remote_fixture(), &local_fixture(), OverwritePolicy::LocalWins);
    assert_eq!(merged["label"][0]["text"], "B");
    assert_eq!(merged["name"], "B");
    assert_eq!(merged["iri"], "http://b");
    assert_eq!(merged["description"][0]["text"], "d");
    assert_eq!(merged["image"], "File:X.png");
    assert_eq!(merged["attachments"], json!(["File:Y.pdf"]));
}

#[test]
fn test_policy_remote_wins_keeps_empty_remote_fields() {
    let merged = apply(&remote_fixture(), &local_fixture(), OverwritePolicy::RemoteWins);
    assert_eq!(merged["label"][0]["text"], "A");
    assert_eq!(merged["name"], "A");
    assert_eq!(merged["iri"], "");
    assert_eq!(merged["description"], json!([]));
    assert_eq!(merged["image"], "File:X.png");
    assert_eq!(merged["attachments"], json!(["File:Y.pdf"]));
}

#[test]
fn test_policy_fill_empty() {
    let merged = apply(&remote_fixture(), &local_fixture(), OverwritePolicy::FillEmpty);
    assert_eq!(merged["label"][0]["text"], "A");
    assert_eq!(merged["name"], "A");
    assert_eq!(merged["iri"], "http://b");
    assert_eq!(merged["description"][0]["text"], "d");
    assert_eq!(merged["image"], "File:X.png");
    assert_eq!(merged["attachments"], json!(["File:Y.pdf"]));
}

#[test]
fn test_policy_replace_remote_drops_remote_only_fields() {
    let merged = apply(
        &remote_fixture(),
        &local_fixture(),
        OverwritePolicy::ReplaceRemote,
    );
    assert!(merged.get("image").is_none());
    assert_eq!(merged, local_fixture());
}

#[test]
fn test_policy_keep_existing_drops_local_only_fields() {
    let merged = apply(
        &remote_fixture(),
        &local_fixture(),
        OverwritePolicy::KeepExisting,
    );
    assert!(merged.get("attachments").is_none());
    assert_eq!(merged, remote_fixture());
}

// ============================================================================
// Statement search round-trip
// ============================================================================

#[tokio::test]
async fn test_statement_search_round_trip() {
    let wiki = Arc::new(MockWiki::new());
    let (client, registry) = mock_client(&wiki);
    seed_item_schema(&wiki, &registry).await;

    let entity = Entity::new(vec!["Category:Item".to_string()]).with_field(
        "statements",
        json!([{"property": "Property:TestProperty", "value": "TestValue"}]),
    );
    let stored = client
        .store_entities(std::slice::from_ref(&entity), &StoreParam::default())
        .await;
    assert!(stored.is_complete());
    let title = stored.succeeded[0].clone();

    let hits = wiki
        .search_semantic("[[TestProperty::TestValue]]", 10)
        .await
        .unwrap();
    assert_eq!(hits, vec![title.clone()]);

    client.delete_entity(&entity, "[bot] cleanup").await.unwrap();
    assert!(!wiki.page_exists(&title));
}

// ============================================================================
// Fetch-schema append
// ============================================================================

#[tokio::test]
async fn test_fetch_schema_append_grows_the_registry() {
    let wiki = Arc::new(MockWiki::new());
    wiki.seed_json_slot(
        "Category:Item",
        slots::JSONSCHEMA,
        json!({"title": "Item", "properties": {"name": {"type": "string"}}}),
    );
    wiki.seed_json_slot(
        "Category:SomeSubclass",
        slots::JSONSCHEMA,
        json!({
            "title": "SomeSubclass",
            "allOf": [{"$ref": "/wiki/Category:Item?action=raw&slot=jsonschema"}],
            "properties": {"extra": {"type": "integer"}}
        }),
    );
    let registry = Arc::new(ClassRegistry::new());
    let dir = tempdir().unwrap();
    let resolver = SchemaResolver::new(
        Arc::clone(&wiki) as Arc<dyn WikiPort>,
        Arc::clone(&registry),
        dir.path(),
    );

    resolver
        .fetch_schemas(&["Category:Item".to_string()], FetchMode::Replace)
        .await
        .unwrap();
    assert_eq!(registry.snapshot().class_names(), vec!["Item"]);

    resolver
        .fetch_schemas(&["Category:SomeSubclass".to_string()], FetchMode::Append)
        .await
        .unwrap();
    let snapshot = registry.snapshot();
    assert_eq!(snapshot.class_names(), vec!["Item", "SomeSubclass"]);
    let subclass = snapshot.by_name("SomeSubclass").unwrap();
    assert_eq!(subclass.parents, vec!["Category:Item"]);
    // Inherited property folded in next to its own.
    assert!(subclass.properties.contains_key("name"));
    assert!(subclass.properties.contains_key("extra"));
}

// ============================================================================
// Ontology import with mapped owl:imports
// ============================================================================

const IMPORT_ROOT: &str = r#"
<http://example.org/root> <http://www.w3.org/1999/02/22-rdf-syntax-ns#type> <http://www.w3.org/2002/07/owl#Ontology> .
<http://example.org/root> <http://www.w3.org/2002/07/owl#imports> <http://example.org/unreachable> .
<http://example.org/root#Alpha> <http://www.w3.org/1999/02/22-rdf-syntax-ns#type> <http://www.w3.org/2002/07/owl#Class> .
<http://example.org/root#Alpha> <http://www.w3.org/2000/01/rdf-schema#label> "Alpha"@en .
"#;

const IMPORTED: &str = r#"
<http://example.org/unreachable#Beta> <http://www.w3.org/1999/02/22-rdf-syntax-ns#type> <http://www.w3.org/2002/07/owl#Class> .
<http://example.org/unreachable#Beta> <http://www.w3.org/2000/01/rdf-schema#label> "Beta"@en .
"#;

struct FixtureResolver;

impl osw_ingest_owl::ImportResolver for FixtureResolver {
    fn load(&self, url: &str) -> Result<String, osw_ingest_owl::ImportError> {
        match url {
            "inline://root.nt" => Ok(IMPORT_ROOT.to_string()),
            "http://mirror.example/unreachable.nt" => Ok(IMPORTED.to_string()),
            other => Err(osw_ingest_owl::ImportError::Parse(format!(
                "no fixture for {other}"
            ))),
        }
    }

    fn format_of(&self, _url: &str) -> Option<osw_ingest_owl::RdfSerialization> {
        Some(osw_ingest_owl::RdfSerialization::NTriples)
    }
}

fn import_config(dry_run: bool) -> osw_ingest_owl::ImportConfig {
    osw_ingest_owl::ImportConfig {
        source: "inline://root.nt".to_string(),
        format: osw_ingest_owl::RdfSerialization::NTriples,
        ontologies: vec![
            osw_ingest_owl::OntologyDescriptor {
                iri: "http://example.org/root".to_string(),
                prefix: "http://example.org/root#".to_string(),
                prefix_name: "root".to_string(),
                link: None,
            },
            osw_ingest_owl::OntologyDescriptor {
                iri: "http://example.org/unreachable".to_string(),
                prefix: "http://example.org/unreachable#".to_string(),
                prefix_name: "unreachable".to_string(),
                link: None,
            },
        ],
        import_mapping: HashMap::from([(
            "http://example.org/unreachable".to_string(),
            "http://mirror.example/unreachable.nt".to_string(),
        )]),
        base_class: "Category:OwlClass".to_string(),
        dump_files: false,
        dump_path: None,
        dry_run,
        naming: osw_ingest_owl::NamingPolicy::default(),
    }
}

#[tokio::test]
async fn test_ontology_import_unions_mapped_imports() {
    let wiki = Arc::new(MockWiki::new());
    let (client, _) = mock_client(&wiki);
    let importer =
        osw_ingest_owl::OntologyImporter::new(client).with_resolver(Box::new(FixtureResolver));

    let report = importer.import(&import_config(true)).await.unwrap();
    let names: Vec<_> = report
        .entities
        .iter()
        .filter_map(|e| e.name.as_deref())
        .collect();
    assert_eq!(names, vec!["Alpha", "Beta"]);
    assert!(report
        .entities
        .iter()
        .all(|e| e.types == vec!["Category:OwlClass".to_string()]));
    // Dry run: nothing written.
    assert_eq!(wiki.edit_count(), 0);
    assert!(wiki.titles().is_empty());

    let report = importer.import(&import_config(false)).await.unwrap();
    assert_eq!(report.stored, 2);
    for entity in &report.entities {
        assert!(wiki.page_exists(&format!("Category:{}", entity.osw_id())));
    }
    assert!(wiki.page_exists("MediaWiki:Smw_import_root"));
    assert!(wiki.page_exists("MediaWiki:Smw_import_unreachable"));
}
