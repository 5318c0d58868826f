//! Page Exchange bundles.
//!
//! A bundle is `package.json` plus one file per page slot laid out as
//! `<namespace>/<name>.slot_<slot>.<ext>` with `<ext>` one of
//! `wikitext`, `json`, `lua`. The `main` slot may drop the
//! `.slot_main` infix on request, matching what the Page Exchange
//! extension serves.

use crate::StoreError;
use osw_ids::Namespace;
use osw_wiki::{ContentModel, WikiPort, slots};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use walkdir::WalkDir;

pub const BUNDLE_FILE: &str = "package.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PagePackageBundle {
    pub publisher: String,
    #[serde(rename = "publisherURL", default, skip_serializing_if = "Option::is_none")]
    pub publisher_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(rename = "licenseName", default, skip_serializing_if = "Option::is_none")]
    pub license_name: Option<String>,
    pub packages: BTreeMap<String, PagePackage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PagePackage {
    #[serde(rename = "globalID")]
    pub global_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(
        rename = "requiredExtensions",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub required_extensions: Vec<String>,
    #[serde(
        rename = "requiredPackages",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub required_packages: Vec<String>,
    #[serde(rename = "baseURL", default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub pages: Vec<PackagePage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackagePage {
    pub name: String,
    /// Symbolic namespace code, e.g. `NS_CATEGORY`.
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "urlPath", default, skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,
    #[serde(rename = "fileURL", default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(rename = "fileURLPath", default, skip_serializing_if = "Option::is_none")]
    pub file_url_path: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub slots: BTreeMap<String, PackageSlot>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageSlot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "urlPath", default, skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,
}

/// Slot texts of one page, the filesystem side of a bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct PageContent {
    pub name: String,
    pub namespace: Namespace,
    pub slots: BTreeMap<String, String>,
}

impl PageContent {
    pub fn full_title(&self) -> String {
        let ns = self.namespace.canonical_name();
        if ns.is_empty() {
            self.name.clone()
        } else {
            format!("{ns}:{}", self.name)
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PackageLayout {
    /// Store the `main` slot as `<name>.<ext>` without the infix.
    pub skip_slot_suffix_for_main: bool,
}

fn namespace_dir(namespace: &Namespace) -> String {
    let name = namespace.canonical_name();
    if name.is_empty() {
        "Main".to_string()
    } else {
        name.to_string()
    }
}

fn slot_extension(namespace: &Namespace, slot: &str) -> &'static str {
    match slot {
        slots::JSONDATA | slots::JSONSCHEMA => "json",
        slots::MAIN if *namespace == Namespace::Module => "lua",
        _ => "wikitext",
    }
}

fn slot_content_model(namespace: &Namespace, slot: &str) -> ContentModel {
    match slot {
        slots::JSONDATA | slots::JSONSCHEMA => ContentModel::Json,
        slots::MAIN if *namespace == Namespace::Module => ContentModel::Scribunto,
        _ => ContentModel::Wikitext,
    }
}

fn slot_file_name(name: &str, slot: &str, ext: &str, layout: &PackageLayout) -> String {
    if slot == slots::MAIN && layout.skip_slot_suffix_for_main {
        format!("{name}.{ext}")
    } else {
        format!("{name}.slot_{slot}.{ext}")
    }
}

/// Write `package.json` and one file per slot under `dir`.
pub fn write_package(
    bundle: &PagePackageBundle,
    contents: &[PageContent],
    dir: &Path,
    layout: &PackageLayout,
) -> Result<(), StoreError> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(
        dir.join(BUNDLE_FILE),
        serde_json::to_string_pretty(bundle)?,
    )?;
    for content in contents {
        let ns_dir = dir.join(namespace_dir(&content.namespace));
        std::fs::create_dir_all(&ns_dir)?;
        for (slot, text) in &content.slots {
            let ext = slot_extension(&content.namespace, slot);
            let file = slot_file_name(&content.name, slot, ext, layout);
            std::fs::write(ns_dir.join(file), text)?;
        }
    }
    Ok(())
}

/// Read a bundle directory back into the model plus slot contents.
/// Files that don't follow the layout are rejected.
pub fn read_package(dir: &Path) -> Result<(PagePackageBundle, Vec<PageContent>), StoreError> {
    let bundle: PagePackageBundle =
        serde_json::from_str(&std::fs::read_to_string(dir.join(BUNDLE_FILE))?)?;

    let mut pages: BTreeMap<(String, String), PageContent> = BTreeMap::new();
    for entry in WalkDir::new(dir).min_depth(2) {
        let entry = entry.map_err(|e| StoreError::BadPackage(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| StoreError::BadPackage(e.to_string()))?;
        let mut components = relative.components();
        let ns_folder = components
            .next()
            .and_then(|c| c.as_os_str().to_str())
            .ok_or_else(|| StoreError::BadPackage(format!("bad path {relative:?}")))?
            .to_string();
        let file_name = entry
            .file_name()
            .to_str()
            .ok_or_else(|| StoreError::BadPackage(format!("non-utf8 file name in {ns_folder}")))?;

        let (name, slot) = parse_slot_file(file_name)
            .ok_or_else(|| StoreError::BadPackage(format!("unrecognized file {file_name}")))?;
        let namespace = if ns_folder == "Main" {
            Namespace::Main
        } else {
            Namespace::from_name(&ns_folder)
        };
        let text = std::fs::read_to_string(entry.path())?;
        pages
            .entry((ns_folder, name.clone()))
            .or_insert_with(|| PageContent {
                name,
                namespace,
                slots: BTreeMap::new(),
            })
            .slots
            .insert(slot, text);
    }
    Ok((bundle, pages.into_values().collect()))
}

/// `<name>.slot_<slot>.<ext>` or `<name>.<ext>` (main).
fn parse_slot_file(file_name: &str) -> Option<(String, String)> {
    if let Some(pos) = file_name.find(".slot_") {
        let name = &file_name[..pos];
        let rest = &file_name[pos + ".slot_".len()..];
        let (slot, ext) = rest.rsplit_once('.')?;
        if !matches!(ext, "wikitext" | "json" | "lua") || name.is_empty() || slot.is_empty() {
            return None;
        }
        return Some((name.to_string(), slot.to_string()));
    }
    let (name, ext) = file_name.rsplit_once('.')?;
    if !matches!(ext, "wikitext" | "json" | "lua") || name.is_empty() {
        return None;
    }
    Some((name.to_string(), slots::MAIN.to_string()))
}

/// Write every page of a bundle through the port. Returns the number
/// of pages written.
pub async fn install(
    port: &Arc<dyn WikiPort>,
    contents: &[PageContent],
    comment: &str,
) -> Result<usize, StoreError> {
    let token = port.get_token("csrf").await?;
    for content in contents {
        let title = content.full_title();
        for (slot, text) in &content.slots {
            if slot == slots::MAIN {
                port.edit_main(&title, text, comment, &token).await?;
            } else {
                let model = slot_content_model(&content.namespace, slot);
                port.edit_slot(&title, slot, text, model, comment, &token)
                    .await?;
            }
        }
        info!(%title, slots = content.slots.len(), "package page installed");
    }
    Ok(contents.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use osw_wiki::MockWiki;
    use serde_json::json;

    fn sample_bundle() -> PagePackageBundle {
        PagePackageBundle {
            publisher: "example.org".to_string(),
            packages: BTreeMap::from([(
                "world".to_string(),
                PagePackage {
                    global_id: "org.example.world".to_string(),
                    label: Some("World".to_string()),
                    ..PagePackage::default()
                },
            )]),
            ..PagePackageBundle::default()
        }
    }

    fn sample_contents() -> Vec<PageContent> {
        vec![
            PageContent {
                name: "OSWitem0000000000000000000000000000".to_string(),
                namespace: Namespace::Item,
                slots: BTreeMap::from([
                    ("main".to_string(), "Hello".to_string()),
                    ("jsondata".to_string(), "{\"name\":\"x\"}".to_string()),
                ]),
            },
            PageContent {
                name: "Entity".to_string(),
                namespace: Namespace::Module,
                slots: BTreeMap::from([("main".to_string(), "return {}".to_string())]),
            },
        ]
    }

    #[test]
    fn bundle_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = sample_bundle();
        let contents = sample_contents();
        write_package(&bundle, &contents, dir.path(), &PackageLayout::default()).unwrap();

        assert!(dir
            .path()
            .join("Item/OSWitem0000000000000000000000000000.slot_jsondata.json")
            .exists());
        assert!(dir.path().join("Module/Entity.slot_main.lua").exists());

        let (read_bundle, read_contents) = read_package(dir.path()).unwrap();
        assert_eq!(read_bundle.packages["world"].global_id, "org.example.world");
        let mut expected = contents;
        expected.sort_by(|a, b| a.name.cmp(&b.name));
        let mut actual = read_contents;
        actual.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(actual, expected);
    }

    #[test]
    fn main_slot_can_drop_its_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PackageLayout {
            skip_slot_suffix_for_main: true,
        };
        write_package(&sample_bundle(), &sample_contents(), dir.path(), &layout).unwrap();
        assert!(dir
            .path()
            .join("Item/OSWitem0000000000000000000000000000.wikitext")
            .exists());

        let (_, contents) = read_package(dir.path()).unwrap();
        let item = contents.iter().find(|c| c.namespace == Namespace::Item).unwrap();
        assert_eq!(item.slots["main"], "Hello");
    }

    #[test]
    fn unrecognized_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_package(
            &sample_bundle(),
            &[],
            dir.path(),
            &PackageLayout::default(),
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("Item")).unwrap();
        std::fs::write(dir.path().join("Item/readme.txt"), "nope").unwrap();
        let err = read_package(dir.path()).unwrap_err();
        assert!(matches!(err, StoreError::BadPackage(_)));
    }

    #[tokio::test]
    async fn install_writes_pages_through_the_port() {
        let wiki = Arc::new(MockWiki::new());
        let port: Arc<dyn WikiPort> = Arc::clone(&wiki) as Arc<dyn WikiPort>;
        let written = install(&port, &sample_contents(), "[bot] install package")
            .await
            .unwrap();
        assert_eq!(written, 2);
        let page = wiki
            .read_page("Item:OSWitem0000000000000000000000000000")
            .await
            .unwrap();
        assert_eq!(
            page.slots[slots::JSONDATA].payload.as_json(),
            Some(&json!({"name": "x"}))
        );
        assert!(wiki.page_exists("Module:Entity"));
    }
}
