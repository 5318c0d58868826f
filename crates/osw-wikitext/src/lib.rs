//! Wikitext ↔ flat content structure.
//!
//! Every template-level edit in the toolkit goes through one canonical
//! shape: an ordered sequence of free-text spans and template records
//! (the "flat content structure"). This crate owns the bidirectional
//! conversion:
//!
//! - `parse` — wikitext into the flat structure, with configurable
//!   list splitting on the `;` delimiter,
//! - `serialize` — the flat structure back into wikitext,
//! - `update_template` — parameter-level merge of a new template into
//!   existing wikitext,
//! - `path` — value paths (`Template.param[0]`) for targeted reads and
//!   writes inside the structure.
//!
//! Invariant: `serialize(parse(w, Force))` equals `w` up to whitespace
//! inside template bodies, for every `w` with balanced templates.

pub mod path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum WikitextError {
    #[error("unbalanced template braces near: {0}")]
    UnbalancedTemplate(String),
    #[error("invalid value path: {0}")]
    InvalidPath(String),
    #[error("path expects a template object, got: {0}")]
    NotATemplate(String),
}

// ============================================================================
// Flat content structure
// ============================================================================

/// One element of the flat content structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContentNode {
    Text(String),
    Template(TemplateNode),
}

/// A template record. Parameter order is significant and preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateNode {
    pub name: String,
    pub params: Vec<(String, ParamValue)>,
}

impl TemplateNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.params.push((key.into(), value));
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut ParamValue> {
        self.params
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn set(&mut self, key: &str, value: ParamValue) {
        match self.get_mut(key) {
            Some(slot) => *slot = value,
            None => self.params.push((key.to_string(), value)),
        }
    }
}

/// A parameter value: a single string, or an ordered list of strings
/// and nested template records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Scalar(String),
    List(Vec<ParamItem>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamItem {
    Text(String),
    Template(TemplateNode),
}

/// How raw parameter values are split into lists on the `;` delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayMode {
    /// Every text value becomes a list, even singletons.
    Force,
    /// A list only when splitting yields more than one element.
    OnlyMultiple,
    /// A list whenever the delimiter occurs in the raw value.
    DelimiterPresent,
}

pub const LIST_DELIMITER: char = ';';

// ============================================================================
// Parsing
// ============================================================================

/// Index of the `}}` closing the `{{` at `open`, by depth counting.
fn find_matching(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = open;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'}' && bytes[i + 1] == b'}' {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    None
}

/// Split `text` on `delim` at template depth zero.
fn split_top_level(text: &str, delim: char) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        if i + 1 < bytes.len() && bytes[i] == b'{' && bytes[i + 1] == b'{' {
            depth += 1;
            i += 2;
        } else if i + 1 < bytes.len() && bytes[i] == b'}' && bytes[i + 1] == b'}' {
            depth = depth.saturating_sub(1);
            i += 2;
        } else if depth == 0 && text[i..].starts_with(delim) {
            parts.push(&text[start..i]);
            i += delim.len_utf8();
            start = i;
        } else {
            // advance one char (not one byte)
            let ch = text[i..].chars().next().unwrap();
            i += ch.len_utf8();
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Parse wikitext into the flat content structure.
///
/// Free text between templates is preserved verbatim; only the leading
/// and trailing whitespace of the entire input is trimmed.
pub fn parse(wikitext: &str, mode: ArrayMode) -> Result<Vec<ContentNode>, WikitextError> {
    let mut nodes = parse_nodes(wikitext, mode)?;
    // Trim whitespace only at the outer edges of the whole text.
    if let Some(ContentNode::Text(t)) = nodes.first_mut() {
        *t = t.trim_start().to_string();
    }
    if let Some(ContentNode::Text(t)) = nodes.last_mut() {
        *t = t.trim_end().to_string();
    }
    nodes.retain(|n| !matches!(n, ContentNode::Text(t) if t.is_empty()));
    Ok(nodes)
}

fn parse_nodes(text: &str, mode: ArrayMode) -> Result<Vec<ContentNode>, WikitextError> {
    let bytes = text.as_bytes();
    let mut nodes = Vec::new();
    let mut span_start = 0usize;
    let mut i = 0usize;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'{' {
            let close = find_matching(text, i).ok_or_else(|| {
                WikitextError::UnbalancedTemplate(text[i..].chars().take(40).collect())
            })?;
            if span_start < i {
                nodes.push(ContentNode::Text(text[span_start..i].to_string()));
            }
            let body = &text[i + 2..close];
            nodes.push(ContentNode::Template(parse_template_body(body, mode)?));
            i = close + 2;
            span_start = i;
        } else {
            i += 1;
        }
    }
    if span_start < text.len() {
        nodes.push(ContentNode::Text(text[span_start..].to_string()));
    }
    Ok(nodes)
}

fn parse_template_body(body: &str, mode: ArrayMode) -> Result<TemplateNode, WikitextError> {
    let segments = split_top_level(body, '|');
    let mut segments = segments.into_iter();
    let name = segments.next().unwrap_or("").trim().to_string();
    let mut template = TemplateNode::new(name);
    let mut positional = 0usize;
    for segment in segments {
        let (key, raw) = match segment.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), v),
            None => {
                // MediaWiki numbers unnamed parameters from 1.
                positional += 1;
                (positional.to_string(), segment)
            }
        };
        let value = parse_param_value(raw, mode)?;
        template.params.push((key, value));
    }
    Ok(template)
}

fn parse_param_value(raw: &str, mode: ArrayMode) -> Result<ParamValue, WikitextError> {
    let trimmed = raw.trim();
    if trimmed.contains("{{") {
        // Nested flat content structure: templates plus any interleaved text.
        let mut items = Vec::new();
        for node in parse_nodes(trimmed, mode)? {
            match node {
                ContentNode::Template(t) => items.push(ParamItem::Template(t)),
                ContentNode::Text(t) => {
                    for part in split_top_level(&t, LIST_DELIMITER) {
                        let part = part.trim();
                        if !part.is_empty() {
                            items.push(ParamItem::Text(part.to_string()));
                        }
                    }
                }
            }
        }
        return Ok(ParamValue::List(items));
    }

    let has_delim = split_top_level(trimmed, LIST_DELIMITER).len() > 1
        || trimmed.contains(LIST_DELIMITER);
    let parts: Vec<String> = split_top_level(trimmed, LIST_DELIMITER)
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    let as_list = match mode {
        ArrayMode::Force => true,
        ArrayMode::OnlyMultiple => parts.len() > 1,
        ArrayMode::DelimiterPresent => has_delim,
    };
    if as_list {
        Ok(ParamValue::List(
            parts.into_iter().map(ParamItem::Text).collect(),
        ))
    } else {
        Ok(ParamValue::Scalar(
            parts.into_iter().next().unwrap_or_default(),
        ))
    }
}

// ============================================================================
// Serialization
// ============================================================================

/// Serialize the flat content structure back into wikitext.
pub fn serialize(nodes: &[ContentNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            ContentNode::Text(t) => out.push_str(t),
            ContentNode::Template(t) => serialize_template(t, &mut out),
        }
    }
    out
}

fn serialize_template(template: &TemplateNode, out: &mut String) {
    out.push_str("{{");
    out.push_str(&template.name);
    out.push('\n');
    for (key, value) in &template.params {
        out.push('|');
        out.push_str(key);
        out.push('=');
        serialize_param_value(key, value, out);
        out.push('\n');
    }
    out.push_str("}}");
}

fn serialize_param_value(key: &str, value: &ParamValue, out: &mut String) {
    match value {
        ParamValue::Scalar(s) => out.push_str(s),
        ParamValue::List(items) => {
            let strings: Vec<&str> = items
                .iter()
                .filter_map(|i| match i {
                    ParamItem::Text(t) => Some(t.as_str()),
                    ParamItem::Template(_) => None,
                })
                .collect();
            let templates: Vec<&TemplateNode> = items
                .iter()
                .filter_map(|i| match i {
                    ParamItem::Template(t) => Some(t),
                    ParamItem::Text(_) => None,
                })
                .collect();
            if !strings.is_empty() && !templates.is_empty() {
                warn!(param = key, "mixed string/template list; strings emitted first");
            }
            out.push_str(&strings.join(&LIST_DELIMITER.to_string()));
            for (idx, t) in templates.iter().enumerate() {
                if idx > 0 || !strings.is_empty() {
                    out.push('\n');
                }
                serialize_template(t, out);
            }
        }
    }
}

// ============================================================================
// Template update
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct UpdateOptions {
    /// Remove parameters absent from the new template.
    pub delete: bool,
    /// Collapse blank lines in the whole output.
    pub remove_empty_lines: bool,
    /// Let empty new values overwrite non-empty remote values.
    pub overwrite_with_empty: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            delete: false,
            remove_empty_lines: false,
            overwrite_with_empty: true,
        }
    }
}

pub(crate) fn param_is_empty(value: &ParamValue) -> bool {
    match value {
        ParamValue::Scalar(s) => s.is_empty(),
        ParamValue::List(items) => items.is_empty(),
    }
}

/// Update a template inside existing wikitext with the parameters of a
/// new template of the same name. If no template of that name exists the
/// text is returned unchanged; composition is the caller's concern.
pub fn update_template(
    existing_wikitext: &str,
    new_template_wikitext: &str,
    options: UpdateOptions,
) -> Result<String, WikitextError> {
    let mut nodes = parse(existing_wikitext, ArrayMode::OnlyMultiple)?;
    let new_nodes = parse(new_template_wikitext, ArrayMode::OnlyMultiple)?;
    let new_template = new_nodes.iter().find_map(|n| match n {
        ContentNode::Template(t) => Some(t),
        _ => None,
    });
    let Some(new_template) = new_template else {
        return Ok(existing_wikitext.to_string());
    };

    for node in &mut nodes {
        let ContentNode::Template(existing) = node else {
            continue;
        };
        if existing.name != new_template.name {
            continue;
        }
        for (key, value) in &new_template.params {
            let keep_remote = !options.overwrite_with_empty
                && param_is_empty(value)
                && existing.get(key).map(|v| !param_is_empty(v)).unwrap_or(false);
            if !keep_remote {
                existing.set(key, value.clone());
            }
        }
        if options.delete {
            existing
                .params
                .retain(|(k, _)| new_template.get(k).is_some());
        }
    }

    let mut out = serialize(&nodes);
    if options.remove_empty_lines {
        let lines: Vec<&str> = out.lines().filter(|l| !l.trim().is_empty()).collect();
        out = lines.join("\n");
    }
    Ok(out)
}

// ============================================================================
// JSON mapping (wikiJson element shape)
// ============================================================================

/// Flat structure as wikiJson: an array of free-text strings and one-key
/// template maps. Parameter order inside a template is not preserved by
/// the JSON object representation; callers that need ordering keep the
/// typed structure.
pub fn to_json(nodes: &[ContentNode]) -> Value {
    Value::Array(nodes.iter().map(node_to_json).collect())
}

fn node_to_json(node: &ContentNode) -> Value {
    match node {
        ContentNode::Text(t) => Value::String(t.clone()),
        ContentNode::Template(t) => template_to_json(t),
    }
}

pub(crate) fn template_to_json(template: &TemplateNode) -> Value {
    let mut params = serde_json::Map::new();
    for (key, value) in &template.params {
        params.insert(key.clone(), param_value_to_json(value));
    }
    json!({ template.name.clone(): Value::Object(params) })
}

pub(crate) fn param_value_to_json(value: &ParamValue) -> Value {
    match value {
        ParamValue::Scalar(s) => Value::String(s.clone()),
        ParamValue::List(items) => Value::Array(
            items
                .iter()
                .map(|i| match i {
                    ParamItem::Text(t) => Value::String(t.clone()),
                    ParamItem::Template(t) => template_to_json(t),
                })
                .collect(),
        ),
    }
}

/// Rebuild the flat structure from its wikiJson form.
pub fn from_json(value: &Value) -> Result<Vec<ContentNode>, WikitextError> {
    let Value::Array(elements) = value else {
        return Err(WikitextError::NotATemplate(value.to_string()));
    };
    elements.iter().map(node_from_json).collect()
}

fn node_from_json(value: &Value) -> Result<ContentNode, WikitextError> {
    match value {
        Value::String(s) => Ok(ContentNode::Text(s.clone())),
        Value::Object(_) => Ok(ContentNode::Template(template_from_json(value)?)),
        other => Err(WikitextError::NotATemplate(other.to_string())),
    }
}

pub(crate) fn template_from_json(value: &Value) -> Result<TemplateNode, WikitextError> {
    let Value::Object(map) = value else {
        return Err(WikitextError::NotATemplate(value.to_string()));
    };
    let (name, params) = map
        .iter()
        .next()
        .ok_or_else(|| WikitextError::NotATemplate(value.to_string()))?;
    let Value::Object(params) = params else {
        return Err(WikitextError::NotATemplate(params.to_string()));
    };
    let mut template = TemplateNode::new(name.clone());
    for (key, v) in params {
        template.params.push((key.clone(), param_value_from_json(v)?));
    }
    Ok(template)
}

pub(crate) fn param_value_from_json(value: &Value) -> Result<ParamValue, WikitextError> {
    match value {
        Value::String(s) => Ok(ParamValue::Scalar(s.clone())),
        Value::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                match item {
                    Value::String(s) => out.push(ParamItem::Text(s.clone())),
                    Value::Object(_) => out.push(ParamItem::Template(template_from_json(item)?)),
                    other => out.push(ParamItem::Text(other.to_string())),
                }
            }
            Ok(ParamValue::List(out))
        }
        Value::Null => Ok(ParamValue::Scalar(String::new())),
        other => Ok(ParamValue::Scalar(other.to_string())),
    }
}
