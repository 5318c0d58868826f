//! Value paths over the flat content structure.
//!
//! A path like `Specimen.samples[0].label` addresses values inside the
//! parsed template tree with explicit field/index steps: a key step
//! selects templates by name (in a node list) or parameters by name
//! (inside a template); an index step selects a list element.
//!
//! Matches are explicit visitor walks; no JSONPath engine is involved.

use crate::{
    param_is_empty, template_from_json, ContentNode, ParamItem, ParamValue, TemplateNode,
    WikitextError,
};
use nom::{
    bytes::complete::take_while1,
    character::complete::{char as pchar, digit1},
    combinator::{all_consuming, map, map_res},
    multi::{many0, separated_list1},
    sequence::delimited,
    IResult,
};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuePath(pub Vec<PathStep>);

// ============================================================================
// Path grammar
// ============================================================================

fn key(input: &str) -> IResult<&str, PathStep> {
    map(
        take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-' || c == ' '),
        |s: &str| PathStep::Key(s.trim().to_string()),
    )(input)
}

fn index(input: &str) -> IResult<&str, PathStep> {
    map(
        delimited(
            pchar('['),
            map_res(digit1, |d: &str| d.parse::<usize>()),
            pchar(']'),
        ),
        PathStep::Index,
    )(input)
}

fn segment(input: &str) -> IResult<&str, Vec<PathStep>> {
    let (input, head) = key(input)?;
    let (input, indices) = many0(index)(input)?;
    let mut steps = vec![head];
    steps.extend(indices);
    Ok((input, steps))
}

impl ValuePath {
    /// Parse `a.b[0].c` into explicit steps.
    pub fn parse(path: &str) -> Result<Self, WikitextError> {
        let parser = separated_list1(pchar('.'), segment);
        let (_, segments) = all_consuming(parser)(path)
            .map_err(|_: nom::Err<nom::error::Error<&str>>| {
                WikitextError::InvalidPath(path.to_string())
            })?;
        Ok(ValuePath(segments.into_iter().flatten().collect()))
    }
}

// ============================================================================
// Reads
// ============================================================================

/// All values matched by `path`, as JSON snapshots.
pub fn get_values(nodes: &[ContentNode], path: &ValuePath) -> Vec<Value> {
    let mut out = Vec::new();
    walk_nodes(nodes, &path.0, &mut out);
    out
}

fn walk_nodes(nodes: &[ContentNode], steps: &[PathStep], out: &mut Vec<Value>) {
    match steps.first() {
        None => out.push(crate::to_json(nodes)),
        Some(PathStep::Key(k)) => {
            for node in nodes {
                if let ContentNode::Template(t) = node {
                    if &t.name == k {
                        walk_template(t, &steps[1..], out);
                    }
                }
            }
        }
        Some(PathStep::Index(i)) => {
            if let Some(node) = nodes.get(*i) {
                match node {
                    ContentNode::Text(t) => {
                        if steps.len() == 1 {
                            out.push(Value::String(t.clone()));
                        }
                    }
                    ContentNode::Template(t) => walk_template(t, &steps[1..], out),
                }
            }
        }
    }
}

fn walk_template(template: &TemplateNode, steps: &[PathStep], out: &mut Vec<Value>) {
    match steps.first() {
        None => out.push(crate::template_to_json(template)),
        Some(PathStep::Key(k)) => {
            if let Some(value) = template.get(k) {
                walk_param(value, &steps[1..], out);
            }
        }
        Some(PathStep::Index(_)) => {}
    }
}

fn walk_param(value: &ParamValue, steps: &[PathStep], out: &mut Vec<Value>) {
    match steps.first() {
        None => out.push(crate::param_value_to_json(value)),
        Some(PathStep::Index(i)) => {
            if let ParamValue::List(items) = value {
                if let Some(item) = items.get(*i) {
                    match item {
                        ParamItem::Text(t) => {
                            if steps.len() == 1 {
                                out.push(Value::String(t.clone()));
                            }
                        }
                        ParamItem::Template(t) => walk_template(t, &steps[1..], out),
                    }
                }
            }
        }
        Some(PathStep::Key(k)) => {
            if let ParamValue::List(items) = value {
                for item in items {
                    if let ParamItem::Template(t) = item {
                        if &t.name == k {
                            walk_template(t, &steps[1..], out);
                        }
                    }
                }
            }
        }
    }
}

// ============================================================================
// Writes
// ============================================================================

/// Set the value addressed by `path`.
///
/// Existing matches are updated in place; with `replace` the whole
/// matched subtree is swapped for `value`. When nothing matches, the
/// path is created as a chain of template/parameter keys.
pub fn set_value(
    nodes: &mut Vec<ContentNode>,
    path: &ValuePath,
    value: &Value,
    replace: bool,
) -> Result<(), WikitextError> {
    let updated = set_in_nodes(nodes, &path.0, value, replace)?;
    if updated == 0 {
        create_path(nodes, &path.0, value)?;
    }
    Ok(())
}

fn set_in_nodes(
    nodes: &mut [ContentNode],
    steps: &[PathStep],
    value: &Value,
    replace: bool,
) -> Result<usize, WikitextError> {
    let Some(step) = steps.first() else {
        return Ok(0);
    };
    let mut updated = 0;
    match step {
        PathStep::Key(k) => {
            for node in nodes.iter_mut() {
                let ContentNode::Template(t) = node else {
                    continue;
                };
                if &t.name != k {
                    continue;
                }
                if steps.len() == 1 {
                    apply_to_template(t, value, replace)?;
                    updated += 1;
                } else {
                    updated += set_in_template(t, &steps[1..], value, replace)?;
                }
            }
        }
        PathStep::Index(i) => {
            if let Some(ContentNode::Template(t)) = nodes.get_mut(*i) {
                if steps.len() == 1 {
                    apply_to_template(t, value, replace)?;
                    updated += 1;
                } else {
                    updated += set_in_template(t, &steps[1..], value, replace)?;
                }
            }
        }
    }
    Ok(updated)
}

fn set_in_template(
    template: &mut TemplateNode,
    steps: &[PathStep],
    value: &Value,
    replace: bool,
) -> Result<usize, WikitextError> {
    let Some(PathStep::Key(k)) = steps.first() else {
        return Ok(0);
    };
    let Some(param) = template.get_mut(k) else {
        return Ok(0);
    };
    if steps.len() == 1 {
        *param = json_to_param_value(value)?;
        return Ok(1);
    }
    set_in_param(param, &steps[1..], value, replace)
}

fn set_in_param(
    param: &mut ParamValue,
    steps: &[PathStep],
    value: &Value,
    replace: bool,
) -> Result<usize, WikitextError> {
    let Some(step) = steps.first() else {
        return Ok(0);
    };
    let ParamValue::List(items) = param else {
        return Ok(0);
    };
    let mut updated = 0;
    match step {
        PathStep::Index(i) => {
            if let Some(item) = items.get_mut(*i) {
                if steps.len() == 1 {
                    *item = json_to_param_item(value)?;
                    updated += 1;
                } else if let ParamItem::Template(t) = item {
                    if let Some(PathStep::Key(_)) = steps.get(1) {
                        updated += set_in_template(t, &steps[1..], value, replace)?;
                    }
                }
            }
        }
        PathStep::Key(k) => {
            for item in items.iter_mut() {
                let ParamItem::Template(t) = item else {
                    continue;
                };
                if &t.name != k {
                    continue;
                }
                if steps.len() == 1 {
                    apply_to_template(t, value, replace)?;
                    updated += 1;
                } else {
                    updated += set_in_template(t, &steps[1..], value, replace)?;
                }
            }
        }
    }
    Ok(updated)
}

fn apply_to_template(
    template: &mut TemplateNode,
    value: &Value,
    replace: bool,
) -> Result<(), WikitextError> {
    let incoming = template_from_json(value)?;
    if replace {
        *template = incoming;
    } else {
        for (key, v) in incoming.params {
            template.set(&key, v);
        }
    }
    Ok(())
}

/// Create a missing path as alternating template/parameter keys.
fn create_path(
    nodes: &mut Vec<ContentNode>,
    steps: &[PathStep],
    value: &Value,
) -> Result<(), WikitextError> {
    let Some(PathStep::Key(template_name)) = steps.first() else {
        return Err(WikitextError::InvalidPath(format!("{steps:?}")));
    };
    let mut template = TemplateNode::new(template_name.clone());
    create_in_template(&mut template, &steps[1..], value)?;
    nodes.push(ContentNode::Template(template));
    Ok(())
}

fn create_in_template(
    template: &mut TemplateNode,
    steps: &[PathStep],
    value: &Value,
) -> Result<(), WikitextError> {
    match steps.first() {
        None => apply_to_template(template, value, true),
        Some(PathStep::Key(param)) => {
            if steps.len() == 1 {
                template.set(param, json_to_param_value(value)?);
                Ok(())
            } else {
                let Some(PathStep::Key(nested_name)) = steps.get(1) else {
                    return Err(WikitextError::InvalidPath(format!("{steps:?}")));
                };
                let mut nested = TemplateNode::new(nested_name.clone());
                create_in_template(&mut nested, &steps[2..], value)?;
                template.set(param, ParamValue::List(vec![ParamItem::Template(nested)]));
                Ok(())
            }
        }
        Some(PathStep::Index(_)) => Err(WikitextError::InvalidPath(format!("{steps:?}"))),
    }
}

fn json_to_param_value(value: &Value) -> Result<ParamValue, WikitextError> {
    crate::param_value_from_json(value)
}

fn json_to_param_item(value: &Value) -> Result<ParamItem, WikitextError> {
    match value {
        Value::String(s) => Ok(ParamItem::Text(s.clone())),
        Value::Object(_) => Ok(ParamItem::Template(template_from_json(value)?)),
        other => Ok(ParamItem::Text(other.to_string())),
    }
}

/// True when the addressed parameter exists but is empty.
pub fn is_empty_at(nodes: &[ContentNode], path: &ValuePath) -> bool {
    let ValuePath(steps) = path;
    let Some(PathStep::Key(template_name)) = steps.first() else {
        return false;
    };
    let Some(PathStep::Key(param)) = steps.get(1) else {
        return false;
    };
    nodes.iter().any(|n| {
        matches!(n, ContentNode::Template(t)
            if &t.name == template_name
                && t.get(param).map(param_is_empty).unwrap_or(false))
    })
}
