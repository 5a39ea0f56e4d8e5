//! Field projection over structured tool responses.
//!
//! A projection spec names dot-separated field paths and a mode. Applied to
//! an ordered sequence, a path segment selects that key in every element, so
//! `users.email` plucks `email` out of each element of `users`.

use serde_json::{Map, Value};

use crate::content::Item;
use crate::error::ProxyError;

/// Projection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    /// Keep only the listed field paths.
    Include,
    /// Drop the listed field paths, keep everything else.
    Exclude,
}

/// A validated projection request.
#[derive(Debug, Clone)]
pub struct ProjectionSpec {
    /// Whether listed fields are kept or dropped.
    pub mode: ProjectionMode,
    /// Dot-separated field paths.
    pub fields: Vec<String>,
}

impl ProjectionSpec {
    /// Validates mode and fields.
    ///
    /// The legacy `view` mode is intentionally rejected until it has real
    /// semantics of its own.
    pub fn parse(mode: &str, fields: Vec<String>) -> Result<Self, ProxyError> {
        let mode = match mode {
            "include" => ProjectionMode::Include,
            "exclude" => ProjectionMode::Exclude,
            other => {
                return Err(ProxyError::InvalidArgument(format!(
                    "Invalid projection mode: {other}. Must be 'include' or 'exclude'"
                )));
            }
        };

        if fields.is_empty() {
            return Err(ProxyError::InvalidArgument(
                "Projection requires a non-empty 'fields' list".to_string(),
            ));
        }

        Ok(Self { mode, fields })
    }
}

/// Applies the projection to every text item that parses as structured data.
///
/// Items that are not text, or whose text is not valid JSON, pass through
/// unchanged. Stateless and idempotent: re-applying the same spec to its own
/// output is a no-op.
pub fn project_items(items: Vec<Item>, spec: &ProjectionSpec) -> Vec<Item> {
    items
        .into_iter()
        .map(|item| match item {
            Item::Text(text) => match serde_json::from_str::<Value>(&text) {
                Ok(data @ (Value::Object(_) | Value::Array(_))) => {
                    let projected = project_value(&data, &spec.mode, &spec.fields);
                    match serde_json::to_string_pretty(&projected) {
                        Ok(rendered) => Item::Text(rendered),
                        Err(_) => Item::Text(text),
                    }
                }
                _ => Item::Text(text),
            },
            opaque => opaque,
        })
        .collect()
}

/// Recursive projection over a JSON tree.
///
/// Arrays are projected element-wise; scalars are returned as-is.
pub fn project_value(data: &Value, mode: &ProjectionMode, fields: &[String]) -> Value {
    match data {
        Value::Array(elements) => Value::Array(
            elements
                .iter()
                .map(|element| project_value(element, mode, fields))
                .collect(),
        ),
        Value::Object(map) => match mode {
            ProjectionMode::Include => apply_include(map, fields),
            ProjectionMode::Exclude => apply_exclude(map, fields),
        },
        other => other.clone(),
    }
}

fn apply_include(data: &Map<String, Value>, fields: &[String]) -> Value {
    // Dotted paths whose head names an array in this object become
    // element-wise projections; everything else is handled directly.
    let mut array_projections: Vec<(&str, Vec<String>)> = Vec::new();
    let mut regular_fields: Vec<&String> = Vec::new();

    for field in fields {
        match field.split_once('.') {
            Some((head, rest)) if data.get(head).is_some_and(Value::is_array) => {
                match array_projections.iter_mut().find(|(key, _)| *key == head) {
                    Some((_, nested)) => nested.push(rest.to_string()),
                    None => array_projections.push((head, vec![rest.to_string()])),
                }
            }
            _ => regular_fields.push(field),
        }
    }

    let mut result = Map::new();

    for (head, nested_fields) in array_projections {
        if let Some(value) = data.get(head) {
            result.insert(
                head.to_string(),
                project_value(value, &ProjectionMode::Include, &nested_fields),
            );
        }
    }

    for field in regular_fields {
        if let Some(value) = data.get(field.as_str()) {
            let projected = if value.is_object() || value.is_array() {
                project_value(value, &ProjectionMode::Include, fields)
            } else {
                value.clone()
            };
            result.insert(field.clone(), projected);
        } else if field.contains('.') {
            include_nested_path(data, field, fields, &mut result);
        }
    }

    Value::Object(result)
}

/// Walks a dotted path through nested objects and, when the full path
/// resolves, recreates the same shape in the result tree.
fn include_nested_path(
    data: &Map<String, Value>,
    field: &str,
    fields: &[String],
    result: &mut Map<String, Value>,
) {
    let parts: Vec<&str> = field.split('.').collect();
    let (leaf, parents) = match parts.split_last() {
        Some(split) => split,
        None => return,
    };

    let mut current = data;
    for part in parents {
        match current.get(*part) {
            Some(Value::Object(next)) => current = next,
            _ => return,
        }
    }

    let Some(value) = current.get(*leaf) else { return };

    let mut target = result;
    for part in parents {
        let slot = target
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match slot {
            Value::Object(next) => target = next,
            _ => return,
        }
    }

    let projected = if value.is_object() || value.is_array() {
        project_value(value, &ProjectionMode::Include, fields)
    } else {
        value.clone()
    };
    target.insert((*leaf).to_string(), projected);
}

fn apply_exclude(data: &Map<String, Value>, fields: &[String]) -> Value {
    let mut result = Map::new();

    for (key, value) in data {
        if fields.iter().any(|field| field == key) {
            continue;
        }

        let prefix = format!("{key}.");
        let nested_exclusions: Vec<String> = fields
            .iter()
            .filter_map(|field| field.strip_prefix(&prefix).map(str::to_string))
            .collect();

        let kept = if !nested_exclusions.is_empty() {
            if value.is_object() || value.is_array() {
                project_value(value, &ProjectionMode::Exclude, &nested_exclusions)
            } else {
                value.clone()
            }
        } else if value.is_object() || value.is_array() {
            project_value(value, &ProjectionMode::Exclude, fields)
        } else {
            value.clone()
        };

        result.insert(key.clone(), kept);
    }

    Value::Object(result)
}
