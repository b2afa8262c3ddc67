// JSON flattening: turns a nested record into readable "field is value" sentences
// that the recognizer is trained on and run against.
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::text::camel_case_split;

/// Flatten a JSON value into one sentence per object/array node that holds at
/// least one non-empty scalar.
///
/// ```text
/// {"Passenger": {"PassengerID": "PID1234", "name": "Jim Bob"}}
/// => Passenger Passenger ID is "PID1234", name is "Jim Bob"
/// ```
pub fn flatten(value: &Value) -> Vec<String> {
    let mut results = Vec::new();
    match value {
        Value::Object(_) | Value::Array(_) => walk(value, "", &mut results),
        scalar => {
            let mut leaves = Vec::new();
            push_leaf(&mut leaves, None, scalar);
            results.extend(leaves);
        }
    }
    results
}

/// Load a JSON file and flatten it.
pub fn convert_json_to_lines(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let value: Value = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(flatten(&value))
}

fn walk(node: &Value, prefix: &str, results: &mut Vec<String>) {
    let mut leaves: Vec<String> = Vec::new();

    match node {
        Value::Object(map) => {
            for (key, child) in map {
                let label = camel_case_split(key, " ");
                if is_container(child) {
                    walk(child, &extend_prefix(prefix, &label), results);
                } else {
                    push_leaf(&mut leaves, Some(&label), child);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                if is_container(item) {
                    walk(item, prefix, results);
                } else {
                    push_leaf(&mut leaves, None, item);
                }
            }
        }
        _ => {}
    }

    if !leaves.is_empty() {
        let body = leaves.join(", ");
        if prefix.is_empty() {
            results.push(body);
        } else {
            results.push(format!("{} {}", prefix, body));
        }
    }
}

fn extend_prefix(prefix: &str, label: &str) -> String {
    if prefix.is_empty() {
        label.to_string()
    } else {
        format!("{} {}", prefix, label)
    }
}

fn is_container(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

fn push_leaf(leaves: &mut Vec<String>, key: Option<&str>, value: &Value) {
    let Some(rendered) = render_scalar(value) else {
        return;
    };
    match key {
        Some(k) => leaves.push(format!("{} is \"{}\"", k, rendered)),
        None => leaves.push(format!("\"{}\"", rendered)),
    }
}

/// Render a scalar leaf, or `None` for the falsy values that are never emitted.
pub fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if !is_zero(n) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

fn is_zero(n: &serde_json::Number) -> bool {
    n.as_f64().map_or(false, |f| f == 0.0)
}
