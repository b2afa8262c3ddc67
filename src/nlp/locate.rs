// Maps recognized entities back onto the original JSON payload.
//
// Recognizer offsets refer to the flattened sentence text, which cannot be
// inverted (keys are renamed, nodes reordered and joined), so every location here
// is re-derived by searching the payload itself.
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use super::ner::Entity;
use super::text::CharIndex;

/// An entity occurrence inside the payload. Offsets are character offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedEntity {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Every literal occurrence of every distinct (text, label) pair in `payload`.
///
/// Values are searched both as decoded text and in their JSON-escaped form, so a
/// value holding quotes or backslashes is found inside the serialized string.
pub fn map_entities(payload: &str, entities: &[Entity]) -> Vec<MappedEntity> {
    let index = CharIndex::new(payload);
    let mut mapped = Vec::new();

    for (text, label) in distinct(entities) {
        let Some(re) = payload_literal(text) else {
            continue;
        };
        for m in re.find_iter(payload) {
            mapped.push(MappedEntity {
                start: index.char_at(m.start()),
                end: index.char_at(m.end()),
                text: text.to_string(),
                label: label.to_string(),
                path: None,
            });
        }
    }

    mapped
}

/// Path-aware variant: scans each string leaf of `value` and tags matches with the
/// leaf's `$['key']['0']` path. Offsets are relative to the leaf string.
pub fn build_jsonp(value: &Value, entities: &[Entity]) -> Vec<MappedEntity> {
    let scanners: Vec<(Regex, &str, &str)> = distinct(entities)
        .into_iter()
        .filter_map(|(text, label)| literal(text).map(|re| (re, text, label)))
        .collect();
    let mut mapped = Vec::new();
    if scanners.is_empty() {
        return mapped;
    }
    walk_paths(value, "$".to_string(), &scanners, &mut mapped);
    mapped
}

fn walk_paths(
    node: &Value,
    path: String,
    scanners: &[(Regex, &str, &str)],
    out: &mut Vec<MappedEntity>,
) {
    match node {
        Value::Object(map) => {
            for (key, child) in map {
                walk_paths(child, format!("{}['{}']", path, escape_key(key)), scanners, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                walk_paths(child, format!("{}['{}']", path, i), scanners, out);
            }
        }
        Value::String(leaf) => {
            let index = CharIndex::new(leaf);
            for (re, text, label) in scanners {
                for m in re.find_iter(leaf) {
                    out.push(MappedEntity {
                        start: index.char_at(m.start()),
                        end: index.char_at(m.end()),
                        text: text.to_string(),
                        label: label.to_string(),
                        path: Some(path.clone()),
                    });
                }
            }
        }
        _ => {}
    }
}

// Keys go between single quotes in the path.
fn escape_key(key: &str) -> String {
    key.replace('\\', "\\\\").replace('\'', "\\'")
}

fn distinct(entities: &[Entity]) -> Vec<(&str, &str)> {
    let mut seen = HashSet::new();
    entities
        .iter()
        .map(|e| (e.text.as_str(), e.label.as_str()))
        .filter(|pair| !pair.0.is_empty() && seen.insert(*pair))
        .collect()
}

// Entity text is matched literally; metacharacters never reach the regex engine.
fn literal(text: &str) -> Option<Regex> {
    Regex::new(&regex::escape(text)).ok()
}

// Decoded text or its escaped form as it appears between JSON quotes.
fn payload_literal(text: &str) -> Option<Regex> {
    let quoted = serde_json::to_string(text).ok()?;
    let escaped = &quoted[1..quoted.len() - 1];
    if escaped == text {
        return literal(text);
    }
    Regex::new(&format!("{}|{}", regex::escape(escaped), regex::escape(text))).ok()
}
