// Named entity recognition over flattened JSON sentences.
// The service only talks to the `Recognizer` trait; the gazetteer model below is the
// backend produced by `train` and shipped in the model directory.
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use super::text::CharIndex;
use crate::error::{ModelError, ModelResult};

/// File name of the serialized model inside a model directory.
pub const MODEL_FILE: &str = "model.json";

/// A recognized span. Offsets are character offsets into the text given to the recognizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub label: String,
    pub start: usize,
    pub end: usize,
}

pub trait Recognizer: Send + Sync {
    /// Find entity spans in `text`, ordered by start offset.
    fn recognize(&self, text: &str) -> Vec<Entity>;

    /// Output classes this recognizer can emit.
    fn labels(&self) -> &[String];

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub name: String,
    pub version: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub text: String,
    pub label: String,
}

#[derive(Serialize, Deserialize)]
struct ModelFile {
    meta: ModelMeta,
    patterns: Vec<Pattern>,
}

/// Literal-value recognizer: every known PII value maps to one label.
#[derive(Debug)]
pub struct GazetteerModel {
    meta: ModelMeta,
    patterns: Vec<Pattern>,
    lookup: HashMap<String, String>,
    matcher: Option<Regex>,
}

impl GazetteerModel {
    pub fn new(meta: ModelMeta, mut patterns: Vec<Pattern>) -> ModelResult<Self> {
        let declared: HashSet<&str> = meta.labels.iter().map(String::as_str).collect();
        let mut lookup = HashMap::with_capacity(patterns.len());
        for p in &patterns {
            if p.text.is_empty() {
                return Err(ModelError::Invalid("empty pattern text".to_string()));
            }
            if !declared.contains(p.label.as_str()) {
                return Err(ModelError::Invalid(format!(
                    "pattern {:?} uses undeclared label {}",
                    p.text, p.label
                )));
            }
            if let Some(previous) = lookup.insert(p.text.clone(), p.label.clone()) {
                if previous != p.label {
                    return Err(ModelError::Invalid(format!(
                        "pattern {:?} has conflicting labels {} and {}",
                        p.text, previous, p.label
                    )));
                }
            }
        }

        // Longest first: alternation is leftmost-first, so this prefers the longest value.
        patterns.sort_by(|a, b| {
            b.text
                .chars()
                .count()
                .cmp(&a.text.chars().count())
                .then_with(|| a.text.cmp(&b.text))
        });
        patterns.dedup_by(|a, b| a.text == b.text);

        let matcher = if patterns.is_empty() {
            None
        } else {
            let alternation = patterns
                .iter()
                .map(|p| regex::escape(&p.text))
                .collect::<Vec<_>>()
                .join("|");
            Some(RegexBuilder::new(&alternation).size_limit(64 << 20).build()?)
        };

        Ok(Self {
            meta,
            patterns,
            lookup,
            matcher,
        })
    }

    pub fn load(dir: &Path) -> ModelResult<Self> {
        let path = dir.join(MODEL_FILE);
        if !path.is_file() {
            return Err(ModelError::NotFound(dir.to_path_buf()));
        }
        let raw = fs::read_to_string(&path).map_err(|source| ModelError::Io {
            path: path.clone(),
            source,
        })?;
        let file: ModelFile =
            serde_json::from_str(&raw).map_err(|source| ModelError::Parse { path, source })?;
        Self::new(file.meta, file.patterns)
    }

    pub fn save(&self, dir: &Path) -> ModelResult<()> {
        fs::create_dir_all(dir).map_err(|source| ModelError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(MODEL_FILE);
        let file = ModelFile {
            meta: self.meta.clone(),
            patterns: self.patterns.clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|source| ModelError::Parse {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| ModelError::Io { path, source })
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    // End of the longest pattern shorter than `longer` bytes that matches at `start`
    // as whole words.
    fn shorter_at(&self, text: &str, start: usize, longer: usize) -> Option<usize> {
        let rest = &text[start..];
        self.patterns
            .iter()
            .filter(|p| p.text.len() < longer && rest.starts_with(&p.text))
            .map(|p| start + p.text.len())
            .find(|&end| !cuts_word(text, start, end))
    }
}

impl Recognizer for GazetteerModel {
    fn recognize(&self, text: &str) -> Vec<Entity> {
        let Some(matcher) = &self.matcher else {
            return Vec::new();
        };
        let index = CharIndex::new(text);
        let mut entities = Vec::new();

        let mut pos = 0;
        while let Some(m) = matcher.find_at(text, pos) {
            let start = m.start();
            // the longest value here may run into the next word; a shorter one can still fit
            let hit = if cuts_word(text, start, m.end()) {
                self.shorter_at(text, start, m.len())
            } else {
                Some(m.end())
            };

            let Some(end) = hit else {
                pos = start + text[start..].chars().next().map_or(1, char::len_utf8);
                continue;
            };
            if let Some(label) = self.lookup.get(&text[start..end]) {
                entities.push(Entity {
                    text: text[start..end].to_string(),
                    label: label.clone(),
                    start: index.char_at(start),
                    end: index.char_at(end),
                });
            }
            pos = end;
        }

        entities
    }

    fn labels(&self) -> &[String] {
        &self.meta.labels
    }

    fn name(&self) -> &str {
        &self.meta.name
    }
}

// True when the match starts or ends in the middle of an alphanumeric word,
// e.g. "Jim" inside "Jimmy".
fn cuts_word(text: &str, start: usize, end: usize) -> bool {
    let matched = &text[start..end];
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    let first = matched.chars().next();
    let last = matched.chars().next_back();

    let joined = |outside: Option<char>, edge: Option<char>| match (outside, edge) {
        (Some(o), Some(e)) => o.is_alphanumeric() && e.is_alphanumeric(),
        _ => false,
    };
    joined(before, first) || joined(after, last)
}
