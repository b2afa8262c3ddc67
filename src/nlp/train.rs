// Builds a gazetteer model from weakly labeled examples and scores it against them.
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::label::TrainingExample;
use super::ner::{GazetteerModel, ModelMeta, Pattern, Recognizer};
use super::text::char_slice;
use crate::error::ModelResult;

pub const DEFAULT_MODEL_NAME: &str = "PII_JSON_MODEL";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainReport {
    pub examples: usize,
    pub patterns: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
}

/// Aggregate annotated spans into `value -> label` patterns.
///
/// A value annotated with more than one label keeps the label seen most often;
/// ties go to the label that comes first in `labels`.
pub fn train(
    examples: &[TrainingExample],
    labels: &[String],
    name: &str,
) -> ModelResult<(GazetteerModel, TrainReport)> {
    let rank: HashMap<&str, usize> = labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str(), i))
        .collect();

    // BTreeMap keeps the pattern list stable between runs
    let mut votes: BTreeMap<String, HashMap<String, usize>> = BTreeMap::new();
    for ex in examples {
        for (start, end, label) in &ex.entities {
            let value = char_slice(&ex.text, *start, *end);
            if value.is_empty() || !rank.contains_key(label.as_str()) {
                continue;
            }
            *votes
                .entry(value.to_string())
                .or_default()
                .entry(label.clone())
                .or_insert(0) += 1;
        }
    }

    let patterns: Vec<Pattern> = votes
        .into_iter()
        .filter_map(|(text, counts)| {
            counts
                .into_iter()
                .max_by(|(la, ca), (lb, cb)| ca.cmp(cb).then_with(|| rank[lb.as_str()].cmp(&rank[la.as_str()])))
                .map(|(label, _)| Pattern { text, label })
        })
        .collect();

    let meta = ModelMeta {
        name: name.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        labels: labels.to_vec(),
    };
    let model = GazetteerModel::new(meta, patterns)?;
    let report = evaluate(&model, examples);
    tracing::info!(
        patterns = report.patterns,
        precision = report.precision,
        recall = report.recall,
        f1 = report.f1,
        "trained {}",
        name
    );
    Ok((model, report))
}

/// Exact-span scoring of `model` against annotated examples.
pub fn evaluate(model: &GazetteerModel, examples: &[TrainingExample]) -> TrainReport {
    let mut report = TrainReport {
        examples: examples.len(),
        patterns: model.patterns().len(),
        ..TrainReport::default()
    };

    for ex in examples {
        let gold: HashSet<(usize, usize, &str)> = ex
            .entities
            .iter()
            .map(|(s, e, l)| (*s, *e, l.as_str()))
            .collect();
        let spans = model.recognize(&ex.text);
        let predicted: HashSet<(usize, usize, &str)> = spans
            .iter()
            .map(|e| (e.start, e.end, e.label.as_str()))
            .collect();

        let hits = gold.intersection(&predicted).count();
        report.true_positives += hits;
        report.false_positives += predicted.len() - hits;
        report.false_negatives += gold.len() - hits;
    }

    let tp = report.true_positives as f32;
    report.precision = ratio(tp, tp + report.false_positives as f32);
    report.recall = ratio(tp, tp + report.false_negatives as f32);
    report.f1 = ratio(2.0 * report.precision * report.recall, report.precision + report.recall);
    report
}

fn ratio(num: f32, den: f32) -> f32 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}
