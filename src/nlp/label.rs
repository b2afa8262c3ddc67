// Weak supervision: known PII values are matched against flattened sentences to
// produce character-offset training annotations.
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::flatten::convert_json_to_lines;
use super::text::{camel_case_split, CharIndex};

/// Known (value, label) pairs, stored on disk as `[["PID1234", "PassengerID"], ...]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PiiTable {
    pub entries: Vec<(String, String)>,
}

impl PiiTable {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing PII table {}", path.display()))
    }

    /// Output labels in table order, deduplicated, e.g. `PassengerID` -> `PASSENGER_ID`.
    pub fn labels(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .map(|(_, label)| label_name(label))
            .filter(|label| seen.insert(label.clone()))
            .collect()
    }
}

/// One annotated sentence: `(start, end, LABEL)` spans in character offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub text: String,
    pub entities: Vec<(usize, usize, String)>,
}

pub fn label_name(raw: &str) -> String {
    camel_case_split(raw, "_").to_uppercase()
}

/// Character span of the first quoted occurrence of `value` in `sentence`,
/// excluding the quotes.
pub fn find_quoted(sentence: &str, value: &str) -> Option<(usize, usize)> {
    let needle = format!("\"{}\"", value);
    let byte = sentence.find(&needle)? + 1;
    let start = CharIndex::new(sentence).char_at(byte);
    Some((start, start + value.chars().count()))
}

/// Annotate each sentence with every PII value that appears quoted in it.
/// Only the first occurrence of a value in a sentence is annotated.
pub fn label_sentences(sentences: &[String], table: &PiiTable) -> (Vec<TrainingExample>, Vec<String>) {
    let labels = table.labels();
    let entries: Vec<(&str, String)> = table
        .entries
        .iter()
        .filter(|(value, _)| !value.is_empty())
        .map(|(value, label)| (value.as_str(), label_name(label)))
        .collect();

    let examples = sentences
        .iter()
        .map(|sentence| {
            let entities = entries
                .iter()
                .filter_map(|(value, label)| {
                    find_quoted(sentence, value).map(|(start, end)| (start, end, label.clone()))
                })
                .collect();
            TrainingExample {
                text: sentence.clone(),
                entities,
            }
        })
        .collect();

    (examples, labels)
}

/// All `.json` files under `dir`, sorted.
pub fn source_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("json"))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}

/// Flatten every input file and label the resulting sentences.
pub fn process_data(files: &[PathBuf], table: &PiiTable) -> Result<(Vec<TrainingExample>, Vec<String>)> {
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {wide_bar} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let per_file: Vec<Vec<String>> = files
        .par_iter()
        .map(|p| {
            let lines = convert_json_to_lines(p);
            pb.inc(1);
            lines
        })
        .collect::<Result<_>>()?;

    pb.finish_with_message("flattening files");

    let sentences: Vec<String> = per_file.into_iter().flatten().collect();
    tracing::info!(files = files.len(), sentences = sentences.len(), "flattened training corpus");
    Ok(label_sentences(&sentences, table))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, &str)]) -> PiiTable {
        PiiTable {
            entries: entries
                .iter()
                .map(|(v, l)| (v.to_string(), l.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_label_sentences_annotates_quoted_values() {
        let sentences = vec![r#"Passenger Passenger ID is "PID1234", name is "Jim Bob""#.to_string()];
        let pii = table(&[("PID1234", "PassengerID"), ("Jim Bob", "Name")]);
        let (examples, labels) = label_sentences(&sentences, &pii);

        assert_eq!(labels, vec!["PASSENGER_ID".to_string(), "NAME".to_string()]);
        assert_eq!(examples.len(), 1);
        let ex = &examples[0];
        assert_eq!(ex.entities.len(), 2);
        let (start, end, label) = &ex.entities[0];
        assert_eq!(&ex.text[*start..*end], "PID1234");
        assert_eq!(label, "PASSENGER_ID");
        let (start, end, _) = &ex.entities[1];
        assert_eq!(&ex.text[*start..*end], "Jim Bob");
    }

    #[test]
    fn test_label_sentences_requires_whole_quoted_value() {
        let sentences = vec![r#"note is "dup PID1234 dup""#.to_string()];
        let (examples, _) = label_sentences(&sentences, &table(&[("PID1234", "ID")]));
        assert!(examples[0].entities.is_empty());
    }

    #[test]
    fn test_label_sentences_first_occurrence_only() {
        let sentences = vec![r#"a is "X1", b is "X1""#.to_string()];
        let (examples, _) = label_sentences(&sentences, &table(&[("X1", "ID")]));
        assert_eq!(examples[0].entities, vec![(6, 8, "ID".to_string())]);
    }

    #[test]
    fn test_labels_are_deduplicated_in_table_order() {
        let pii = table(&[("a", "lastName"), ("b", "ID"), ("c", "last_name"), ("", "Email")]);
        assert_eq!(pii.labels(), vec!["LAST_NAME", "ID", "EMAIL"]);
        // labels exist even without any sentence to label
        let (examples, labels) = label_sentences(&[], &pii);
        assert!(examples.is_empty());
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn test_find_quoted_char_offsets() {
        assert_eq!(find_quoted(r#"né is "Zoë""#, "Zoë"), Some((7, 10)));
        assert_eq!(find_quoted("no quotes here Zoë", "Zoë"), None);
    }

    #[test]
    fn test_pii_table_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("PII_Data.json");
        std::fs::write(&path, r#"[["PID1234", "PassengerID"], ["Jim Bob", "Name"]]"#)?;
        let pii = PiiTable::load(&path)?;
        assert_eq!(pii.entries.len(), 2);
        assert_eq!(pii.entries[1].0, "Jim Bob");
        Ok(())
    }

    #[test]
    fn test_process_data_over_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("b.json"), r#"{"Name": "Jim Bob"}"#)?;
        std::fs::write(dir.path().join("a.json"), r#"{"Passenger": {"PassengerID": "PID1234"}}"#)?;
        std::fs::write(dir.path().join("readme.txt"), "ignored")?;

        let files = source_files(dir.path());
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.json"));

        let pii = table(&[("PID1234", "PassengerID"), ("Jim Bob", "Name")]);
        let (examples, labels) = process_data(&files, &pii)?;
        assert_eq!(labels.len(), 2);
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].text, r#"Passenger Passenger ID is "PID1234""#);
        assert_eq!(examples[0].entities[0].2, "PASSENGER_ID");
        assert_eq!(examples[1].entities[0].2, "NAME");
        Ok(())
    }
}
