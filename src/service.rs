// Model holder and prediction entry point shared by the HTTP handlers.

use parking_lot::RwLock;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ModelResult;
use crate::nlp::flatten::flatten;
use crate::nlp::ner::{Entity, GazetteerModel, Recognizer};

type Loader = Box<dyn Fn() -> ModelResult<Arc<dyn Recognizer>> + Send + Sync>;

/// Lazily loads the recognizer once and serves it for the life of the process.
///
/// A failed load leaves the slot empty, so the next caller tries again.
pub struct ScoringService {
    source: String,
    loader: Loader,
    model: RwLock<Option<Arc<dyn Recognizer>>>,
}

impl ScoringService {
    /// Serve the gazetteer model stored in `dir`.
    pub fn from_dir(dir: PathBuf) -> Self {
        let source = dir.display().to_string();
        Self::with_loader(source, move || {
            GazetteerModel::load(&dir).map(|m| Arc::new(m) as Arc<dyn Recognizer>)
        })
    }

    pub fn with_loader<F>(source: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> ModelResult<Arc<dyn Recognizer>> + Send + Sync + 'static,
    {
        Self {
            source: source.into(),
            loader: Box::new(loader),
            model: RwLock::new(None),
        }
    }

    /// The loaded recognizer, loading it on first use. `None` if it cannot be loaded.
    pub fn get_model(&self) -> Option<Arc<dyn Recognizer>> {
        if let Some(model) = self.model.read().as_ref() {
            return Some(Arc::clone(model));
        }

        let mut slot = self.model.write();
        if let Some(model) = slot.as_ref() {
            return Some(Arc::clone(model));
        }

        match (self.loader)() {
            Ok(model) => {
                info!(
                    source = %self.source,
                    name = model.name(),
                    labels = model.labels().len(),
                    "model loaded"
                );
                *slot = Some(Arc::clone(&model));
                Some(model)
            }
            Err(e) => {
                warn!(source = %self.source, error = %e, "model load failed");
                None
            }
        }
    }

    /// Flatten `record`, run the recognizer over the joined sentences.
    ///
    /// Returns `None` when no model is available or the record has nothing to read.
    pub fn predict(&self, record: &Value) -> Option<Vec<Entity>> {
        let Some(model) = self.get_model() else {
            warn!("no model available, skipping prediction");
            return None;
        };

        let lines = flatten(record);
        if lines.is_empty() {
            debug!("record flattened to no sentences");
            return None;
        }

        let text = lines.join(". ");
        debug!(sentences = lines.len(), chars = text.len(), "running recognizer");
        Some(model.recognize(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::nlp::ner::{ModelMeta, Pattern};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn passenger_model() -> Arc<dyn Recognizer> {
        let meta = ModelMeta {
            name: "PII_JSON_MODEL".to_string(),
            version: "0.1.0".to_string(),
            labels: vec!["PASSENGER_ID".to_string(), "NAME".to_string()],
        };
        let patterns = vec![
            Pattern {
                text: "PID1234".to_string(),
                label: "PASSENGER_ID".to_string(),
            },
            Pattern {
                text: "Jim Bob".to_string(),
                label: "NAME".to_string(),
            },
        ];
        Arc::new(GazetteerModel::new(meta, patterns).unwrap())
    }

    #[test]
    fn test_predict_passenger_record() {
        let service = ScoringService::with_loader("memory", || Ok(passenger_model()));
        let record = json!({"Passenger": {"PassengerID": "PID1234", "name": "Jim Bob"}});
        let entities = service.predict(&record).unwrap();
        let found: Vec<(&str, &str)> = entities
            .iter()
            .map(|e| (e.text.as_str(), e.label.as_str()))
            .collect();
        assert_eq!(found, vec![("PID1234", "PASSENGER_ID"), ("Jim Bob", "NAME")]);
    }

    #[test]
    fn test_predict_empty_record_is_no_result() {
        let service = ScoringService::with_loader("memory", || Ok(passenger_model()));
        assert!(service.predict(&json!({})).is_none());
        assert!(service.predict(&json!({"a": "", "b": null})).is_none());
    }

    #[test]
    fn test_model_loaded_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let service = ScoringService::with_loader("memory", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(passenger_model())
        });
        assert!(service.get_model().is_some());
        assert!(service.get_model().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_callers_share_one_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let service = ScoringService::with_loader("slow", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(50));
            Ok(passenger_model())
        });

        let models: Vec<Option<Arc<dyn Recognizer>>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| service.get_model())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let first = models[0].as_ref().unwrap();
        for model in &models {
            assert!(Arc::ptr_eq(first, model.as_ref().unwrap()));
        }
    }

    #[test]
    fn test_failed_load_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let service = ScoringService::with_loader("flaky", move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ModelError::Invalid("not yet".to_string()))
            } else {
                Ok(passenger_model())
            }
        });
        assert!(service.get_model().is_none());
        assert!(service.predict(&json!({"name": "Jim Bob"})).is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_model_dir_is_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let service = ScoringService::from_dir(dir.path().join("pii_ner"));
        assert!(service.get_model().is_none());
        assert!(service.predict(&json!({"name": "Jim Bob"})).is_none());
    }

    #[test]
    fn test_from_dir_loads_saved_model() {
        let dir = tempfile::tempdir().unwrap();
        let meta = ModelMeta {
            name: "saved".to_string(),
            version: "0.1.0".to_string(),
            labels: vec!["ID".to_string()],
        };
        let model = GazetteerModel::new(
            meta,
            vec![Pattern {
                text: "PID9".to_string(),
                label: "ID".to_string(),
            }],
        )
        .unwrap();
        model.save(dir.path()).unwrap();

        let service = ScoringService::from_dir(dir.path().to_path_buf());
        assert_eq!(service.get_model().unwrap().name(), "saved");
    }
}
