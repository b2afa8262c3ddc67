// Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_MODEL_ROOT: &str = "/opt/ml/model";
pub const DEFAULT_MODEL_NAME: &str = "pii_ner";
pub const DEFAULT_MAX_BODY_BYTES: usize = 6 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    /// Directory holding model artifacts.
    pub model_root: PathBuf,
    /// Sub-directory of `model_root` with the recognizer to serve.
    pub model_name: String,
    pub max_body_bytes: usize,
    /// Load the model before accepting requests instead of on first use.
    pub eager: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            model_root: PathBuf::from(DEFAULT_MODEL_ROOT),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            eager: false,
        }
    }
}

impl ServeConfig {
    pub fn model_dir(&self) -> PathBuf {
        self.model_root.join(&self.model_name)
    }
}
