use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::InferenceError;

/// Request bodies above this size are rejected with 413.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Deserialize, Clone, Debug, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            host: "0.0.0.0".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub results_dir: PathBuf,
    /// Files older than this are swept after each analysis.
    pub retention_hours: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            results_dir: PathBuf::from("static/results"),
            retention_hours: 24,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct ModelConfig {
    pub role: ModelRole,
    pub name: String,
    pub path: String,
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
    /// Graph output names, in the order the role expects them.
    /// Empty means "take the session's outputs in declaration order".
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Square input edge for the lesion detector.
    #[serde(default)]
    pub input_size: Option<u32>,
    /// Class names for the lesion detector.
    #[serde(default)]
    pub labels: Vec<String>,
}

fn default_intra_threads() -> usize {
    4
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Stage 1: binary hemorrhage presence.
    Detector,
    /// Stage 2: multi-label subtype classifier with CAM outputs.
    SubtypeClassifier,
    /// Optional box detector behind `/detect`.
    LesionDetector,
}

impl ModelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Detector => "detector",
            ModelRole::SubtypeClassifier => "subtype_classifier",
            ModelRole::LesionDetector => "lesion_detector",
        }
    }
}

impl AppConfig {
    pub fn from_yaml(content: &str) -> Result<Self, InferenceError> {
        serde_yaml::from_str(content).map_err(|e| InferenceError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, InferenceError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    pub fn model(&self, role: ModelRole) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.role == role)
    }
}
