use crate::config::{ModelConfig, ModelRole};
use crate::detect::Detection;
use crate::explain::overlay::RegionBox;
use crate::model::registry::ModelRegistry;
use crate::pipeline::format::DisplayResults;
use crate::storage::FileStore;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shared Application State
#[derive(Clone)]
pub struct AppState {
    pub registry: ModelRegistry,
    pub models: Vec<ModelConfig>,
    pub store: FileStore,
    pub max_upload_bytes: usize,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn model_config(&self, role: ModelRole) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.role == role)
    }
}

// --- DTOs (Data Transfer Objects) ---

// Upload
#[derive(Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub filename: String,
    pub file_id: String,
}

// Analyze
#[derive(Deserialize, Default)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub results: DisplayResults,
    pub gradcam: Vec<GradCamImage>,
    /// RFC 3339, local time.
    pub timestamp: String,
    pub inference_time_ms: f64,
}

#[derive(Serialize, Debug, Clone)]
pub struct GradCamImage {
    pub subtype: String,
    pub image_url: String,
    pub probability: f64,
    pub boxes: Vec<RegionBox>,
}

// Detect
#[derive(Serialize)]
pub struct DetectResponse {
    pub success: bool,
    pub original_image: String,
    pub result_image: String,
    pub detections: Vec<Detection>,
}

// Model info
#[derive(Serialize, Debug)]
pub struct StageInfo {
    pub name: String,
    pub architecture: &'static str,
    pub output: &'static str,
    pub path: String,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtypes: Option<Vec<&'static str>>,
}

#[derive(Serialize, Debug)]
pub struct ModelInfoResponse {
    pub stage1: StageInfo,
    pub stage2: StageInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesion_detector: Option<StageInfo>,
    pub device: &'static str,
    /// `"ready"` when both stages are loaded, `"error"` otherwise.
    pub status: &'static str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<&'static str, String>,
}
