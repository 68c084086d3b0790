use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        Multipart, State,
    },
    http::StatusCode,
    response::Html,
    Json,
};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::ModelRole;
use crate::detect::{self, LesionDetector};
use crate::error::InferenceError;
use crate::explain::explain_subtypes;
use crate::pipeline::format::format_for_display;
use crate::pipeline::{Subtype, TwoStagePipeline};
use crate::preprocessing;
use crate::server::types::*;
use crate::storage::{validate_upload, ANALYZE_EXTENSIONS, DETECT_EXTENSIONS};

const INDEX_HTML: &str = include_str!("../../static/index.html");

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> (StatusCode, String) {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed".to_string()),
    }
}

pub async fn model_info(State(state): State<Arc<AppState>>) -> Json<ModelInfoResponse> {
    let registry = &state.registry;
    let path = |role| {
        state
            .model_config(role)
            .map(|m| m.path.clone())
            .unwrap_or_default()
    };
    let name = |role, fallback: &str| {
        state
            .model_config(role)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| fallback.to_string())
    };

    let stage1 = StageInfo {
        name: name(ModelRole::Detector, "Hemorrhage Detector"),
        architecture: "Dual EfficientNet-B0 (brain + bone)",
        output: "Binary (Hemorrhage / No Hemorrhage)",
        path: path(ModelRole::Detector),
        loaded: registry.get(ModelRole::Detector).is_some(),
        subtypes: None,
    };
    let stage2 = StageInfo {
        name: name(ModelRole::SubtypeClassifier, "Subtype Classifier"),
        architecture: "Dual EfficientNet-B0 (brain + bone)",
        output: "Multi-label (6 subtypes)",
        path: path(ModelRole::SubtypeClassifier),
        loaded: registry.get(ModelRole::SubtypeClassifier).is_some(),
        subtypes: Some(Subtype::ALL.iter().map(|s| s.name()).collect()),
    };
    let lesion_detector = state
        .model_config(ModelRole::LesionDetector)
        .map(|m| StageInfo {
            name: m.name.clone(),
            architecture: "YOLOv8",
            output: "Bounding boxes",
            path: m.path.clone(),
            loaded: registry.get(ModelRole::LesionDetector).is_some(),
            subtypes: None,
        });

    let errors = registry
        .failures()
        .into_iter()
        .map(|(role, reason)| (role.as_str(), reason))
        .collect();

    Json(ModelInfoResponse {
        stage1,
        stage2,
        lesion_detector,
        device: "cpu",
        status: if registry.is_ready() { "ready" } else { "error" },
        errors,
    })
}

fn multipart_error(err: MultipartError, max_bytes: usize) -> InferenceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        InferenceError::PayloadTooLarge {
            max_mb: max_bytes / (1024 * 1024),
        }
    } else {
        InferenceError::InvalidUpload(err.body_text())
    }
}

/// Reads the `file` field of a multipart body: (client filename, bytes).
async fn read_file_field(
    multipart: &mut Multipart,
    max_bytes: usize,
) -> Result<(String, Bytes), InferenceError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_bytes))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, max_bytes))?;
        return Ok((filename, bytes));
    }
    Err(InferenceError::InvalidUpload("No file provided".to_string()))
}

fn reject_upload(err: InferenceError) -> InferenceError {
    counter!("upload_rejected_total").increment(1);
    warn!(error = %err, "upload rejected");
    err
}

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, InferenceError> {
    if !state.registry.is_ready() {
        return Err(InferenceError::ModelsNotLoaded);
    }
    let mut multipart = multipart.map_err(|e| reject_upload(e.into()))?;

    let (filename, bytes) = read_file_field(&mut multipart, state.max_upload_bytes)
        .await
        .map_err(reject_upload)?;
    let ext = validate_upload(
        &filename,
        bytes.len(),
        ANALYZE_EXTENSIONS,
        state.max_upload_bytes,
    )
    .map_err(reject_upload)?;

    let stored = state.store.save_upload(&ext, &bytes).await?;
    info!(filename = %stored.filename, "upload stored");

    Ok(Json(UploadResponse {
        success: true,
        filename: stored.filename,
        file_id: stored.file_id,
    }))
}

pub async fn analyze(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, InferenceError> {
    let Json(payload) = payload?;
    let filename = payload
        .filename
        .filter(|f| !f.is_empty())
        .ok_or_else(|| InferenceError::InvalidUpload("No filename provided".to_string()))?;
    let path = state.store.resolve_upload(&filename)?;
    let pipeline = TwoStagePipeline::from_registry(&state.registry, &state.models)?;

    counter!("analysis_requests_total").increment(1);
    info!(%filename, "running inference");

    let bytes = tokio::fs::read(&path).await?;
    let file_id = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem.to_string())
        .unwrap_or_else(|| filename.clone());
    let results_dir = state.store.results_dir().to_path_buf();

    let start = Instant::now();
    let (results, gradcam) = tokio::task::spawn_blocking(move || {
        let prepared = preprocessing::image::process_bytes(&bytes)?;
        let result = pipeline.run(prepared)?;
        let formatted = format_for_display(&result);

        let mut gradcam = Vec::new();
        if let Some(activations) = &result.activations {
            let detected = result.detected_subtypes();
            for explanation in explain_subtypes(activations, &result.original, detected)? {
                explanation.save(&results_dir, &file_id)?;
                gradcam.push(GradCamImage {
                    subtype: explanation.subtype.name().to_string(),
                    image_url: format!("/static/results/{}", explanation.file_name(&file_id)),
                    probability: explanation.probability,
                    boxes: explanation.boxes,
                });
            }
        }
        Ok::<_, InferenceError>((formatted, gradcam))
    })
    .await
    .map_err(|e| InferenceError::Task(e.to_string()))??;
    let duration = start.elapsed();

    histogram!("inference_duration_seconds").record(duration.as_secs_f64());
    if results.hemorrhage_detected {
        counter!("hemorrhage_detected_total").increment(1);
    }

    let store = state.store.clone();
    let removed = tokio::task::spawn_blocking(move || store.sweep())
        .await
        .unwrap_or(0);
    if removed > 0 {
        info!(removed, "swept expired files");
    }

    Ok(Json(AnalyzeResponse {
        success: true,
        results,
        gradcam,
        timestamp: chrono::Local::now().to_rfc3339(),
        inference_time_ms: duration.as_secs_f64() * 1000.0,
    }))
}

pub async fn detect(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectResponse>, InferenceError> {
    let model = state
        .registry
        .get(ModelRole::LesionDetector)
        .ok_or(InferenceError::DetectorUnavailable)?;
    let mut multipart = multipart.map_err(|e| reject_upload(e.into()))?;

    let (filename, bytes) = read_file_field(&mut multipart, state.max_upload_bytes)
        .await
        .map_err(reject_upload)?;
    let ext = validate_upload(
        &filename,
        bytes.len(),
        DETECT_EXTENSIONS,
        state.max_upload_bytes,
    )
    .map_err(reject_upload)?;
    let stored = state.store.save_upload(&ext, &bytes).await?;

    let detector = LesionDetector::from_config(model, state.model_config(ModelRole::LesionDetector));
    let result_name = format!("result_{}.png", stored.file_id);
    let result_path = state.store.results_dir().join(&result_name);

    let detections = tokio::task::spawn_blocking(move || {
        let img = preprocessing::image::decode(&bytes)?;
        let detections = detector.detect(&img)?;
        detect::annotate(&img, &detections).save_with_format(&result_path, image::ImageFormat::Png)?;
        Ok::<_, InferenceError>(detections)
    })
    .await
    .map_err(|e| InferenceError::Task(e.to_string()))??;

    info!(filename = %stored.filename, detections = detections.len(), "detection complete");

    Ok(Json(DetectResponse {
        success: true,
        original_image: format!("/uploads/{}", stored.filename),
        result_image: format!("/results/{result_name}"),
        detections,
    }))
}
