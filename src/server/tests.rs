use crate::config::ModelRole;
use crate::error::InferenceError;
use crate::model::registry::ModelRegistry;
use crate::model::{InferenceModel, ModelOutputs};
use crate::pipeline::testing::{FixedClassifier, FixedDetector};
use crate::server::{routes, types::AppState};
use crate::storage::FileStore;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use image::{ImageFormat, RgbImage};
use ndarray::{Array4, ArrayD, IxDyn};
use serde_json::{json, Value};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt; // for `app.oneshot()`

const MB: usize = 1024 * 1024;
const BOUNDARY: &str = "ctscan-test-boundary";

fn state(dir: &Path, registry: ModelRegistry, max_upload_bytes: usize) -> AppState {
    let store = FileStore::new(
        dir.join("uploads"),
        dir.join("results"),
        Duration::from_secs(24 * 3600),
    );
    store.ensure_dirs().unwrap();
    AppState {
        registry,
        models: vec![],
        store,
        max_upload_bytes,
        metrics: None,
    }
}

fn ready_registry(detector: Arc<FixedDetector>, classifier: Arc<FixedClassifier>) -> ModelRegistry {
    let registry = ModelRegistry::new();
    registry.register(ModelRole::Detector, detector);
    registry.register(ModelRole::SubtypeClassifier, classifier);
    registry
}

fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_pixel(64, 64, image::Rgb([90, 90, 90]));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

fn multipart_request(uri: &str, field: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn upload(app: &Router) -> String {
    let (status, body) = send(app, multipart_request("/api/upload", "file", "scan.png", &png_bytes())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["filename"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_check() {
    let dir = TempDir::new().unwrap();
    let app = routes::create_router(state(dir.path(), ModelRegistry::new(), 16 * MB));

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"OK");
}

#[tokio::test]
async fn test_index_page_served() {
    let dir = TempDir::new().unwrap();
    let app = routes::create_router(state(dir.path(), ModelRegistry::new(), 16 * MB));

    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(std::str::from_utf8(&bytes).unwrap().contains("/api/analyze"));
}

#[tokio::test]
async fn test_model_info_reports_load_failure() {
    let dir = TempDir::new().unwrap();
    let registry = ModelRegistry::new();
    registry.record_failure(ModelRole::Detector, "Model not found at path: x.onnx".to_string());
    let app = routes::create_router(state(dir.path(), registry, 16 * MB));

    let (status, body) = send(&app, get("/api/model-info")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert_eq!(body["errors"]["detector"], "Model not found at path: x.onnx");
    assert_eq!(body["stage1"]["loaded"], false);
    assert_eq!(body["stage2"]["subtypes"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn test_model_info_ready() {
    let dir = TempDir::new().unwrap();
    let registry = ready_registry(
        Arc::new(FixedDetector::new(0.5)),
        Arc::new(FixedClassifier::new([0.0; 6])),
    );
    let app = routes::create_router(state(dir.path(), registry, 16 * MB));

    let (_, body) = send(&app, get("/api/model-info")).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["device"], "cpu");
    assert!(body.get("errors").is_none());
    assert!(body.get("lesion_detector").is_none());
}

#[tokio::test]
async fn test_upload_requires_models() {
    let dir = TempDir::new().unwrap();
    let app = routes::create_router(state(dir.path(), ModelRegistry::new(), 16 * MB));

    let (status, body) = send(&app, multipart_request("/api/upload", "file", "scan.png", &png_bytes())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], InferenceError::ModelsNotLoaded.to_string());
}

#[tokio::test]
async fn test_upload_rejects_non_image_extension() {
    let dir = TempDir::new().unwrap();
    let registry = ready_registry(
        Arc::new(FixedDetector::new(0.5)),
        Arc::new(FixedClassifier::new([0.0; 6])),
    );
    let app = routes::create_router(state(dir.path(), registry, 16 * MB));

    let (status, body) = send(&app, multipart_request("/api/upload", "file", "notes.txt", b"hello")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid file type. Allowed: png, jpg, jpeg");
    assert_eq!(std::fs::read_dir(dir.path().join("uploads")).unwrap().count(), 0);
}

#[tokio::test]
async fn test_upload_without_file_field() {
    let dir = TempDir::new().unwrap();
    let registry = ready_registry(
        Arc::new(FixedDetector::new(0.5)),
        Arc::new(FixedClassifier::new([0.0; 6])),
    );
    let app = routes::create_router(state(dir.path(), registry, 16 * MB));

    let (status, body) = send(&app, multipart_request("/api/upload", "image", "scan.png", &png_bytes())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No file provided");
}

#[tokio::test]
async fn test_upload_too_large() {
    let dir = TempDir::new().unwrap();
    let registry = ready_registry(
        Arc::new(FixedDetector::new(0.5)),
        Arc::new(FixedClassifier::new([0.0; 6])),
    );
    let app = routes::create_router(state(dir.path(), registry, 2 * MB));

    let oversized = vec![0u8; 3 * MB];
    let (status, body) = send(&app, multipart_request("/api/upload", "file", "scan.png", &oversized)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"], "File too large. Maximum size is 2MB.");
}

#[tokio::test]
async fn test_analyze_validates_filename() {
    let dir = TempDir::new().unwrap();
    let registry = ready_registry(
        Arc::new(FixedDetector::new(0.5)),
        Arc::new(FixedClassifier::new([0.0; 6])),
    );
    let app = routes::create_router(state(dir.path(), registry, 16 * MB));

    let (status, body) = send(&app, json_request("/api/analyze", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No filename provided");

    let (status, body) = send(&app, json_request("/api/analyze", json!({"filename": "missing.png"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "File not found");

    let (status, _) = send(&app, json_request("/api/analyze", json!({"filename": "../Cargo.toml"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_analyze_negative_skips_subtypes() {
    let dir = TempDir::new().unwrap();
    let detector = Arc::new(FixedDetector::new(0.2));
    let classifier = Arc::new(FixedClassifier::new([0.9; 6]));
    let app = routes::create_router(state(
        dir.path(),
        ready_registry(detector.clone(), classifier.clone()),
        16 * MB,
    ));

    let filename = upload(&app).await;
    let (status, body) = send(&app, json_request("/api/analyze", json!({ "filename": filename }))).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["results"]["hemorrhage_detected"], false);
    assert_eq!(body["results"]["detection_probability"], "20.00%");
    assert_eq!(body["results"]["detection_confidence"], "High");
    assert!(body["results"]["subtypes"].as_array().unwrap().is_empty());
    assert!(body["results"].get("note").is_none());
    assert!(body["gradcam"].as_array().unwrap().is_empty());
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_analyze_positive_generates_gradcam() {
    let dir = TempDir::new().unwrap();
    let detector = Arc::new(FixedDetector::new(0.9));
    let classifier = Arc::new(FixedClassifier::new([0.8, 0.1, 0.1, 0.1, 0.1, 0.1]));
    let app = routes::create_router(state(
        dir.path(),
        ready_registry(detector, classifier),
        16 * MB,
    ));

    let filename = upload(&app).await;
    let file_id = filename.trim_end_matches(".png").to_string();
    let (status, body) = send(&app, json_request("/api/analyze", json!({ "filename": filename }))).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["results"]["hemorrhage_detected"], true);
    assert_eq!(body["results"]["subtypes"][0]["name"], "Intraventricular");
    assert_eq!(body["results"]["subtypes"][0]["probability"], "80.00%");
    assert_eq!(body["results"]["all_probabilities"].as_array().unwrap().len(), 6);

    let gradcam = body["gradcam"].as_array().unwrap();
    assert_eq!(gradcam.len(), 1);
    let expected_url = format!("/static/results/{file_id}_Intraventricular_gradcam.png");
    assert_eq!(gradcam[0]["image_url"], expected_url.as_str());
    assert_eq!(gradcam[0]["subtype"], "Intraventricular");
    assert!(!gradcam[0]["boxes"].as_array().unwrap().is_empty());
    assert!(dir
        .path()
        .join("results")
        .join(format!("{file_id}_Intraventricular_gradcam.png"))
        .exists());

    let response = app.clone().oneshot(get(&expected_url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_analyze_positive_without_subtypes_adds_note() {
    let dir = TempDir::new().unwrap();
    let app = routes::create_router(state(
        dir.path(),
        ready_registry(
            Arc::new(FixedDetector::new(0.65)),
            Arc::new(FixedClassifier::new([0.1; 6])),
        ),
        16 * MB,
    ));

    let filename = upload(&app).await;
    let (_, body) = send(&app, json_request("/api/analyze", json!({ "filename": filename }))).await;
    assert_eq!(body["results"]["hemorrhage_detected"], true);
    assert_eq!(body["results"]["detection_confidence"], "Medium");
    assert_eq!(
        body["results"]["note"],
        "Hemorrhage detected but no specific subtype exceeded threshold"
    );
    assert!(body["gradcam"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_analyze_corrupt_image() {
    let dir = TempDir::new().unwrap();
    let app = routes::create_router(state(
        dir.path(),
        ready_registry(
            Arc::new(FixedDetector::new(0.9)),
            Arc::new(FixedClassifier::new([0.9; 6])),
        ),
        16 * MB,
    ));

    let (status, body) = send(&app, multipart_request("/api/upload", "file", "scan.jpg", b"not a jpeg")).await;
    assert_eq!(status, StatusCode::OK);
    let filename = body["filename"].as_str().unwrap().to_string();

    let (status, body) = send(&app, json_request("/api/analyze", json!({ "filename": filename }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid image data");
}

/// One confident box centred in a 640x640 input.
struct OneBoxYolo;

impl InferenceModel for OneBoxYolo {
    fn name(&self) -> &str {
        "one-box"
    }
    fn source(&self) -> &str {
        "memory"
    }
    fn run(&self, _input: &Array4<f32>) -> Result<ModelOutputs, InferenceError> {
        let head = ArrayD::from_shape_vec(IxDyn(&[1, 5, 1]), vec![320.0, 320.0, 100.0, 100.0, 0.8])?;
        Ok(vec![("output0".to_string(), head)])
    }
}

#[tokio::test]
async fn test_detect_requires_lesion_detector() {
    let dir = TempDir::new().unwrap();
    let app = routes::create_router(state(dir.path(), ModelRegistry::new(), 16 * MB));

    let (status, _) = send(&app, multipart_request("/detect", "file", "scan.png", &png_bytes())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_detect_returns_boxes_and_result_image() {
    let dir = TempDir::new().unwrap();
    let registry = ModelRegistry::new();
    registry.register(ModelRole::LesionDetector, Arc::new(OneBoxYolo));
    let app = routes::create_router(state(dir.path(), registry, 16 * MB));

    let (status, body) = send(&app, multipart_request("/detect", "file", "scan.png", &png_bytes())).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);

    let detections = body["detections"].as_array().unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0]["class"], "class_0");
    // 640 -> 64 px original: box 270..370 scales to 27..37.
    assert_eq!(detections[0]["bbox"], json!([27.0, 27.0, 37.0, 37.0]));

    let original = body["original_image"].as_str().unwrap();
    assert!(original.starts_with("/uploads/"));
    let response = app.clone().oneshot(get(original)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let result = body["result_image"].as_str().unwrap();
    let response = app.clone().oneshot(get(result)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_detect_accepts_gif_but_analyze_does_not() {
    let dir = TempDir::new().unwrap();
    let registry = ready_registry(
        Arc::new(FixedDetector::new(0.5)),
        Arc::new(FixedClassifier::new([0.0; 6])),
    );
    registry.register(ModelRole::LesionDetector, Arc::new(OneBoxYolo));
    let app = routes::create_router(state(dir.path(), registry, 16 * MB));

    let img = RgbImage::new(32, 32);
    let mut gif = Vec::new();
    img.write_to(&mut Cursor::new(&mut gif), ImageFormat::Gif).unwrap();

    let (status, _) = send(&app, multipart_request("/api/upload", "file", "scan.gif", &gif)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, multipart_request("/detect", "file", "scan.gif", &gif)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_route_without_exporter() {
    let dir = TempDir::new().unwrap();
    let app = routes::create_router(state(dir.path(), ModelRegistry::new(), 16 * MB));

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_analyze_malformed_json_is_json_error() {
    let dir = TempDir::new().unwrap();
    let registry = ready_registry(
        Arc::new(FixedDetector::new(0.5)),
        Arc::new(FixedClassifier::new([0.0; 6])),
    );
    let app = routes::create_router(state(dir.path(), registry, 16 * MB));

    let request = Request::builder()
        .method("POST")
        .uri("/api/analyze")
        .header("content-type", "application/json")
        .body(Body::from("not json"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("JSON"));

    let request = Request::builder()
        .method("POST")
        .uri("/api/analyze")
        .body(Body::from(r#"{"filename":"x.png"}"#))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(body["error"].as_str().unwrap().contains("application/json"));
}

#[tokio::test]
async fn test_upload_non_multipart_is_json_error() {
    let dir = TempDir::new().unwrap();
    let registry = ready_registry(
        Arc::new(FixedDetector::new(0.5)),
        Arc::new(FixedClassifier::new([0.0; 6])),
    );
    registry.register(ModelRole::LesionDetector, Arc::new(OneBoxYolo));
    let app = routes::create_router(state(dir.path(), registry, 16 * MB));

    for uri in ["/api/upload", "/detect"] {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "text/plain")
            .body(Body::from("hello"))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(body["error"].is_string(), "{uri}: {body}");
    }
}
