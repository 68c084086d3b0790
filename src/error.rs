use axum::{
    extract::{multipart::MultipartRejection, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ndarray::ShapeError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Model not found at path: {0}")]
    ModelNotFound(String),

    #[error("Models not loaded. Please restart the server.")]
    ModelsNotLoaded,

    #[error("Lesion detector not loaded. Configure a lesion_detector model and restart the server.")]
    DetectorUnavailable,

    #[error("ONNX Runtime error: {0}")]
    OrtError(#[from] ort::Error),

    #[error("Image processing error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Input shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Model output missing: {0}")]
    MissingOutput(String),

    #[error("Preprocessing error: {0}")]
    PreprocessingError(String),

    #[error("Shape error: {0}")]
    ShapeError(#[from] ShapeError),

    #[error("{0}")]
    InvalidUpload(String),

    #[error("File too large. Maximum size is {max_mb}MB.")]
    PayloadTooLarge { max_mb: usize },

    /// A request the extractors could not parse (wrong content type,
    /// malformed JSON, missing multipart boundary).
    #[error("{message}")]
    BadRequest { status: StatusCode, message: String },

    #[error("File not found")]
    FileNotFound,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Inference task failed: {0}")]
    Task(String),
}

impl InferenceError {
    pub fn status(&self) -> StatusCode {
        match self {
            InferenceError::ModelsNotLoaded | InferenceError::DetectorUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            InferenceError::ImageError(_)
            | InferenceError::PreprocessingError(_)
            | InferenceError::InvalidUpload(_)
            | InferenceError::ShapeMismatch { .. } => StatusCode::BAD_REQUEST,
            InferenceError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            InferenceError::FileNotFound => StatusCode::NOT_FOUND,
            InferenceError::BadRequest { status, .. } => *status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for InferenceError {
    fn from(rejection: JsonRejection) -> Self {
        InferenceError::BadRequest {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<MultipartRejection> for InferenceError {
    fn from(rejection: MultipartRejection) -> Self {
        InferenceError::BadRequest {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for InferenceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            InferenceError::ImageError(_) => "Invalid image data".to_string(),
            InferenceError::OrtError(_) | InferenceError::Io(_) | InferenceError::Task(_) => {
                tracing::error!(error = %self, "request failed");
                "Analysis failed: internal server error".to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(json!({
            "error": error_message
        }));

        (status, body).into_response()
    }
}
