use crate::config::ModelConfig;
use crate::error::InferenceError;
use crate::model::registry::ModelRegistry;
use crate::model::session::OrtModel;
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

// Initialize the global environment for ORT (only needed once)
pub fn init_ort() -> Result<(), InferenceError> {
    ort::init().with_name("ctscan-triage").commit()?;
    Ok(())
}

/// Loads an ONNX model from disk and creates an inference session.
///
/// # Arguments
/// * `model_path` - Path to the .onnx file
/// * `intra_threads` - Parallelism within a single op
pub fn load_model(
    model_path: impl AsRef<Path>,
    intra_threads: usize,
) -> Result<Session, InferenceError> {
    let path = model_path.as_ref();
    if !path.exists() {
        return Err(InferenceError::ModelNotFound(path.display().to_string()));
    }

    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .commit_from_file(path)?;

    info!(model = %path.display(), "loaded model");
    for (i, input) in session.inputs.iter().enumerate() {
        info!("  input {}: {} ({:?})", i, input.name, input.input_type);
    }
    for (i, output) in session.outputs.iter().enumerate() {
        info!("  output {}: {} ({:?})", i, output.name, output.output_type);
    }

    Ok(session)
}

/// Loads every configured model into `registry`.
///
/// A model that fails to load does not abort startup; the failure is
/// recorded so `/api/model-info` can report it.
pub fn load_all(models: &[ModelConfig], registry: &ModelRegistry) {
    for model_conf in models {
        info!(
            role = model_conf.role.as_str(),
            name = %model_conf.name,
            "loading model"
        );
        match load_model(&model_conf.path, model_conf.intra_threads) {
            Ok(session) => {
                let model = OrtModel::new(&model_conf.name, &model_conf.path, session);
                registry.register(model_conf.role, Arc::new(model));
            }
            Err(e) => {
                error!(
                    role = model_conf.role.as_str(),
                    path = %model_conf.path,
                    error = %e,
                    "failed to load model"
                );
                registry.record_failure(model_conf.role, e.to_string());
            }
        }
    }
}
