//! Model loading, the ONNX Runtime backed [`InferenceModel`] implementation
//! and the process-wide registry of loaded models.

pub mod loader;
pub mod registry;
pub mod session;

use crate::error::InferenceError;
use ndarray::{Array4, ArrayD};

/// Named output tensors of a single forward pass, in graph declaration order.
pub type ModelOutputs = Vec<(String, ArrayD<f32>)>;

/// A loaded network that maps one NCHW image tensor to its raw outputs.
///
/// The pipeline only ever talks to models through this trait, so the
/// stage logic can be exercised with in-process fakes.
pub trait InferenceModel: Send + Sync {
    fn name(&self) -> &str;

    /// Where the weights were loaded from.
    fn source(&self) -> &str;

    fn run(&self, input: &Array4<f32>) -> Result<ModelOutputs, InferenceError>;
}

/// Picks an output by name, or by position when `name` is `None`.
pub fn select_output<'a>(
    outputs: &'a ModelOutputs,
    name: Option<&str>,
    position: usize,
) -> Result<&'a ArrayD<f32>, InferenceError> {
    match name {
        Some(name) => outputs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
            .ok_or_else(|| InferenceError::MissingOutput(name.to_string())),
        None => outputs
            .get(position)
            .map(|(_, t)| t)
            .ok_or_else(|| InferenceError::MissingOutput(format!("output #{position}"))),
    }
}
