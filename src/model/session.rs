use crate::error::InferenceError;
use crate::model::{InferenceModel, ModelOutputs};
use ndarray::{Array4, ArrayD, IxDyn};
use ort::session::{Session, SessionInputValue};
use ort::value::TensorRef;
use std::sync::Mutex;

/// An ONNX Runtime session behind a mutex; `Session::run` needs `&mut`.
pub struct OrtModel {
    name: String,
    source: String,
    session: Mutex<Session>,
}

impl OrtModel {
    pub fn new(name: impl Into<String>, source: impl Into<String>, session: Session) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            session: Mutex::new(session),
        }
    }
}

impl InferenceModel for OrtModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn source(&self) -> &str {
        &self.source
    }

    /// Feeds `input` to every declared graph input. The dual-branch CT
    /// networks take a brain-window and a bone-window image; deployment
    /// only has one image, so both branches see the same tensor.
    fn run(&self, input: &Array4<f32>) -> Result<ModelOutputs, InferenceError> {
        let dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let data = input.as_slice().ok_or_else(|| {
            InferenceError::PreprocessingError("input tensor is not contiguous".to_string())
        })?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::Task(format!("session lock poisoned: {}", self.name)))?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        let mut feeds: Vec<(String, SessionInputValue<'_>)> = Vec::with_capacity(input_names.len());
        for name in input_names {
            let tensor = TensorRef::from_array_view((dims.clone(), data))?;
            feeds.push((name, tensor.into()));
        }

        let outputs = session.run(feeds)?;

        let mut results = Vec::with_capacity(output_names.len());
        for name in output_names {
            let (shape, values) = outputs[name.as_str()].try_extract_tensor::<f32>()?;
            let shape: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
            let array = ArrayD::from_shape_vec(IxDyn(&shape), values.to_vec())?;
            results.push((name, array));
        }

        Ok(results)
    }
}
