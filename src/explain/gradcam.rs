//! Grad-CAM over the last convolutional block of the brain branch.
//!
//! The subtype head is `GAP -> concat -> dropout -> linear`, so the
//! gradient of class score `k` with respect to activation `A[c, i, j]` is
//! the constant `W[k, c] / (h * w)`. Averaging it over the spatial grid
//! gives the Grad-CAM channel weight directly from the head weights,
//! which the exported graph exposes as a constant output. No backward
//! pass is needed at serving time.

use crate::error::InferenceError;
use ndarray::{Array2, Array3, ArrayD, Axis, Ix2, Ix3, Ix4};

/// Feature maps and head weights captured from one stage-2 forward pass.
#[derive(Debug, Clone)]
pub struct ClassActivations {
    /// `[C, h, w]`
    activations: Array3<f32>,
    /// `[K, C]`
    weights: Array2<f32>,
}

impl ClassActivations {
    /// Accepts activations as `[1, C, h, w]` or `[C, h, w]` and weights as
    /// `[K, C]`.
    pub fn new(activations: ArrayD<f32>, weights: ArrayD<f32>) -> Result<Self, InferenceError> {
        let activations = match activations.ndim() {
            4 => activations
                .into_dimensionality::<Ix4>()?
                .index_axis_move(Axis(0), 0),
            _ => activations.into_dimensionality::<Ix3>()?,
        };
        let weights = weights.into_dimensionality::<Ix2>()?;

        let channels = activations.shape()[0];
        if weights.shape()[1] != channels {
            return Err(InferenceError::ShapeMismatch {
                expected: vec![weights.shape()[0], channels],
                got: weights.shape().to_vec(),
            });
        }

        Ok(Self {
            activations,
            weights,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.weights.shape()[0]
    }

    /// Spatial size `(h, w)` of the feature grid.
    pub fn grid(&self) -> (usize, usize) {
        (self.activations.shape()[1], self.activations.shape()[2])
    }

    /// Channel weights: spatial mean of d(score_k)/dA.
    fn channel_weights(&self, class_idx: usize) -> Array2<f32> {
        let (h, w) = self.grid();
        let scale = 1.0 / (h * w).max(1) as f32;
        self.weights
            .row(class_idx)
            .mapv(|v| v * scale)
            .insert_axis(Axis(1))
    }

    /// Class activation map for `class_idx`, min-max normalised to `[0, 1]`.
    pub fn cam(&self, class_idx: usize) -> Result<Array2<f32>, InferenceError> {
        if class_idx >= self.num_classes() {
            return Err(InferenceError::ShapeMismatch {
                expected: vec![self.num_classes()],
                got: vec![class_idx],
            });
        }

        let (h, w) = self.grid();
        let channels = self.activations.shape()[0];
        let weights = self.channel_weights(class_idx);

        let flat = self
            .activations
            .view()
            .into_shape_with_order((channels, h * w))?;
        // [1, C] x [C, h*w] -> [1, h*w]
        let cam = weights.t().dot(&flat);
        let mut cam = cam.into_shape_with_order((h, w))?;

        cam.mapv_inplace(|v| v.max(0.0));
        normalize(&mut cam);
        Ok(cam)
    }
}

/// `cam -= min; if max > 0 { cam /= max }`
pub fn normalize(cam: &mut Array2<f32>) {
    let min = cam.iter().copied().fold(f32::INFINITY, f32::min);
    if min.is_finite() {
        cam.mapv_inplace(|v| v - min);
    }
    let max = cam.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        cam.mapv_inplace(|v| v / max);
    }
}
