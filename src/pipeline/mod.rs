//! Two-stage hemorrhage pipeline: binary detection, then (only when
//! positive) multi-label subtype classification.

pub mod format;
pub mod stages;
pub mod subtype;

use crate::config::{ModelConfig, ModelRole};
use crate::error::InferenceError;
use crate::explain::gradcam::ClassActivations;
use crate::model::registry::ModelRegistry;
use crate::model::InferenceModel;
use crate::preprocessing::image::PreparedImage;
use image::RgbImage;
use std::sync::Arc;
use tracing::{debug, info};

pub use stages::{Confidence, DetectedSubtype, DetectionOutcome, SubtypeOutcome};
pub use subtype::Subtype;

/// Stage 1 is positive iff `p >= HEMORRHAGE_DETECTION_THRESHOLD`.
pub const HEMORRHAGE_DETECTION_THRESHOLD: f64 = 0.5;
/// A subtype is reported iff `p >= SUBTYPE_THRESHOLD`.
pub const SUBTYPE_THRESHOLD: f64 = 0.5;

/// Which classifier outputs carry the logits, the last brain-branch
/// feature maps, and the head weights. `None` falls back to position.
#[derive(Debug, Clone, Default)]
pub struct ClassifierOutputs {
    pub logits: Option<String>,
    pub activations: Option<String>,
    pub cam_weights: Option<String>,
}

impl ClassifierOutputs {
    pub fn from_config(config: Option<&ModelConfig>) -> Self {
        let name = |i: usize| config.and_then(|c| c.outputs.get(i).cloned());
        Self {
            logits: name(0),
            activations: name(1),
            cam_weights: name(2),
        }
    }
}

pub struct PipelineResult {
    pub stage1: DetectionOutcome,
    pub stage2: Option<SubtypeOutcome>,
    /// Present when stage 2 ran and the classifier exports CAM outputs.
    pub activations: Option<ClassActivations>,
    pub original: RgbImage,
}

impl PipelineResult {
    pub fn detected_subtypes(&self) -> &[DetectedSubtype] {
        self.stage2
            .as_ref()
            .map(|s| s.detected.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct TwoStagePipeline {
    detector: Arc<dyn InferenceModel>,
    classifier: Arc<dyn InferenceModel>,
    detector_output: Option<String>,
    classifier_outputs: ClassifierOutputs,
}

impl TwoStagePipeline {
    pub fn new(
        detector: Arc<dyn InferenceModel>,
        classifier: Arc<dyn InferenceModel>,
        detector_output: Option<String>,
        classifier_outputs: ClassifierOutputs,
    ) -> Self {
        Self {
            detector,
            classifier,
            detector_output,
            classifier_outputs,
        }
    }

    /// Fails with `ModelsNotLoaded` unless both stages are registered.
    pub fn from_registry(
        registry: &ModelRegistry,
        models: &[ModelConfig],
    ) -> Result<Self, InferenceError> {
        let detector = registry
            .get(ModelRole::Detector)
            .ok_or(InferenceError::ModelsNotLoaded)?;
        let classifier = registry
            .get(ModelRole::SubtypeClassifier)
            .ok_or(InferenceError::ModelsNotLoaded)?;

        let find = |role| models.iter().find(|m| m.role == role);
        let detector_output = find(ModelRole::Detector).and_then(|m| m.outputs.first().cloned());
        let classifier_outputs = ClassifierOutputs::from_config(find(ModelRole::SubtypeClassifier));

        Ok(Self::new(
            detector,
            classifier,
            detector_output,
            classifier_outputs,
        ))
    }

    /// Runs stage 1 and, only if it is positive, stage 2.
    pub fn run(&self, prepared: PreparedImage) -> Result<PipelineResult, InferenceError> {
        let PreparedImage { tensor, original } = prepared;

        let stage1 = stages::stage1(
            self.detector.as_ref(),
            self.detector_output.as_deref(),
            &tensor,
        )?;
        info!(
            probability = stage1.probability,
            positive = stage1.has_hemorrhage,
            confidence = stage1.confidence.as_str(),
            "stage 1 complete"
        );

        if !stage1.has_hemorrhage {
            debug!("stage 1 negative, skipping subtype classification");
            return Ok(PipelineResult {
                stage1,
                stage2: None,
                activations: None,
                original,
            });
        }

        let (stage2, activations) =
            stages::stage2(self.classifier.as_ref(), &self.classifier_outputs, &tensor)?;
        info!(
            detected = stage2.detected.len(),
            "stage 2 complete"
        );

        Ok(PipelineResult {
            stage1,
            stage2: Some(stage2),
            activations,
            original,
        })
    }
}
