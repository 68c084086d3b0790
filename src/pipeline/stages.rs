use crate::error::InferenceError;
use crate::explain::gradcam::ClassActivations;
use crate::model::{select_output, InferenceModel};
use ndarray::Array4;
use serde::Serialize;
use tracing::warn;

use super::{ClassifierOutputs, Subtype, HEMORRHAGE_DETECTION_THRESHOLD};

/// How far the stage-1 probability sits from the decision boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// `High` outside [0.3, 0.7], `Medium` outside [0.4, 0.6], `Low` otherwise.
    pub fn from_probability(p: f64) -> Self {
        if p < 0.3 || p > 0.7 {
            Confidence::High
        } else if p < 0.4 || p > 0.6 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionOutcome {
    pub has_hemorrhage: bool,
    /// Rounded to 4 decimals.
    pub probability: f64,
    pub confidence: Confidence,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectedSubtype {
    pub subtype: Subtype,
    /// Rounded to 4 decimals.
    pub probability: f64,
    pub class_index: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubtypeOutcome {
    /// Subtypes at or above threshold, most probable first.
    pub detected: Vec<DetectedSubtype>,
    /// Every subtype in logit order.
    pub all_probabilities: Vec<(Subtype, f64)>,
}

pub fn sigmoid(x: f32) -> f64 {
    1.0 / (1.0 + (-(x as f64)).exp())
}

pub fn round4(p: f64) -> f64 {
    (p * 10_000.0).round() / 10_000.0
}

/// Stage 1: binary hemorrhage detection from a single logit.
pub fn stage1(
    detector: &dyn InferenceModel,
    output: Option<&str>,
    tensor: &Array4<f32>,
) -> Result<DetectionOutcome, InferenceError> {
    let outputs = detector.run(tensor)?;
    let logits = select_output(&outputs, output, 0)?;
    let logit = *logits.iter().next().ok_or_else(|| InferenceError::ShapeMismatch {
        expected: vec![1],
        got: logits.shape().to_vec(),
    })?;

    let probability = sigmoid(logit);
    Ok(DetectionOutcome {
        has_hemorrhage: probability >= HEMORRHAGE_DETECTION_THRESHOLD,
        probability: round4(probability),
        confidence: Confidence::from_probability(probability),
        threshold: HEMORRHAGE_DETECTION_THRESHOLD,
    })
}

/// Stage 2: multi-label subtype classification. Also returns the CAM
/// inputs when the classifier exports them.
pub fn stage2(
    classifier: &dyn InferenceModel,
    names: &ClassifierOutputs,
    tensor: &Array4<f32>,
) -> Result<(SubtypeOutcome, Option<ClassActivations>), InferenceError> {
    let outputs = classifier.run(tensor)?;

    let logits = select_output(&outputs, names.logits.as_deref(), 0)?;
    if logits.len() != Subtype::ALL.len() {
        return Err(InferenceError::ShapeMismatch {
            expected: vec![1, Subtype::ALL.len()],
            got: logits.shape().to_vec(),
        });
    }

    let all_probabilities: Vec<(Subtype, f64)> = Subtype::ALL
        .iter()
        .zip(logits.iter())
        .map(|(&subtype, &logit)| (subtype, sigmoid(logit)))
        .collect();

    let mut detected: Vec<DetectedSubtype> = all_probabilities
        .iter()
        .filter(|(subtype, p)| *p >= subtype.threshold())
        .map(|&(subtype, p)| DetectedSubtype {
            subtype,
            probability: round4(p),
            class_index: subtype.index(),
        })
        .collect();
    detected.sort_by(|a, b| b.probability.total_cmp(&a.probability));

    let activations = match (
        select_output(&outputs, names.activations.as_deref(), 1),
        select_output(&outputs, names.cam_weights.as_deref(), 2),
    ) {
        (Ok(acts), Ok(weights)) => Some(ClassActivations::new(acts.clone(), weights.clone())?),
        _ => {
            warn!(
                model = classifier.name(),
                "classifier does not export CAM outputs, explanations disabled"
            );
            None
        }
    };

    Ok((
        SubtypeOutcome {
            detected,
            all_probabilities: all_probabilities
                .into_iter()
                .map(|(s, p)| (s, round4(p)))
                .collect(),
        },
        activations,
    ))
}
