use serde::Serialize;

use super::stages::round4;
use super::PipelineResult;

pub const NO_SUBTYPE_NOTE: &str = "Hemorrhage detected but no specific subtype exceeded threshold";

/// Result payload rendered by the browser page.
#[derive(Debug, Clone, Serialize)]
pub struct DisplayResults {
    pub hemorrhage_detected: bool,
    /// e.g. `"87.12%"`
    pub detection_probability: String,
    pub detection_confidence: String,
    pub subtypes: Vec<DisplaySubtype>,
    /// Every subtype score in model output order; empty when stage 2 did
    /// not run.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub all_probabilities: Vec<SubtypeProbability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubtypeProbability {
    pub name: String,
    pub probability: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisplaySubtype {
    pub name: String,
    pub probability: String,
    pub raw_probability: f64,
    pub class_index: usize,
}

pub fn percent(p: f64) -> String {
    format!("{:.2}%", p * 100.0)
}

pub fn format_for_display(result: &PipelineResult) -> DisplayResults {
    let stage1 = &result.stage1;

    let mut formatted = DisplayResults {
        hemorrhage_detected: stage1.has_hemorrhage,
        detection_probability: percent(stage1.probability),
        detection_confidence: stage1.confidence.as_str().to_string(),
        subtypes: Vec::new(),
        all_probabilities: Vec::new(),
        note: None,
    };

    if let Some(stage2) = &result.stage2 {
        if stage2.detected.is_empty() {
            formatted.note = Some(NO_SUBTYPE_NOTE.to_string());
        }
        formatted.subtypes = stage2
            .detected
            .iter()
            .map(|d| DisplaySubtype {
                name: d.subtype.name().to_string(),
                probability: percent(d.probability),
                raw_probability: d.probability,
                class_index: d.class_index,
            })
            .collect();
        formatted.all_probabilities = stage2
            .all_probabilities
            .iter()
            .map(|&(subtype, p)| SubtypeProbability {
                name: subtype.name().to_string(),
                probability: round4(p),
            })
            .collect();
    }

    formatted
}
