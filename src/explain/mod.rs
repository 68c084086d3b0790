//! Visual explanations for detected subtypes: Grad-CAM heatmaps blended
//! over the original scan, with boxes around the hottest regions.

pub mod gradcam;
pub mod overlay;

use crate::error::InferenceError;
use crate::pipeline::{DetectedSubtype, Subtype};
use gradcam::ClassActivations;
use image::RgbImage;
use overlay::RegionBox;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct Explanation {
    pub subtype: Subtype,
    pub probability: f64,
    pub boxes: Vec<RegionBox>,
    /// Original image with heatmap and boxes drawn in.
    pub overlay: RgbImage,
}

impl Explanation {
    /// `<file_id>_<Subtype_Name>_gradcam.png`
    pub fn file_name(&self, file_id: &str) -> String {
        format!("{}_{}_gradcam.png", file_id, self.subtype.file_stem())
    }

    pub fn save(&self, dir: &Path, file_id: &str) -> Result<PathBuf, InferenceError> {
        let path = dir.join(self.file_name(file_id));
        self.overlay.save_with_format(&path, image::ImageFormat::Png)?;
        Ok(path)
    }
}

/// One explanation per detected subtype, in the order given.
pub fn explain_subtypes(
    activations: &ClassActivations,
    original: &RgbImage,
    detected: &[DetectedSubtype],
) -> Result<Vec<Explanation>, InferenceError> {
    let (width, height) = original.dimensions();

    detected
        .iter()
        .map(|d| {
            let cam = activations.cam(d.class_index)?;
            let cam = overlay::resize_cam(&cam, width, height);

            let mut image = overlay::blend_heatmap(original, &cam, overlay::OVERLAY_ALPHA);
            let boxes = overlay::extract_boxes(&cam, overlay::BOX_THRESHOLD, overlay::MIN_BOX_AREA);
            overlay::draw_boxes(&mut image, &boxes, d.subtype.color(), overlay::BOX_THICKNESS);
            debug!(subtype = d.subtype.name(), boxes = boxes.len(), "explanation generated");

            Ok(Explanation {
                subtype: d.subtype,
                probability: d.probability,
                boxes,
                overlay: image,
            })
        })
        .collect()
}
