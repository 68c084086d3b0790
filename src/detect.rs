//! Single-stage lesion box detector (YOLOv8-style ONNX export) behind
//! `POST /detect`.

use crate::config::ModelConfig;
use crate::error::InferenceError;
use crate::model::{select_output, InferenceModel};
use crate::preprocessing::image::to_tensor;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use ndarray::{ArrayD, Axis, Ix3};
use serde::Serialize;
use std::sync::Arc;

const BOX_COLOR: Rgb<u8> = Rgb([255, 64, 64]);

#[derive(Debug, Clone)]
pub struct YoloParams {
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub class: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]` in original-image pixels.
    pub bbox: [f32; 4],
}

#[derive(Clone)]
pub struct LesionDetector {
    model: Arc<dyn InferenceModel>,
    labels: Vec<String>,
    params: YoloParams,
}

impl LesionDetector {
    pub fn new(model: Arc<dyn InferenceModel>, labels: Vec<String>, params: YoloParams) -> Self {
        Self {
            model,
            labels,
            params,
        }
    }

    pub fn from_config(model: Arc<dyn InferenceModel>, config: Option<&ModelConfig>) -> Self {
        let mut params = YoloParams::default();
        if let Some(size) = config.and_then(|c| c.input_size) {
            params.input_size = size;
        }
        let labels = config.map(|c| c.labels.clone()).unwrap_or_default();
        Self::new(model, labels, params)
    }

    fn label(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }

    pub fn detect(&self, img: &RgbImage) -> Result<Vec<Detection>, InferenceError> {
        let tensor = to_tensor(img, self.params.input_size, false)?;
        let outputs = self.model.run(&tensor)?;
        let head = select_output(&outputs, None, 0)?;

        let (width, height) = img.dimensions();
        let scale_x = width as f32 / self.params.input_size as f32;
        let scale_y = height as f32 / self.params.input_size as f32;

        let candidates = decode(head, &self.params, scale_x, scale_y, width, height)?;
        Ok(nms(candidates, self.params.iou_threshold, self.params.max_detections)
            .into_iter()
            .map(|c| Detection {
                class: self.label(c.class_id),
                confidence: c.score,
                bbox: c.bbox,
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    class_id: usize,
    score: f32,
    bbox: [f32; 4],
}

/// Decodes a `[1, 4 + K, N]` head: per anchor column `cx, cy, w, h` in
/// input pixels followed by K class scores.
fn decode(
    head: &ArrayD<f32>,
    params: &YoloParams,
    scale_x: f32,
    scale_y: f32,
    width: u32,
    height: u32,
) -> Result<Vec<Candidate>, InferenceError> {
    let head = head.view().into_dimensionality::<Ix3>()?;
    let head = head.index_axis(Axis(0), 0);
    let rows = head.shape()[0];
    if rows <= 4 {
        return Err(InferenceError::ShapeMismatch {
            expected: vec![1, 5, 0],
            got: vec![1, rows, head.shape()[1]],
        });
    }

    let max_x = width as f32;
    let max_y = height as f32;
    let mut candidates = Vec::new();
    for column in head.axis_iter(Axis(1)) {
        let (class_id, score) = column
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, s)| if s > best.1 { (i, s) } else { best });
        if score < params.conf_threshold {
            continue;
        }

        let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
        let bbox = [
            ((cx - w / 2.0) * scale_x).clamp(0.0, max_x),
            ((cy - h / 2.0) * scale_y).clamp(0.0, max_y),
            ((cx + w / 2.0) * scale_x).clamp(0.0, max_x),
            ((cy + h / 2.0) * scale_y).clamp(0.0, max_y),
        ];
        candidates.push(Candidate {
            class_id,
            score,
            bbox,
        });
    }
    Ok(candidates)
}

/// Class-wise non-maximum suppression, highest score first.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32, max_detections: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if keep.len() >= max_detections {
            break;
        }
        let suppressed = keep.iter().any(|k| {
            k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) >= iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection over Union for two `[x1, y1, x2, y2]` boxes.
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Copy of `img` with every detection outlined.
pub fn annotate(img: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut out = img.clone();
    for det in detections {
        let [x1, y1, x2, y2] = det.bbox;
        let w = (x2 - x1).round().max(1.0) as u32;
        let h = (y2 - y1).round().max(1.0) as u32;
        for t in 0..2 {
            let rect = Rect::at(x1.round() as i32 - t, y1.round() as i32 - t)
                .of_size(w + 2 * t as u32, h + 2 * t as u32);
            draw_hollow_rect_mut(&mut out, rect, BOX_COLOR);
        }
    }
    out
}
