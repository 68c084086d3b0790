use crate::error::InferenceError;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{Array, Array4, Axis};

/// Edge length the classification stages were trained on.
pub const CLASSIFIER_INPUT_SIZE: u32 = 224;

// ImageNet Standards
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Preprocessed classifier input together with the decoded original,
/// which the explanation overlay is drawn on.
pub struct PreparedImage {
    pub tensor: Array4<f32>,
    pub original: RgbImage,
}

/// Decodes raw bytes (format guessed from content) into RGB8.
pub fn decode(buffer: &[u8]) -> Result<RgbImage, InferenceError> {
    let img = image::load_from_memory(buffer).map_err(InferenceError::ImageError)?;
    Ok(img.to_rgb8())
}

/// Resizes to `size`x`size` and packs into a `[1, 3, size, size]` tensor.
/// With `normalize`, channels get ImageNet mean/std; otherwise they stay
/// in `[0, 1]`.
pub fn to_tensor(img: &RgbImage, size: u32, normalize: bool) -> Result<Array4<f32>, InferenceError> {
    let resized = image::imageops::resize(img, size, size, FilterType::Triangle);
    let side = size as usize;

    let mut data = Vec::with_capacity(3 * side * side);
    for pixel in resized.pixels() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            data.push(if normalize { (v - MEAN[c]) / STD[c] } else { v });
        }
    }

    // Shape: [H, W, C] -> Permute to [C, H, W] -> Add Batch [1, C, H, W]
    let array = Array::from_shape_vec((side, side, 3), data)
        .map_err(|e| InferenceError::PreprocessingError(e.to_string()))?;
    let array = array.permuted_axes([2, 0, 1]);
    let array = array.insert_axis(Axis(0));

    // Ensure standard layout (contiguous)
    Ok(array.as_standard_layout().to_owned())
}

/// Preprocesses image bytes for the classification stages.
/// The tensor has shape [1, 3, 224, 224].
pub fn process_bytes(buffer: &[u8]) -> Result<PreparedImage, InferenceError> {
    let original = decode(buffer)?;
    let tensor = to_tensor(&original, CLASSIFIER_INPUT_SIZE, true)?;
    Ok(PreparedImage { tensor, original })
}
