use image::imageops::FilterType;
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use ndarray::Array2;
use serde::Serialize;

/// Heatmap weight in the blended overlay.
pub const OVERLAY_ALPHA: f32 = 0.45;
/// CAM level above which a pixel counts as part of a hot region.
pub const BOX_THRESHOLD: f32 = 0.5;
/// Regions whose bounding box covers less than this many pixels are dropped.
pub const MIN_BOX_AREA: u32 = 100;
pub const BOX_THICKNESS: i32 = 2;

/// Axis-aligned box in original-image pixels: `(x, y, w, h)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

/// Bilinear resize of a normalised CAM to `width` x `height`.
pub fn resize_cam(cam: &Array2<f32>, width: u32, height: u32) -> ImageBuffer<Luma<f32>, Vec<f32>> {
    let (h, w) = cam.dim();
    let data: Vec<f32> = cam.iter().copied().collect();
    let small = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(w as u32, h as u32, data)
        .unwrap_or_else(|| ImageBuffer::new(w as u32, h as u32));
    image::imageops::resize(&small, width, height, FilterType::Triangle)
}

/// JET colormap: blue (0.0) through cyan, yellow to red (1.0).
pub fn jet(value: f32) -> Rgb<u8> {
    let v = value.clamp(0.0, 1.0);
    let channel = |offset: f32| ((1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// `original * (1 - alpha) + jet(cam) * alpha`
pub fn blend_heatmap(
    original: &RgbImage,
    cam: &ImageBuffer<Luma<f32>, Vec<f32>>,
    alpha: f32,
) -> RgbImage {
    let mut out = original.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let heat = jet(cam.get_pixel(x, y)[0]);
        for c in 0..3 {
            let mixed = pixel[c] as f32 * (1.0 - alpha) + heat[c] as f32 * alpha;
            pixel[c] = mixed.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Bounding boxes of the outer borders of regions where `cam > threshold`.
///
/// The mask carries a 1 px background frame so regions touching the image
/// edge still come back as top-level outer borders.
pub fn extract_boxes(
    cam: &ImageBuffer<Luma<f32>, Vec<f32>>,
    threshold: f32,
    min_area: u32,
) -> Vec<RegionBox> {
    let mut mask = GrayImage::new(cam.width() + 2, cam.height() + 2);
    for (x, y, pixel) in cam.enumerate_pixels() {
        if pixel[0] > threshold {
            mask.put_pixel(x + 1, y + 1, Luma([255]));
        }
    }

    find_contours::<u32>(&mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
        .filter_map(|contour| {
            let xs = contour.points.iter().map(|p| p.x);
            let ys = contour.points.iter().map(|p| p.y);
            let (x0, x1) = (xs.clone().min()?, xs.max()?);
            let (y0, y1) = (ys.clone().min()?, ys.max()?);
            let region = RegionBox {
                x: x0.saturating_sub(1),
                y: y0.saturating_sub(1),
                w: x1 - x0 + 1,
                h: y1 - y0 + 1,
            };
            (region.w * region.h >= min_area).then_some(region)
        })
        .collect()
}

pub fn draw_boxes(img: &mut RgbImage, boxes: &[RegionBox], color: Rgb<u8>, thickness: i32) {
    for region in boxes {
        for t in 0..thickness {
            let rect = Rect::at(region.x as i32 - t, region.y as i32 - t)
                .of_size(region.w + 2 * t as u32, region.h + 2 * t as u32);
            draw_hollow_rect_mut(img, rect, color);
        }
    }
}
