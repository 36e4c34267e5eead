use image::{DynamicImage, GenericImageView, imageops::FilterType};

use crate::params::ImageCrop;
use crate::pixel::{ColorImage, PixelImage};

/// Output of the image preprocessor (spec §4.1): always a grayscale target,
/// plus an RGB copy when color mode needs it.
pub struct Preprocessed {
    pub gray: PixelImage,
    pub color: Option<ColorImage>,
}

/// Preprocess raw image bytes into a `target_edge x target_edge` raster.
///
/// Malformed bytes never propagate as an error (spec §7 category 2): the
/// caller gets a deterministic fallback gradient and `decode_failed` is set
/// so the progress stream can surface a warning.
pub fn preprocess(
    bytes: &[u8],
    crop: &ImageCrop,
    target_edge: u32,
    want_color: bool,
) -> (Preprocessed, bool) {
    match image::load_from_memory(bytes) {
        Ok(img) => (preprocess_decoded(img, crop, target_edge, want_color), false),
        Err(e) => {
            log::warn!("image decode failed, using fallback gradient: {e}");
            (fallback_gradient(target_edge, want_color), true)
        }
    }
}

fn preprocess_decoded(
    img: DynamicImage,
    crop: &ImageCrop,
    target_edge: u32,
    want_color: bool,
) -> Preprocessed {
    let (w, h) = img.dimensions();
    let side = ((w.min(h) as f64) / crop.scale).max(1.0);
    let cx = w as f64 / 2.0 + crop.offset_x * (w as f64 - side) / 2.0;
    let cy = h as f64 / 2.0 + crop.offset_y * (h as f64 - side) / 2.0;

    let left = (cx - side / 2.0).clamp(0.0, (w as f64 - side).max(0.0));
    let top = (cy - side / 2.0).clamp(0.0, (h as f64 - side).max(0.0));
    let side_u = side.round().max(1.0) as u32;
    let left_u = left.round() as u32;
    let top_u = top.round() as u32;
    let side_u = side_u.min(w.saturating_sub(left_u)).min(h.saturating_sub(top_u)).max(1);

    let cropped = img.crop_imm(left_u, top_u, side_u, side_u);
    let resized = cropped.resize_exact(target_edge, target_edge, FilterType::Lanczos3);

    let color = if want_color {
        let rgb = resized.to_rgb8();
        Some(ColorImage {
            width: target_edge,
            height: target_edge,
            data: rgb.pixels().map(|p| (p[0], p[1], p[2])).collect(),
        })
    } else {
        None
    };

    let luma = resized.to_luma8();
    let stretched = histogram_stretch(luma.as_raw());
    let contrasted: Vec<u8> = stretched
        .iter()
        .map(|&v| ((1.3 * v as f64 - 30.0).clamp(0.0, 255.0)) as u8)
        .collect();

    Preprocessed {
        gray: PixelImage {
            width: target_edge,
            height: target_edge,
            data: contrasted,
        },
        color,
    }
}

fn histogram_stretch(data: &[u8]) -> Vec<u8> {
    let min = *data.iter().min().unwrap_or(&0);
    let max = *data.iter().max().unwrap_or(&255);
    if max <= min {
        return data.to_vec();
    }
    let range = (max - min) as f64;
    data.iter()
        .map(|&v| (((v - min) as f64) * 255.0 / range).round() as u8)
        .collect()
}

fn fallback_gradient(target_edge: u32, want_color: bool) -> Preprocessed {
    let n = (target_edge + target_edge).max(1);
    let gray_data: Vec<u8> = (0..target_edge * target_edge)
        .map(|i| {
            let x = i % target_edge;
            let y = i / target_edge;
            (((x + y) * 255) / n) as u8
        })
        .collect();

    let color = if want_color {
        Some(ColorImage {
            width: target_edge,
            height: target_edge,
            data: gray_data.iter().map(|&v| (v, v, v)).collect(),
        })
    } else {
        None
    };

    Preprocessed {
        gray: PixelImage {
            width: target_edge,
            height: target_edge,
            data: gray_data,
        },
        color,
    }
}
