use serde::{Deserialize, Serialize};

use crate::color::{ThreadColor, PALETTE};
use crate::params::GenerationParams;
use crate::pins::Pin;
use crate::pixel::PixelImage;

/// One pin-to-pin segment, in execution order (spec §3). Order is
/// semantically meaningful: later threads overlay earlier ones.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreadConnection {
    pub from_pin: u32,
    pub to_pin: u32,
    pub color_hex: String,
    pub color_name: String,
}

impl ThreadConnection {
    pub fn new(from_pin: u32, to_pin: u32, color: &ThreadColor) -> Self {
        ThreadConnection {
            from_pin,
            to_pin,
            color_hex: color.hex.to_string(),
            color_name: color.name.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    pub mse: f64,
    pub ssim: f64,
    pub similarity_pct: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadColorSummary {
    pub color_hex: String,
    pub color_name: String,
    pub count: u32,
    pub percentage: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationResult {
    pub id: uuid::Uuid,
    pub created_at: String,
    pub pins: Vec<Pin>,
    pub connections: Vec<ThreadConnection>,
    pub params: GenerationParams,
    pub preview_png_base64: String,
    pub thread_colors: Vec<ThreadColorSummary>,
    pub metrics: AccuracyMetrics,
}

/// Whole-canvas MSE and SSIM against `target` (spec §4.13). Reuses the same
/// constants as the per-line scorer (spec glossary: C1=6.5025, C2=58.5225).
pub fn mse_ssim(target: &PixelImage, canvas: &PixelImage) -> (f64, f64) {
    let n = target.len() as f64;
    let mut mse = 0.0;
    let target_f: Vec<f64> = target.data.iter().map(|&v| v as f64).collect();
    let canvas_f: Vec<f64> = canvas.data.iter().map(|&v| v as f64).collect();
    for i in 0..target.len() {
        mse += (target_f[i] - canvas_f[i]).powi(2);
    }
    mse /= n;

    let mt = target_f.iter().sum::<f64>() / n;
    let mc = canvas_f.iter().sum::<f64>() / n;
    let mut vt = 0.0;
    let mut vc = 0.0;
    let mut cov = 0.0;
    for i in 0..target.len() {
        let dt = target_f[i] - mt;
        let dc = canvas_f[i] - mc;
        vt += dt * dt;
        vc += dc * dc;
        cov += dt * dc;
    }
    vt /= n;
    vc /= n;
    cov /= n;

    const C1: f64 = 6.5025;
    const C2: f64 = 58.5225;
    let num = (2.0 * mt * mc + C1) * (2.0 * cov + C2);
    let den = (mt * mt + mc * mc + C1) * (vt + vc + C2);
    let ssim = if den.abs() < 1e-12 { 1.0 } else { num / den };

    (mse, ssim)
}

/// `similarity_pct = clamp(0.6*(1 - MSE/65025)*100 + 0.4*SSIM*100, 0, 100)`.
pub fn similarity_pct(mse: f64, ssim: f64) -> f64 {
    let pct = 0.6 * (1.0 - mse / 65025.0) * 100.0 + 0.4 * ssim * 100.0;
    pct.clamp(0.0, 100.0)
}

/// Per-color counts and percentages (spec §4.13, P5). A connection-less
/// result (the pure-white-input edge case, spec §7) still reports a single
/// black entry at 100%, so `Σ percentage == 100` holds unconditionally.
pub fn summarize_thread_colors(connections: &[ThreadConnection]) -> Vec<ThreadColorSummary> {
    if connections.is_empty() {
        let black = &PALETTE[0];
        return vec![ThreadColorSummary {
            color_hex: black.hex.to_string(),
            color_name: black.name.to_string(),
            count: 0,
            percentage: 100.0,
        }];
    }

    use std::collections::BTreeMap;
    let mut counts: BTreeMap<(String, String), u32> = BTreeMap::new();
    for c in connections {
        *counts.entry((c.color_hex.clone(), c.color_name.clone())).or_insert(0) += 1;
    }
    let total = connections.len() as f64;
    counts
        .into_iter()
        .map(|((hex, name), count)| ThreadColorSummary {
            color_hex: hex,
            color_name: name,
            count,
            percentage: count as f64 / total * 100.0,
        })
        .collect()
}

/// Render the preview raster (spec §4.13). Monochrome mode is a direct copy
/// of the progress canvas; color mode replays every connection from a fresh
/// white canvas so the preview is reproducible from `connections` alone
/// (spec P4) rather than from the (possibly annealed) live canvas.
pub fn render_preview_gray(progress_gray: &PixelImage) -> PixelImage {
    progress_gray.clone()
}

pub fn render_preview_color(
    pins: &[Pin],
    connections: &[ThreadConnection],
    width: u32,
    height: u32,
    thread_width_px: u32,
    thread_opacity: f64,
) -> crate::pixel::ColorImage {
    let mut canvas = crate::pixel::ColorImage::new_white(width, height);
    for conn in connections {
        let from = &pins[conn.from_pin as usize];
        let to = &pins[conn.to_pin as usize];
        let pixels = crate::raster::rasterize(from, to, thread_width_px, width, height);
        let rgb = hex_to_rgb(&conn.color_hex);
        for i in pixels {
            canvas.data[i] = crate::compositor::forward_color(canvas.data[i], rgb, thread_opacity);
        }
    }
    canvas
}

fn hex_to_rgb(hex: &str) -> (u8, u8, u8) {
    let hex = hex.trim_start_matches('#');
    let r = u8::from_str_radix(&hex[0..2], 16).unwrap_or(0);
    let g = u8::from_str_radix(&hex[2..4], 16).unwrap_or(0);
    let b = u8::from_str_radix(&hex[4..6], 16).unwrap_or(0);
    (r, g, b)
}

/// Raw PNG bytes for a preview canvas, used both for the API's base64
/// preview field and for the `ProgressMsg::Preview` snapshots the driver
/// sends mid-run (spec §6, "Progress snapshots carry ... preview_bytes").
pub fn encode_preview_png_bytes(gray: Option<&PixelImage>, color: Option<&crate::pixel::ColorImage>) -> Vec<u8> {
    use image::{codecs::png::PngEncoder, ExtendedColorType, ImageEncoder};

    let mut bytes = Vec::new();
    if let Some(rgb) = color {
        let raw: Vec<u8> = rgb.data.iter().flat_map(|&(r, g, b)| [r, g, b]).collect();
        let encoder = PngEncoder::new(&mut bytes);
        encoder
            .write_image(&raw, rgb.width, rgb.height, ExtendedColorType::Rgb8)
            .expect("encoding an in-memory preview never fails");
    } else if let Some(gray) = gray {
        let encoder = PngEncoder::new(&mut bytes);
        encoder
            .write_image(&gray.data, gray.width, gray.height, ExtendedColorType::L8)
            .expect("encoding an in-memory preview never fails");
    }
    bytes
}

pub fn encode_preview_png(gray: Option<&PixelImage>, color: Option<&crate::pixel::ColorImage>) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(encode_preview_png_bytes(gray, color))
}
