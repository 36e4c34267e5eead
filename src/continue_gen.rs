use frand::Rand;

use crate::color::{ThreadColor, PALETTE};
use crate::driver::run_stage_driver;
use crate::edges::compute_edge_map;
use crate::error::{GenerationError, Result};
use crate::face::{build_face_region_mask, FaceDetector};
use crate::params::ColorMode;
use crate::pins::{place_pins, Pin};
use crate::progress::{JobToken, ProgressMsg, ProgressSink};
use crate::result::{self, GenerationResult, ThreadConnection};
use crate::state::ProgressState;

fn color_for_hex(hex: &str) -> &'static ThreadColor {
    PALETTE.iter().find(|c| c.hex == hex).unwrap_or(&PALETTE[0])
}

/// Replays `connections` onto a fresh canvas and runs `additional_threads`
/// more (spec §4.14). Requires the caller to supply the original
/// preprocessed target, since `GenerationResult` does not persist it (spec
/// §9 design note, resolved here as option (b): reject rather than
/// silently substitute the live preview as a surrogate target).
pub fn continue_generation(
    previous: &GenerationResult,
    original_target_gray: Option<&crate::pixel::PixelImage>,
    original_target_rgb: Option<&crate::pixel::ColorImage>,
    detector: &dyn FaceDetector,
    additional_threads: u32,
    sink: &mut dyn ProgressSink,
    token: &JobToken,
) -> Result<GenerationResult> {
    let params = previous.params.clone();
    let target_gray = original_target_gray.ok_or(GenerationError::MissingContinuationTarget)?;
    if params.color_mode == ColorMode::Color {
        original_target_rgb.ok_or(GenerationError::MissingContinuationTarget)?;
    }
    let pins: Vec<Pin> = previous.pins.clone();

    let edges = compute_edge_map(target_gray);
    let mask = build_face_region_mask(detector, target_gray);
    let color_mode_white = params.color_mode == ColorMode::Color;
    let mut state = ProgressState::new(target_gray, color_mode_white, pins.len(), mask, edges.clone());

    let thread_width_px = params.thread_width_px();
    let mut connections = previous.connections.clone();
    let mut color_usage = [0u32; 4];

    for conn in &connections {
        let from = &pins[conn.from_pin as usize];
        let to = &pins[conn.to_pin as usize];
        let pixels = state.rasterize(from, to, thread_width_px);
        let color = color_for_hex(&conn.color_hex);
        let rgb_color = if color_mode_white { Some(color.rgb) } else { None };
        state.apply_forward(&pixels, rgb_color, params.thread_opacity);
        state.pin_usage[conn.from_pin as usize] += 1;
        state.pin_usage[conn.to_pin as usize] += 1;
        if color_mode_white {
            if let Some(idx) = PALETTE.iter().position(|c| c.hex == color.hex) {
                color_usage[idx] += 1;
            }
        }
    }
    state.current_pin = connections.last().map(|c| c.to_pin).unwrap_or(0);

    let mut rng = Rand::with_seed(
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos() as u64,
    );
    run_stage_driver(
        &mut state,
        target_gray,
        original_target_rgb,
        &pins,
        &edges,
        &params,
        &mut connections,
        &mut color_usage,
        &mut rng,
        token,
        additional_threads,
        sink,
    );

    let (mse, ssim) = result::mse_ssim(target_gray, &state.progress_gray);
    let metrics = crate::result::AccuracyMetrics {
        mse,
        ssim,
        similarity_pct: result::similarity_pct(mse, ssim),
    };
    let preview = if color_mode_white {
        result::render_preview_color(&pins, &connections, state.width, state.height, thread_width_px, params.thread_opacity)
    } else {
        crate::pixel::ColorImage::new_white(0, 0)
    };
    let preview_b64 = if color_mode_white {
        result::encode_preview_png(None, Some(&preview))
    } else {
        result::encode_preview_png(Some(&result::render_preview_gray(&state.progress_gray)), None)
    };

    let thread_colors = result::summarize_thread_colors(&connections);
    let generation_result = GenerationResult {
        id: uuid::Uuid::new_v4(),
        created_at: crate::now_iso8601(),
        pins,
        connections,
        params,
        preview_png_base64: preview_b64,
        thread_colors,
        metrics,
    };

    sink.send(ProgressMsg::Done(generation_result.clone()));
    Ok(generation_result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::BoundingBox;
    use crate::params::{FrameType, GenerationParams, QualityPreset};
    use crate::pixel::PixelImage;
    use std::sync::atomic::{AtomicBool, AtomicU32};
    use std::sync::Arc;

    struct NoFace;
    impl FaceDetector for NoFace {
        fn detect(&self, _img: &PixelImage) -> Option<BoundingBox> {
            None
        }
    }

    #[test]
    fn missing_target_is_rejected_rather_than_substituted() {
        let params = GenerationParams {
            pin_count: 12,
            quality_preset: QualityPreset::Fast,
            frame_type: FrameType::Circular,
            ..GenerationParams::default()
        };
        let pins = place_pins(FrameType::Circular, 12, 64, 64, None);
        let previous = GenerationResult {
            id: uuid::Uuid::new_v4(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            pins,
            connections: vec![ThreadConnection::new(0, 3, &PALETTE[0])],
            params,
            preview_png_base64: String::new(),
            thread_colors: Vec::new(),
            metrics: crate::result::AccuracyMetrics { mse: 0.0, ssim: 1.0, similarity_pct: 100.0 },
        };
        let cancel = Arc::new(AtomicBool::new(false));
        let counter = Arc::new(AtomicU32::new(0));
        let token = JobToken::new(counter, cancel);
        let mut sink = |_msg: ProgressMsg| {};
        let err = continue_generation(&previous, None, None, &NoFace, 5, &mut sink, &token).unwrap_err();
        assert!(matches!(err, GenerationError::MissingContinuationTarget));
    }

    #[test]
    fn color_mode_continuation_without_an_rgb_target_is_rejected() {
        let params = GenerationParams {
            pin_count: 100,
            quality_preset: QualityPreset::Fast,
            frame_type: FrameType::Circular,
            color_mode: crate::params::ColorMode::Color,
            ..GenerationParams::default()
        };
        let pins = place_pins(FrameType::Circular, 100, 64, 64, None);
        let previous = GenerationResult {
            id: uuid::Uuid::new_v4(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            pins,
            connections: vec![ThreadConnection::new(0, 5, &PALETTE[0])],
            params,
            preview_png_base64: String::new(),
            thread_colors: Vec::new(),
            metrics: crate::result::AccuracyMetrics { mse: 0.0, ssim: 1.0, similarity_pct: 100.0 },
        };
        let cancel = Arc::new(AtomicBool::new(false));
        let counter = Arc::new(AtomicU32::new(0));
        let token = JobToken::new(counter, cancel);
        let mut sink = |_msg: ProgressMsg| {};

        // A gray target is supplied, but the rgb target (required in color
        // mode) is not — this must still be rejected, not silently
        // downgraded to a monochrome replay.
        let gray_target = PixelImage::new(64, 64);
        let err = continue_generation(&previous, Some(&gray_target), None, &NoFace, 5, &mut sink, &token).unwrap_err();
        assert!(matches!(err, GenerationError::MissingContinuationTarget));
    }
}
