//! String-art generation engine: converts a raster image into an ordered
//! sequence of pin-to-pin thread connections that reproduce the image when
//! wound around nails on a circular or rectangular frame.
//!
//! The crate is the optimization core only — job scheduling, HTTP polling,
//! and export-format writers are external collaborators that drive this
//! API from outside.

pub mod annealing;
pub mod candidates;
pub mod color;
pub mod compositor;
pub mod continue_gen;
pub mod driver;
pub mod edges;
pub mod error;
pub mod face;
pub mod params;
pub mod pins;
pub mod pixel;
pub mod preprocess;
pub mod progress;
pub mod pyramid;
pub mod raster;
pub mod refine;
pub mod result;
pub mod scoring;
pub mod state;

use std::sync::atomic::{AtomicBool, AtomicU32};
use std::sync::Arc;

use frand::Rand;

pub use continue_gen::continue_generation;
pub use error::{GenerationError, Result};
pub use face::{FaceDetector, HaarLikeFaceDetector};
pub use params::{ColorMode, FrameType, GenerationParams, ImageCrop, QualityPreset};
pub use progress::{JobToken, ProgressMsg, ProgressSink};
pub use result::GenerationResult;

pub(crate) fn now_iso8601() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn fresh_rng() -> Rand {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64;
    Rand::with_seed(nanos)
}

/// Runs one full generation job to completion (spec §6 `generate`). Blocking
/// and CPU-bound by design (spec §5): callers that need to cancel
/// concurrently should run this on its own thread and retain `token`'s
/// cancellation flag.
pub fn generate(
    image_bytes: &[u8],
    params: GenerationParams,
    detector: &dyn FaceDetector,
    token: &JobToken,
    sink: &mut dyn ProgressSink,
) -> Result<GenerationResult> {
    params.validate()?;

    let target_edge = params.target_edge_size();
    let want_color = params.color_mode == ColorMode::Color;
    let (preprocessed, decode_failed) =
        preprocess::preprocess(image_bytes, &params.image_crop, target_edge, want_color);
    if decode_failed {
        sink.send(ProgressMsg::Warning(
            "image decode failed, using a deterministic fallback gradient".to_string(),
        ));
    }

    let mask = face::build_face_region_mask(detector, &preprocessed.gray);
    let face_sector = mask.face_box.map(|b| {
        let (face_cx, face_cy) = b.center();
        pins::FaceSector::from_face_box(
            target_edge as f64 / 2.0,
            target_edge as f64 / 2.0,
            target_edge as f64 / 2.0 - 5.0,
            face_cx,
            face_cy,
            b.width,
        )
    });
    let pin_list = pins::place_pins(params.frame_type, params.pin_count, target_edge, target_edge, face_sector);
    if pin_list.is_empty() {
        return Err(GenerationError::EmptyFrame {
            pin_count: params.pin_count,
            frame_size: params.frame_size,
        });
    }

    let edges = edges::compute_edge_map(&preprocessed.gray);
    let mut state = state::ProgressState::new(&preprocessed.gray, want_color, pin_list.len(), mask, edges.clone());

    let mut connections = Vec::new();
    let mut color_usage = [0u32; 4];
    let mut rng = fresh_rng();

    let completed = driver::run_stage_driver(
        &mut state,
        &preprocessed.gray,
        preprocessed.color.as_ref(),
        &pin_list,
        &edges,
        &params,
        &mut connections,
        &mut color_usage,
        &mut rng,
        token,
        params.max_threads,
        sink,
    );

    if !completed {
        return Err(GenerationError::Cancelled);
    }

    if params.color_mode == ColorMode::Monochrome {
        refine::local_refinement(&mut state, &preprocessed.gray, &pin_list, &edges, &params, &mut connections, &mut rng);

        if params.use_simulated_annealing {
            annealing::simulated_annealing(&mut state, &preprocessed.gray, &pin_list, &params, &mut connections, params.max_threads, &mut rng);
        }
        if params.quality_preset.uses_annealing_and_genetic() {
            annealing::genetic_refinement(&mut state, &preprocessed.gray, &pin_list, &params, &mut connections, &mut rng);
            annealing::backtrack(&mut state, &preprocessed.gray, &pin_list, &params, &mut connections);
        }
    }

    assemble_result(&state, &preprocessed.gray, &pin_list, &params, connections)
}

fn assemble_result(
    state: &state::ProgressState,
    target_gray: &pixel::PixelImage,
    pins: &[pins::Pin],
    params: &GenerationParams,
    connections: Vec<result::ThreadConnection>,
) -> Result<GenerationResult> {
    let (mse, ssim) = result::mse_ssim(target_gray, &state.progress_gray);
    let metrics = result::AccuracyMetrics {
        mse,
        ssim,
        similarity_pct: result::similarity_pct(mse, ssim),
    };

    let thread_width_px = params.thread_width_px();
    let preview_b64 = if state.progress_rgb.is_some() {
        let preview = result::render_preview_color(pins, &connections, state.width, state.height, thread_width_px, params.thread_opacity);
        result::encode_preview_png(None, Some(&preview))
    } else {
        let preview = result::render_preview_gray(&state.progress_gray);
        result::encode_preview_png(Some(&preview), None)
    };

    let thread_colors = result::summarize_thread_colors(&connections);

    Ok(GenerationResult {
        id: uuid::Uuid::new_v4(),
        created_at: now_iso8601(),
        pins: pins.to_vec(),
        connections,
        params: params.clone(),
        preview_png_base64: preview_b64,
        thread_colors,
        metrics,
    })
}

/// A freshly-allocated cancellable job. The returned `JobToken` compares
/// against the same `current_job_id` counter across calls, so starting a
/// newer job automatically makes any in-flight older job observe
/// cancellation (spec §9 design note on re-entrant generation calls).
pub fn new_job(current_job_id: Arc<AtomicU32>) -> (JobToken, Arc<AtomicBool>) {
    let cancel = Arc::new(AtomicBool::new(false));
    (JobToken::new(current_job_id, cancel.clone()), cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{BoundingBox, FaceDetector};

    struct NoFace;
    impl FaceDetector for NoFace {
        fn detect(&self, _img: &pixel::PixelImage) -> Option<BoundingBox> {
            None
        }
    }

    fn tiny_gray_png(edge: u32, value: u8) -> Vec<u8> {
        let mut img = image::GrayImage::new(edge, edge);
        for p in img.pixels_mut() {
            *p = image::Luma([value]);
        }
        let mut bytes = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn boundary_min_params_complete_with_a_valid_result() {
        // Spec §8 boundary behavior: pin_count=100, max_threads=500,
        // min_pin_skip=2 — the smallest valid parameter combination.
        let bytes = tiny_gray_png(64, 0x80);
        let params = GenerationParams {
            frame_type: FrameType::Circular,
            pin_count: 100,
            max_threads: 500,
            min_pin_skip: 2,
            color_mode: ColorMode::Monochrome,
            quality_preset: QualityPreset::Fast,
            ..GenerationParams::default()
        };
        let counter = Arc::new(AtomicU32::new(0));
        let (token, _cancel) = new_job(counter);
        let mut sink = |_msg: ProgressMsg| {};

        let result = generate(&bytes, params, &NoFace, &token, &mut sink).unwrap();

        assert!(result.connections.len() >= 500);
        for c in &result.connections {
            assert_ne!(c.from_pin, c.to_pin);
        }
        for w in result.connections.windows(2) {
            assert_eq!(w[0].to_pin, w[1].from_pin);
        }
        assert_eq!(result.connections[0].from_pin, 0);
        assert!(result.metrics.similarity_pct >= 0.0);
    }

    #[test]
    fn invalid_params_are_rejected_before_any_work() {
        let bytes = tiny_gray_png(64, 0x80);
        let mut params = GenerationParams::default();
        params.pin_count = 1;
        let counter = Arc::new(AtomicU32::new(0));
        let (token, _cancel) = new_job(counter);
        let mut sink = |_msg: ProgressMsg| {};

        let err = generate(&bytes, params, &NoFace, &token, &mut sink).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidParam { .. }));
    }

    #[test]
    fn cancelling_before_the_first_thread_yields_a_cancelled_error() {
        let bytes = tiny_gray_png(64, 0x80);
        let params = GenerationParams {
            pin_count: 100,
            max_threads: 500,
            quality_preset: QualityPreset::Fast,
            ..GenerationParams::default()
        };
        let counter = Arc::new(AtomicU32::new(0));
        let (token, cancel) = new_job(counter);
        cancel.store(true, std::sync::atomic::Ordering::Relaxed);
        let mut sink = |_msg: ProgressMsg| {};

        let err = generate(&bytes, params, &NoFace, &token, &mut sink).unwrap_err();
        assert!(matches!(err, GenerationError::Cancelled));
    }
}
