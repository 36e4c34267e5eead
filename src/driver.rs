use frand::Rand;
use rayon::prelude::*;

use crate::candidates::{generate_candidates, CandidateParams};
use crate::color::{ThreadColor, PALETTE};
use crate::edges::EdgeMap;
use crate::face::{effective_min_skip, FaceRegionMask};
use crate::params::{ColorMode, GenerationParams, QualityPreset};
use crate::pins::Pin;
use crate::pixel::ColorImage;
use crate::progress::{JobToken, ProgressMsg, ProgressSink};
use crate::result::ThreadConnection;
use crate::scoring::{lab_color_score, multi_res_score, ScoreContext, NEG_SENTINEL};
use crate::state::ProgressState;

struct StageConfig {
    thread_count: u32,
    min_skip_seed: u32,
    opacity_multiplier: f64,
    label: &'static str,
}

fn stage_configs(preset: QualityPreset, color_mode: ColorMode, total_n: u32, base_min_skip: u32, pin_count: u32) -> Vec<StageConfig> {
    if preset.uses_staged_driver(color_mode) {
        vec![
            StageConfig {
                thread_count: ((total_n as f64) * 0.25).round() as u32,
                min_skip_seed: base_min_skip.max(pin_count / 6),
                opacity_multiplier: 1.3,
                label: "structure",
            },
            StageConfig {
                thread_count: ((total_n as f64) * 0.35).round() as u32,
                min_skip_seed: base_min_skip.max(pin_count / 15),
                opacity_multiplier: 1.1,
                label: "mid_detail",
            },
            StageConfig {
                thread_count: total_n.saturating_sub(
                    ((total_n as f64) * 0.25).round() as u32 + ((total_n as f64) * 0.35).round() as u32,
                ),
                min_skip_seed: base_min_skip,
                opacity_multiplier: 0.8,
                label: "fine_detail",
            },
        ]
    } else {
        vec![StageConfig {
            thread_count: total_n,
            min_skip_seed: base_min_skip,
            opacity_multiplier: 1.0,
            label: "generation",
        }]
    }
}

fn effective_opacity(base: f64, multiplier: f64) -> f64 {
    (base * multiplier).min(0.5)
}

/// Picks a uniformly-random valid `to_pin` when scoring finds nothing
/// usable — the resolved fallback for spec §9's open question, required so
/// P3 (thread continuity) always holds even under degenerate input.
fn random_valid_fallback(
    from: &Pin,
    pins: &[Pin],
    face_mask: &FaceRegionMask,
    preset: QualityPreset,
    min_skip: u32,
    rng: &mut Rand,
) -> Option<u32> {
    let valid: Vec<u32> = pins
        .iter()
        .filter(|p| {
            p.index != from.index
                && crate::pins::circular_distance(from.index, p.index, pins.len() as u32)
                    >= effective_min_skip(face_mask, from, p, preset, min_skip)
        })
        .map(|p| p.index)
        .collect();
    if valid.is_empty() {
        return None;
    }
    let idx = rng.gen_range(0..valid.len() as u32) as usize;
    Some(valid[idx])
}

#[allow(clippy::too_many_arguments)]
fn best_monochrome_candidate(
    state: &ProgressState,
    target: &crate::pixel::PixelImage,
    from: &Pin,
    pins: &[Pin],
    candidate_ids: &[u32],
    alpha: f64,
    use_edge_detection: bool,
    use_pin_fatigue: bool,
    thread_width_px: u32,
) -> Option<(u32, f64)> {
    let ctx = ScoreContext {
        state,
        target,
        alpha,
        use_edge_detection,
        use_pin_fatigue,
    };
    candidate_ids
        .par_iter()
        .map(|&to_idx| {
            let to = &pins[to_idx as usize];
            let pixels = crate::raster::rasterize(from, to, thread_width_px, state.width, state.height);
            let score = multi_res_score(
                &ctx,
                from,
                to,
                &pixels,
                state.pin_usage[from.index as usize],
                state.pin_usage[to_idx as usize],
            );
            (to_idx, score)
        })
        .filter(|(_, s)| *s > NEG_SENTINEL)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

#[allow(clippy::too_many_arguments)]
fn best_color_candidate(
    state: &ProgressState,
    target_rgb: &ColorImage,
    from: &Pin,
    pins: &[Pin],
    candidate_ids: &[u32],
    alpha: f64,
    use_edge_detection: bool,
    total_threads_placed: u32,
    color_usage: &[u32; 4],
    thread_width_px: u32,
) -> Option<(u32, usize, f64)> {
    let ctx = ScoreContext {
        state,
        target: &state.progress_gray,
        alpha,
        use_edge_detection,
        use_pin_fatigue: false,
    };
    candidate_ids
        .par_iter()
        .flat_map(|&to_idx| {
            let to = &pins[to_idx as usize];
            let pixels = crate::raster::rasterize(from, to, thread_width_px, state.width, state.height);
            PALETTE
                .iter()
                .enumerate()
                .map(|(ci, color)| {
                    let score = lab_color_score(
                        &ctx,
                        from,
                        to,
                        &pixels,
                        color,
                        target_rgb,
                        color_usage[ci],
                        total_threads_placed,
                        state.pin_usage[to_idx as usize],
                    );
                    (to_idx, ci, score)
                })
                .collect::<Vec<_>>()
        })
        .filter(|(_, _, s)| *s > NEG_SENTINEL)
        .max_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
}

/// Runs one coarse-to-fine stage (or the single-pass equivalent), appending
/// connections and driving progress/cancellation (spec §4.10, §9 design
/// note: "three invocations of one stage function").
#[allow(clippy::too_many_arguments)]
fn run_stage(
    state: &mut ProgressState,
    target_gray: &crate::pixel::PixelImage,
    target_rgb: Option<&ColorImage>,
    pins: &[Pin],
    edges: &EdgeMap,
    params: &GenerationParams,
    stage: &StageConfig,
    connections: &mut Vec<ThreadConnection>,
    color_usage: &mut [u32; 4],
    rng: &mut Rand,
    token: &JobToken,
    total_n: u32,
    sink: &mut dyn ProgressSink,
) -> bool {
    let cand_params = CandidateParams::for_preset(params.quality_preset);
    let alpha = effective_opacity(params.thread_opacity, stage.opacity_multiplier);
    let thread_width_px = params.thread_width_px();
    let pyramid_cadence = (total_n / 150).max(1);
    let preview_cadence = (total_n / 100).max(1);

    for _ in 0..stage.thread_count {
        if token.is_cancelled() {
            sink.send(ProgressMsg::Cancelled);
            return false;
        }

        let from = pins[state.current_pin as usize];
        let candidate_ids = generate_candidates(
            &from,
            pins,
            edges,
            &state.face_mask,
            params.quality_preset,
            stage.min_skip_seed,
            &cand_params,
            rng,
        );

        let placed = if let Some(rgb) = target_rgb {
            if let Some((to_idx, color_idx, _score)) = best_color_candidate(
                state,
                rgb,
                &from,
                pins,
                &candidate_ids,
                alpha,
                params.use_edge_detection,
                connections.len() as u32,
                color_usage,
                thread_width_px,
            ) {
                Some((to_idx, &PALETTE[color_idx]))
            } else {
                random_valid_fallback(&from, pins, &state.face_mask, params.quality_preset, stage.min_skip_seed, rng)
                    .map(|to_idx| (to_idx, &PALETTE[0]))
            }
        } else if let Some((to_idx, _score)) = best_monochrome_candidate(
            state,
            target_gray,
            &from,
            pins,
            &candidate_ids,
            alpha,
            params.use_edge_detection,
            params.use_pin_fatigue,
            thread_width_px,
        ) {
            Some((to_idx, &PALETTE[0]))
        } else {
            random_valid_fallback(&from, pins, &state.face_mask, params.quality_preset, stage.min_skip_seed, rng)
                .map(|to_idx| (to_idx, &PALETTE[0]))
        };

        let Some((to_idx, color)) = placed else {
            // No valid pin at all (pathological pin_count); advance is
            // impossible, stop the stage early rather than spin.
            break;
        };

        let to = pins[to_idx as usize];
        let pixels = state.rasterize(&from, &to, thread_width_px);
        let rgb_color = if target_rgb.is_some() { Some(color.rgb) } else { None };
        state.apply_forward(&pixels, rgb_color, alpha);

        state.pin_usage[from.index as usize] += 1;
        state.pin_usage[to_idx as usize] += 1;
        state.current_pin = to_idx;

        if target_rgb.is_some() {
            let ci = PALETTE.iter().position(|c| c.hex == color.hex).unwrap_or(0);
            color_usage[ci] += 1;
        }

        connections.push(ThreadConnection::new(from.index, to_idx, color));

        let k = connections.len() as u32;
        if k % pyramid_cadence == 0 {
            state.refresh_pyramid();
        }
        if k % preview_cadence == 0 {
            let (mse, ssim) = crate::result::mse_ssim(target_gray, &state.progress_gray);
            sink.send(ProgressMsg::Progress {
                current_thread: k,
                total_threads: total_n,
                stage_label: stage.label,
            });
            let preview_png_bytes = if let Some(rgb) = &state.progress_rgb {
                crate::result::encode_preview_png_bytes(None, Some(rgb))
            } else {
                crate::result::encode_preview_png_bytes(Some(&state.progress_gray), None)
            };
            sink.send(ProgressMsg::Preview {
                current_thread: k,
                preview_png_bytes,
                accuracy: crate::result::similarity_pct(mse, ssim),
            });
        }
    }

    true
}

/// Post-stage face refinement: bias additional threads toward the face mask
/// (spec §4.10). Only runs when a face was actually detected.
#[allow(clippy::too_many_arguments)]
fn run_face_refinement(
    state: &mut ProgressState,
    target_gray: &crate::pixel::PixelImage,
    target_rgb: Option<&ColorImage>,
    pins: &[Pin],
    edges: &EdgeMap,
    params: &GenerationParams,
    connections: &mut Vec<ThreadConnection>,
    color_usage: &mut [u32; 4],
    rng: &mut Rand,
    token: &JobToken,
    total_n: u32,
    sink: &mut dyn ProgressSink,
) {
    if state.face_mask.face_box.is_none() {
        return;
    }
    let extra = (0.2 * total_n as f64).min(2000.0).round() as u32;
    if extra == 0 {
        return;
    }

    let cand_params = CandidateParams::for_preset(params.quality_preset);
    let alpha = effective_opacity(params.thread_opacity, 0.7);
    let thread_width_px = params.thread_width_px();

    for _ in 0..extra {
        if token.is_cancelled() {
            sink.send(ProgressMsg::Cancelled);
            return;
        }

        let from = pins[state.current_pin as usize];
        let candidate_ids = generate_candidates(
            &from,
            pins,
            edges,
            &state.face_mask,
            params.quality_preset,
            params.min_pin_skip,
            &cand_params,
            rng,
        );
        let face_biased: Vec<u32> = candidate_ids
            .iter()
            .copied()
            .filter(|&idx| {
                let to = &pins[idx as usize];
                let mid = ((from.x as u32 + to.x as u32) / 2, (from.y as u32 + to.y as u32) / 2);
                let w = state.width;
                let midx = (mid.1 * w + mid.0) as usize;
                midx < state.face_mask.face_mask.len() && state.face_mask.face_mask[midx]
            })
            .collect();
        let pool = if face_biased.is_empty() { &candidate_ids } else { &face_biased };

        let placed = if let Some(rgb) = target_rgb {
            best_color_candidate(
                state,
                rgb,
                &from,
                pins,
                pool,
                alpha,
                params.use_edge_detection,
                connections.len() as u32,
                color_usage,
                thread_width_px,
            )
            .map(|(to_idx, ci, score)| (to_idx, &PALETTE[ci], score * 1.5))
        } else {
            best_monochrome_candidate(
                state,
                target_gray,
                &from,
                pins,
                pool,
                alpha,
                params.use_edge_detection,
                params.use_pin_fatigue,
                thread_width_px,
            )
            .map(|(to_idx, score)| (to_idx, &PALETTE[0], score * 1.5))
        };

        let Some((to_idx, color, _boosted)) = placed else {
            break;
        };

        let to = pins[to_idx as usize];
        let pixels = state.rasterize(&from, &to, thread_width_px);
        let rgb_color = if target_rgb.is_some() { Some(color.rgb) } else { None };
        state.apply_forward(&pixels, rgb_color, alpha);
        state.pin_usage[from.index as usize] += 1;
        state.pin_usage[to_idx as usize] += 1;
        state.current_pin = to_idx;
        if target_rgb.is_some() {
            let ci = PALETTE.iter().position(|c| c.hex == color.hex).unwrap_or(0);
            color_usage[ci] += 1;
        }
        connections.push(ThreadConnection::new(from.index, to_idx, color));
    }

    sink.send(ProgressMsg::Progress {
        current_thread: connections.len() as u32,
        total_threads: total_n,
        stage_label: "face_refinement",
    });
}

/// Drives the full coarse-to-fine (or single-pass) greedy loop for
/// `total_n` threads starting from `state.current_pin` (spec §4.10).
/// Returns `false` if the run was cancelled partway through.
#[allow(clippy::too_many_arguments)]
pub fn run_stage_driver(
    state: &mut ProgressState,
    target_gray: &crate::pixel::PixelImage,
    target_rgb: Option<&ColorImage>,
    pins: &[Pin],
    edges: &EdgeMap,
    params: &GenerationParams,
    connections: &mut Vec<ThreadConnection>,
    color_usage: &mut [u32; 4],
    rng: &mut Rand,
    token: &JobToken,
    total_n: u32,
    sink: &mut dyn ProgressSink,
) -> bool {
    let stages = stage_configs(params.quality_preset, params.color_mode, total_n, params.min_pin_skip, params.pin_count);
    for stage in &stages {
        let completed = run_stage(
            state, target_gray, target_rgb, pins, edges, params, stage, connections, color_usage, rng, token, total_n, sink,
        );
        if !completed {
            return false;
        }
    }
    run_face_refinement(
        state, target_gray, target_rgb, pins, edges, params, connections, color_usage, rng, token, total_n, sink,
    );
    true
}
