use crate::color::{delta_e76, rgb_to_lab, ThreadColor};
use crate::compositor;
use crate::edges::edge_alignment;
use crate::pins::Pin;
use crate::pixel::PixelImage;
use crate::state::ProgressState;

pub const SSIM_C1: f64 = 6.5025;
pub const SSIM_C2: f64 = 58.5225;

/// Rejection sentinel for degenerate or provably-bad candidates (spec §7
/// category 5, §4.9.b).
pub const NEG_SENTINEL: f64 = f64::MIN / 2.0;

fn mean_var_cov(target: &[f64], other: &[f64]) -> (f64, f64, f64, f64, f64) {
    let n = target.len() as f64;
    let mt = target.iter().sum::<f64>() / n;
    let mo = other.iter().sum::<f64>() / n;
    let mut vt = 0.0;
    let mut vo = 0.0;
    let mut cov = 0.0;
    for i in 0..target.len() {
        let dt = target[i] - mt;
        let dop = other[i] - mo;
        vt += dt * dt;
        vo += dop * dop;
        cov += dt * dop;
    }
    (mt, mo, vt / n, vo / n, cov / n)
}

/// SSIM over a pixel set, combining luminance, contrast, and structure into
/// the glossary's two-constant form.
fn ssim(target: &[f64], other: &[f64]) -> f64 {
    let (mt, mo, vt, vo, cov) = mean_var_cov(target, other);
    let num = (2.0 * mt * mo + SSIM_C1) * (2.0 * cov + SSIM_C2);
    let den = (mt * mt + mo * mo + SSIM_C1) * (vt + vo + SSIM_C2);
    if den.abs() < 1e-12 { 1.0 } else { num / den }
}

pub struct ScoreContext<'a> {
    pub state: &'a ProgressState,
    pub target: &'a PixelImage,
    pub alpha: f64,
    pub use_edge_detection: bool,
    pub use_pin_fatigue: bool,
}

fn length_preference(n: usize, min_wh: u32) -> f64 {
    let l = n as f64 / (0.3 * min_wh as f64);
    if (0.2..1.2).contains(&l) {
        1.15
    } else if l >= 1.5 {
        0.85
    } else {
        1.0
    }
}

fn pin_fatigue_multiplier(from_usage: u32, to_usage: u32) -> f64 {
    let excess = (from_usage + to_usage).saturating_sub(50);
    1.0 / 1.005f64.powi(excess as i32)
}

fn mean_face_density(state: &ProgressState, pixels: &[usize]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &i in pixels {
        if state.face_mask.face_mask[i] {
            sum += state.density[i] as f64;
            count += 1;
        }
    }
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn apply_face_priority(score: f64, edge_bonus: f64, overlap: f64, mean_density: f64) -> f64 {
    let mut s = score;
    if overlap >= 0.30 {
        s += edge_bonus * overlap * 2.0;
    }
    if mean_density > 0.85 {
        s *= 0.3;
    }
    s
}

/// 4.9.a perceptual line score (monochrome).
pub fn perceptual_score(
    ctx: &ScoreContext,
    a: &Pin,
    b: &Pin,
    pixels: &[usize],
    from_usage: u32,
    to_usage: u32,
) -> f64 {
    let n = pixels.len();
    if n == 0 {
        return NEG_SENTINEL;
    }
    let nf = n as f64;

    let mut target_vals = Vec::with_capacity(n);
    let mut current_vals = Vec::with_capacity(n);
    let mut new_vals = Vec::with_capacity(n);

    let mut mse_sum = 0.0;
    let mut edge_sum = 0.0;
    let mut overdraw_sum = 0.0;

    for &i in pixels {
        let target_v = ctx.target.data[i] as f64;
        let current_v = ctx.state.progress_gray.data[i] as f64;
        let new_v = compositor::forward_gray(ctx.state.progress_gray.data[i], ctx.alpha) as f64;

        mse_sum += (target_v - current_v).powi(2) - (target_v - new_v).powi(2);
        if ctx.use_edge_detection {
            edge_sum += ctx.state.edges.magnitude[i] as f64 / 255.0;
        }
        overdraw_sum += (((255.0 - current_v) / 255.0 - 0.5).max(0.0)) * 2.0
            + ctx.state.overdraw[i] as f64 * 0.1;

        target_vals.push(target_v);
        current_vals.push(current_v);
        new_vals.push(new_v);
    }

    let ssim_improvement =
        (ssim(&target_vals, &new_vals) - ssim(&target_vals, &current_vals)) * 1000.0;

    let edge_alignment_bonus = if ctx.use_edge_detection {
        edge_alignment(&ctx.state.edges, a, b) * 5.0
    } else {
        0.0
    };
    let edge_term = edge_sum / nf + edge_alignment_bonus;

    let mut smoothness_sum = 0.0;
    for w in new_vals.windows(2) {
        smoothness_sum += (w[1] - w[0]).abs() / 255.0;
    }

    let mse_term = mse_sum / nf;
    let smoothness_term = smoothness_sum / nf;
    let overdraw_term = overdraw_sum / nf;

    let mut score = 0.40 * ssim_improvement + 0.25 * mse_term + 0.20 * edge_term
        - 0.10 * smoothness_term
        - 0.05 * overdraw_term;

    score *= length_preference(n, ctx.state.width.min(ctx.state.height));

    if ctx.use_pin_fatigue {
        score *= pin_fatigue_multiplier(from_usage, to_usage);
    }

    let overlap = ctx.state.face_mask.line_face_overlap(pixels);
    let mean_density = mean_face_density(ctx.state, pixels);
    apply_face_priority(score, edge_term, overlap, mean_density)
}

fn cheap_mse_improvement(target: &PixelImage, progress: &PixelImage, a: (u32, u32), b: (u32, u32), alpha: f64) -> f64 {
    let pixels = crate::raster::bresenham_line(a.0 as i64, a.1 as i64, b.0 as i64, b.1 as i64);
    let mut sum = 0.0;
    let mut n = 0.0;
    for (x, y) in pixels {
        if x < 0 || y < 0 || x >= target.width as i64 || y >= target.height as i64 {
            continue;
        }
        let idx = y as usize * target.width as usize + x as usize;
        let t = target.data[idx] as f64;
        let cur = progress.data[idx] as f64;
        let new = compositor::forward_gray(progress.data[idx], alpha) as f64;
        sum += (t - cur).powi(2) - (t - new).powi(2);
        n += 1.0;
    }
    if n == 0.0 { 0.0 } else { sum / n }
}

fn scale_point(p: &Pin, factor: u32) -> (u32, u32) {
    (p.x as u32 / factor, p.y as u32 / factor)
}

/// 4.9.b multi-resolution score: combines cheap low/mid MSE estimates with
/// the full perceptual score, short-circuiting on a clearly bad low-res
/// estimate.
pub fn multi_res_score(
    ctx: &ScoreContext,
    a: &Pin,
    b: &Pin,
    pixels: &[usize],
    from_usage: u32,
    to_usage: u32,
) -> f64 {
    let low_contrib = cheap_mse_improvement(
        &ctx.state.target_pyramid.low,
        &ctx.state.progress_pyramid.low,
        scale_point(a, 4),
        scale_point(b, 4),
        ctx.alpha,
    );
    if low_contrib < -10.0 {
        return NEG_SENTINEL;
    }
    let mid_contrib = cheap_mse_improvement(
        &ctx.state.target_pyramid.mid,
        &ctx.state.progress_pyramid.mid,
        scale_point(a, 2),
        scale_point(b, 2),
        ctx.alpha,
    );
    let full = perceptual_score(ctx, a, b, pixels, from_usage, to_usage);
    0.2 * low_contrib + 0.3 * mid_contrib + 0.5 * full
}

/// 4.9.c LAB-ΔE interleaved-color score for one `(candidate, thread color)`
/// pair.
pub fn lab_color_score(
    ctx: &ScoreContext,
    a: &Pin,
    b: &Pin,
    pixels: &[usize],
    thread: &ThreadColor,
    target_rgb: &crate::pixel::ColorImage,
    usage_of_this_color: u32,
    total_threads_placed: u32,
    pin_usage_to: u32,
) -> f64 {
    let n = pixels.len();
    if n == 0 {
        return NEG_SENTINEL;
    }
    let nf = n as f64;
    let rgb = ctx.state.progress_rgb.as_ref().expect("lab score requires color canvas");

    let mut delta_e_sum = 0.0;
    let mut edge_sum = 0.0;
    let mut overdraw_sum = 0.0;

    for &i in pixels {
        let target_px = target_rgb.data[i];
        let current_px = rgb.data[i];
        let new_px = compositor::forward_color(current_px, thread.rgb, ctx.alpha);

        let target_lab = rgb_to_lab(target_px);
        let current_lab = rgb_to_lab(current_px);
        let new_lab = rgb_to_lab(new_px);

        delta_e_sum += delta_e76(target_lab, current_lab) - delta_e76(target_lab, new_lab);

        if ctx.use_edge_detection {
            edge_sum += ctx.state.edges.magnitude[i] as f64 / 255.0;
        }

        let luma = 0.299 * current_px.0 as f64 + 0.587 * current_px.1 as f64 + 0.114 * current_px.2 as f64;
        overdraw_sum +=
            (((255.0 - luma) / 255.0 - 0.5).max(0.0)) * 2.0 + ctx.state.overdraw[i] as f64 * 0.1;
    }

    let delta_e_term = delta_e_sum / nf;
    let edge_term = edge_sum / nf;
    let overdraw_term = overdraw_sum / nf;

    let expected = total_threads_placed as f64 / 4.0;
    let color_imbalance = if expected > 0.0 {
        ((usage_of_this_color as f64 - expected) / expected).max(0.0)
    } else {
        0.0
    };

    let mut score =
        0.65 * delta_e_term + 0.20 * edge_term - 0.10 * overdraw_term - 0.05 * color_imbalance;
    score *= 0.997f64.powi(pin_usage_to as i32);

    let overlap = ctx.state.face_mask.line_face_overlap(pixels);
    let mean_density = mean_face_density(ctx.state, pixels);
    apply_face_priority(score, edge_term, overlap, mean_density)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edges::compute_edge_map;
    use crate::face::{build_face_region_mask, BoundingBox, FaceDetector};
    use crate::params::QualityPreset;
    use crate::pins::place_pins;
    use crate::params::FrameType;

    struct NoFace;
    impl FaceDetector for NoFace {
        fn detect(&self, _img: &PixelImage) -> Option<BoundingBox> {
            None
        }
    }

    fn setup(size: u32) -> (PixelImage, ProgressState, Vec<Pin>) {
        let mut target = PixelImage::new(size, size);
        for y in 0..size {
            for x in 0..size / 2 {
                target.set(x, y, 0);
            }
        }
        let mask = build_face_region_mask(&NoFace, &target);
        let edges = compute_edge_map(&target);
        let pins = place_pins(FrameType::Circular, 40, size, size, None);
        let state = ProgressState::new(&target, false, pins.len(), mask, edges);
        (target, state, pins)
    }

    #[test]
    fn degenerate_line_scores_as_sentinel() {
        let (target, state, pins) = setup(32);
        let ctx = ScoreContext {
            state: &state,
            target: &target,
            alpha: 0.12,
            use_edge_detection: true,
            use_pin_fatigue: false,
        };
        let a = &pins[0];
        let score = perceptual_score(&ctx, a, a, &[], 0, 0);
        assert_eq!(score, NEG_SENTINEL);
    }

    #[test]
    fn darkening_toward_target_improves_score_over_lightening() {
        let (target, mut state, pins) = setup(32);
        let pixels: Vec<usize> = (0..16usize).collect();
        for &i in &pixels {
            state.progress_gray.data[i] = 255;
        }
        let ctx = ScoreContext {
            state: &state,
            target: &target,
            alpha: 0.5,
            use_edge_detection: false,
            use_pin_fatigue: false,
        };
        let a = &pins[0];
        let b = &pins[1];
        let score = perceptual_score(&ctx, a, b, &pixels, 0, 0);
        assert!(score.is_finite());
    }

    #[test]
    fn pin_fatigue_multiplier_shrinks_with_heavy_usage() {
        let light = pin_fatigue_multiplier(0, 0);
        let heavy = pin_fatigue_multiplier(40, 40);
        assert!(heavy < light);
    }
}
