use frand::Rand;

use crate::color::PALETTE;
use crate::face::effective_min_skip;
use crate::params::GenerationParams;
use crate::pins::Pin;
use crate::result::{mse_ssim, ThreadConnection};
use crate::scoring::{perceptual_score, ScoreContext};
use crate::state::ProgressState;

const START_TEMPERATURE: f64 = 150.0;
const COOLING_RATE: f64 = 0.97;
const MAX_ITERATIONS: u32 = 1000;

fn connection_score(state: &ProgressState, target: &crate::pixel::PixelImage, params: &GenerationParams, pins: &[Pin], from: &Pin, to: &Pin) -> f64 {
    let pixels = crate::raster::rasterize(from, to, params.thread_width_px(), state.width, state.height);
    let ctx = ScoreContext {
        state,
        target,
        alpha: params.thread_opacity,
        use_edge_detection: params.use_edge_detection,
        use_pin_fatigue: params.use_pin_fatigue,
    };
    perceptual_score(&ctx, from, to, &pixels, state.pin_usage[from.index as usize], state.pin_usage[to.index as usize])
}

/// Simulated annealing over existing connections (spec §4.12). Monochrome
/// only; a no-op when `params.use_simulated_annealing` is false or the
/// canvas is in color mode (the caller is expected to check both before
/// invoking this).
pub fn simulated_annealing(
    state: &mut ProgressState,
    target: &crate::pixel::PixelImage,
    pins: &[Pin],
    params: &GenerationParams,
    connections: &mut [ThreadConnection],
    total_n: u32,
    rng: &mut Rand,
) {
    if connections.is_empty() {
        return;
    }
    let iterations = ((0.2 * total_n as f64).round() as u32).min(MAX_ITERATIONS);
    let mut temperature = START_TEMPERATURE;
    let black = &PALETTE[0];

    for _ in 0..iterations {
        let i = rng.gen_range(0..connections.len() as u32) as usize;
        let conn = connections[i].clone();
        let from = pins[conn.from_pin as usize];
        let old_to = pins[conn.to_pin as usize];

        let valid: Vec<&Pin> = pins
            .iter()
            .filter(|p| {
                p.index != from.index
                    && crate::pins::circular_distance(from.index, p.index, pins.len() as u32)
                        >= effective_min_skip(&state.face_mask, &from, p, params.quality_preset, params.min_pin_skip)
            })
            .collect();
        if valid.is_empty() {
            temperature *= COOLING_RATE;
            continue;
        }
        let new_to = *valid[rng.gen_range(0..valid.len() as u32) as usize];

        let old_score = connection_score(state, target, params, pins, &from, &old_to);
        let new_score = connection_score(state, target, params, pins, &from, &new_to);
        let delta = new_score - old_score;

        let accept = delta > 0.0 || rng.gen_range(0..1_000_000u32) as f64 / 1_000_000.0 < (delta / temperature).exp().min(1.0);
        if accept {
            let old_pixels = crate::raster::rasterize(&from, &old_to, params.thread_width_px(), state.width, state.height);
            state.revert(&old_pixels, None, params.thread_opacity);
            state.pin_usage[old_to.index as usize] -= 1;

            let new_pixels = crate::raster::rasterize(&from, &new_to, params.thread_width_px(), state.width, state.height);
            state.apply_forward(&new_pixels, None, params.thread_opacity);
            state.pin_usage[new_to.index as usize] += 1;

            connections[i] = ThreadConnection::new(from.index, new_to.index, black);
            if let Some(next) = connections.get_mut(i + 1) {
                // `next` holds its own implicit claim on the old shared
                // pin; move it to the new one rather than leaving a ghost
                // count behind.
                state.pin_usage[next.from_pin as usize] -= 1;
                next.from_pin = new_to.index;
                state.pin_usage[new_to.index as usize] += 1;
            }
        }

        temperature *= COOLING_RATE;
    }

    if let Some(last) = connections.last() {
        state.current_pin = last.to_pin;
    }
}

/// Rebuilds a fresh monochrome canvas by replaying `connections` in order
/// (spec §4.12's fitness function needs this from-scratch canvas).
fn rebuild_canvas(width: u32, height: u32, pins: &[Pin], connections: &[ThreadConnection], thread_width_px: u32, alpha: f64) -> crate::pixel::PixelImage {
    let mut canvas = crate::pixel::PixelImage::new(width, height);
    for c in connections {
        let from = &pins[c.from_pin as usize];
        let to = &pins[c.to_pin as usize];
        let pixels = crate::raster::rasterize(from, to, thread_width_px, width, height);
        for i in pixels {
            canvas.data[i] = crate::compositor::forward_gray(canvas.data[i], alpha);
        }
    }
    canvas
}

fn fitness(target: &crate::pixel::PixelImage, candidate: &[ThreadConnection], pins: &[Pin], thread_width_px: u32, alpha: f64) -> f64 {
    let canvas = rebuild_canvas(target.width, target.height, pins, candidate, thread_width_px, alpha);
    let (mse, _ssim) = mse_ssim(target, &canvas);
    1.0e6 / (mse + 1.0)
}

fn mutate(candidate: &mut [ThreadConnection], pins: &[Pin], params: &GenerationParams, rng: &mut Rand) {
    let black = &PALETTE[0];
    for i in 0..candidate.len() {
        if rng.gen_range(0..1000u32) as f64 / 1000.0 >= 0.15 {
            continue;
        }
        let from = pins[candidate[i].from_pin as usize];
        let valid: Vec<&Pin> = pins
            .iter()
            .filter(|p| {
                p.index != from.index
                    && crate::pins::circular_distance(from.index, p.index, pins.len() as u32) >= params.min_pin_skip
            })
            .collect();
        if valid.is_empty() {
            continue;
        }
        let new_to = valid[rng.gen_range(0..valid.len() as u32) as usize];
        candidate[i] = ThreadConnection::new(from.index, new_to.index, black);
        if let Some(next) = candidate.get_mut(i + 1) {
            next.from_pin = new_to.index;
        }
    }
}

fn crossover(a: &[ThreadConnection], b: &[ThreadConnection], rng: &mut Rand) -> Vec<ThreadConnection> {
    let len = a.len().min(b.len());
    if len == 0 {
        return a.to_vec();
    }
    let point = rng.gen_range(0..len as u32) as usize;
    let mut child: Vec<ThreadConnection> = a[..point].to_vec();
    child.extend_from_slice(&b[point..]);
    child
}

/// Genetic post-pass for the high preset, monochrome only (spec §4.12).
/// Replaces `connections` and `state`'s canvas in place with the fittest
/// variant found.
pub fn genetic_refinement(
    state: &mut ProgressState,
    target: &crate::pixel::PixelImage,
    pins: &[Pin],
    params: &GenerationParams,
    connections: &mut Vec<ThreadConnection>,
    rng: &mut Rand,
) {
    if connections.is_empty() {
        return;
    }
    const POPULATION: usize = 10;
    const GENERATIONS: u32 = 30;
    const SURVIVORS: usize = 5;
    let thread_width_px = params.thread_width_px();
    let alpha = params.thread_opacity;

    let mut population: Vec<Vec<ThreadConnection>> = (0..POPULATION).map(|_| connections.clone()).collect();
    for variant in population.iter_mut().skip(1) {
        mutate(variant, pins, params, rng);
    }

    for _ in 0..GENERATIONS {
        let mut scored: Vec<(f64, usize)> = population
            .iter()
            .enumerate()
            .map(|(i, v)| (fitness(target, v, pins, thread_width_px, alpha), i))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let survivors: Vec<Vec<ThreadConnection>> = scored.iter().take(SURVIVORS).map(|(_, i)| population[*i].clone()).collect();

        let mut next_gen = survivors.clone();
        while next_gen.len() < POPULATION {
            let a = &survivors[rng.gen_range(0..survivors.len() as u32) as usize];
            let b = &survivors[rng.gen_range(0..survivors.len() as u32) as usize];
            let mut child = crossover(a, b, rng);
            mutate(&mut child, pins, params, rng);
            next_gen.push(child);
        }
        population = next_gen;
    }

    let best = population
        .into_iter()
        .max_by(|a, b| {
            fitness(target, a, pins, thread_width_px, alpha)
                .partial_cmp(&fitness(target, b, pins, thread_width_px, alpha))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or_else(|| connections.clone());

    *connections = best;
    state.progress_gray = rebuild_canvas(target.width, target.height, pins, connections, thread_width_px, alpha);
    state.refresh_pyramid();
    state.pin_usage.iter_mut().for_each(|u| *u = 0);
    for c in connections.iter() {
        state.pin_usage[c.from_pin as usize] += 1;
        state.pin_usage[c.to_pin as usize] += 1;
    }
    if let Some(last) = connections.last() {
        state.current_pin = last.to_pin;
    }
}

/// Inspects the last 100 connections; drops ones whose removal improves
/// whole-canvas SSIM by at least 0.001 (spec §4.12). Monochrome only —
/// color-mode canvases aren't rebuildable from a single revert.
pub fn backtrack(state: &mut ProgressState, target: &crate::pixel::PixelImage, pins: &[Pin], params: &GenerationParams, connections: &mut Vec<ThreadConnection>) {
    let start = connections.len().saturating_sub(100);
    let thread_width_px = params.thread_width_px();
    let mut i = connections.len();
    while i > start {
        i -= 1;
        let conn = connections[i].clone();
        let from = pins[conn.from_pin as usize];
        let to = pins[conn.to_pin as usize];
        let pixels = crate::raster::rasterize(&from, &to, thread_width_px, state.width, state.height);

        let (_, ssim_before) = mse_ssim(target, &state.progress_gray);
        state.revert(&pixels, None, params.thread_opacity);
        let (_, ssim_after) = mse_ssim(target, &state.progress_gray);

        if ssim_after - ssim_before >= 0.001 {
            state.pin_usage[conn.from_pin as usize] -= 1;
            state.pin_usage[conn.to_pin as usize] -= 1;
            connections.remove(i);
        } else {
            state.apply_forward(&pixels, None, params.thread_opacity);
        }
    }

    if let Some(last) = connections.last() {
        state.current_pin = last.to_pin;
    } else {
        state.current_pin = 0;
    }
}
