use std::collections::HashMap;
use std::sync::Arc;

use crate::pins::Pin;

/// Core Bresenham pixels between two points, always included regardless of
/// thickness (spec §4.5).
pub fn bresenham_line(x0: i64, y0: i64, x1: i64, y1: i64) -> Vec<(i64, i64)> {
    let mut points = Vec::new();
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (x0, y0);

    loop {
        points.push((x, y));
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
    points
}

/// Thicken a core line by perpendicular offsets up to `(width-1)/2` pixels
/// on either side (spec §4.5).
fn thicken(core: &[(i64, i64)], width_px: u32) -> Vec<(i64, i64)> {
    if width_px <= 1 || core.len() < 2 {
        return core.to_vec();
    }
    let half = ((width_px as i64) - 1) / 2;
    if half == 0 {
        return core.to_vec();
    }

    let (x0, y0) = core[0];
    let (x1, y1) = core[core.len() - 1];
    let (dx, dy) = ((x1 - x0) as f64, (y1 - y0) as f64);
    let len = (dx * dx + dy * dy).sqrt().max(1e-6);
    let (px, py) = (-dy / len, dx / len);

    let mut thickened = Vec::with_capacity(core.len() * (2 * half as usize + 1));
    for &(x, y) in core {
        for offset in -half..=half {
            thickened.push((
                x + (px * offset as f64).round() as i64,
                y + (py * offset as f64).round() as i64,
            ));
        }
    }
    thickened
}

fn clamp_to_indices(points: &[(i64, i64)], width: u32, height: u32) -> Vec<usize> {
    let mut seen = std::collections::HashSet::with_capacity(points.len());
    let mut out = Vec::with_capacity(points.len());
    for &(x, y) in points {
        if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
            continue;
        }
        let idx = y as usize * width as usize + x as usize;
        if seen.insert(idx) {
            out.push(idx);
        }
    }
    out
}

/// Pure rasterization: core Bresenham pixels of `(a,b)`, thickened, deduped,
/// and clamped into the canvas bounds. Use `LineCache` to memoize repeated
/// calls during scoring.
pub fn rasterize(a: &Pin, b: &Pin, width_px: u32, width: u32, height: u32) -> Vec<usize> {
    let core = bresenham_line(a.x as i64, a.y as i64, b.x as i64, b.y as i64);
    let thick = thicken(&core, width_px);
    clamp_to_indices(&thick, width, height)
}

/// Memoizes `(min(a,b), max(a,b), thickness) -> pixel indices`. A pure memo:
/// absence never changes the result, only the cost (spec §3 invariant 5).
#[derive(Default)]
pub struct LineCache {
    cache: HashMap<(u32, u32, u32), Arc<Vec<usize>>>,
}

impl LineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute(
        &mut self,
        a: &Pin,
        b: &Pin,
        width_px: u32,
        width: u32,
        height: u32,
    ) -> Arc<Vec<usize>> {
        let key = (a.index.min(b.index), a.index.max(b.index), width_px);
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }
        let pixels = Arc::new(rasterize(a, b, width_px, width, height));
        self.cache.insert(key, pixels.clone());
        pixels
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bresenham_is_continuous() {
        let pts = bresenham_line(0, 0, 10, 4);
        for w in pts.windows(2) {
            let (dx, dy) = (w[1].0 - w[0].0, w[1].1 - w[0].1);
            assert!(dx.abs() <= 1 && dy.abs() <= 1);
        }
        assert_eq!(*pts.first().unwrap(), (0, 0));
        assert_eq!(*pts.last().unwrap(), (10, 4));
    }

    #[test]
    fn coincident_pins_score_as_zero_pixels() {
        let a = Pin { index: 0, x: 5, y: 5 };
        let b = Pin { index: 1, x: 5, y: 5 };
        let pixels = rasterize(&a, &b, 1, 100, 100);
        assert_eq!(pixels.len(), 1);
    }

    #[test]
    fn cache_returns_identical_results_across_calls() {
        let mut cache = LineCache::new();
        let a = Pin { index: 0, x: 5, y: 5 };
        let b = Pin { index: 1, x: 40, y: 60 };
        let first = cache.get_or_compute(&a, &b, 1, 100, 100);
        let second = cache.get_or_compute(&b, &a, 1, 100, 100);
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn thicker_lines_cover_more_pixels() {
        let a = Pin { index: 0, x: 10, y: 50 };
        let b = Pin { index: 1, x: 90, y: 50 };
        let thin = rasterize(&a, &b, 1, 100, 100);
        let thick = rasterize(&a, &b, 5, 100, 100);
        assert!(thick.len() > thin.len());
    }
}
