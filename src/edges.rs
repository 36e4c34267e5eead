use crate::pins::Pin;
use crate::pixel::PixelImage;

/// Output of the edge pipeline (spec §4.3): normalized magnitude plus a unit
/// tangent vector per pixel.
#[derive(Clone)]
pub struct EdgeMap {
    pub magnitude: Vec<u8>,
    pub tangent_x: Vec<f32>,
    pub tangent_y: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

const SOBEL_X: [[i32; 3]; 3] = [[-1, 0, 1], [-2, 0, 2], [-1, 0, 1]];
const SOBEL_Y: [[i32; 3]; 3] = [[-1, -2, -1], [0, 0, 0], [1, 2, 1]];

pub fn compute_edge_map(img: &PixelImage) -> EdgeMap {
    let (w, h) = (img.width as i64, img.height as i64);
    let mut gx = vec![0f32; img.len()];
    let mut gy = vec![0f32; img.len()];
    let mut raw_mag = vec![0f32; img.len()];

    for y in 0..h {
        for x in 0..w {
            let mut sx = 0i32;
            let mut sy = 0i32;
            for ky in -1..=1i64 {
                for kx in -1..=1i64 {
                    let px = x + kx;
                    let py = y + ky;
                    let v = if px < 0 || py < 0 || px >= w || py >= h {
                        0
                    } else {
                        img.get(px as u32, py as u32) as i32
                    };
                    sx += SOBEL_X[(ky + 1) as usize][(kx + 1) as usize] * v;
                    sy += SOBEL_Y[(ky + 1) as usize][(kx + 1) as usize] * v;
                }
            }
            let idx = (y * w + x) as usize;
            gx[idx] = sx as f32;
            gy[idx] = sy as f32;
            raw_mag[idx] = ((sx * sx + sy * sy) as f32).sqrt();
        }
    }

    let max_mag = raw_mag.iter().cloned().fold(0f32, f32::max).max(1e-6);
    let mut magnitude = vec![0u8; img.len()];
    let mut tangent_x = vec![0f32; img.len()];
    let mut tangent_y = vec![0f32; img.len()];

    for i in 0..img.len() {
        let norm = (raw_mag[i] / max_mag).clamp(0.0, 1.0);
        let curved = norm.powf(0.7);
        magnitude[i] = (curved * 255.0).round() as u8;

        let g = (gx[i] * gx[i] + gy[i] * gy[i]).sqrt();
        if g > 1e-6 {
            tangent_x[i] = -gy[i] / g;
            tangent_y[i] = gx[i] / g;
        }
    }

    EdgeMap {
        magnitude,
        tangent_x,
        tangent_y,
        width: img.width,
        height: img.height,
    }
}

/// Sample 5 evenly-spaced points along `(a,b)`, project each pixel's edge
/// tangent onto the line direction, weight by local edge magnitude (spec
/// §4.8 step 1, reused as a scalar bonus in §4.9.a).
pub fn edge_alignment(edges: &EdgeMap, a: &Pin, b: &Pin) -> f64 {
    let (ax, ay) = (a.x as f64, a.y as f64);
    let (bx, by) = (b.x as f64, b.y as f64);
    let (dx, dy) = (bx - ax, by - ay);
    let len = (dx * dx + dy * dy).sqrt();
    if len < 1e-6 {
        return 0.0;
    }
    let (ux, uy) = (dx / len, dy / len);

    let mut total = 0.0;
    for k in 0..5 {
        let t = k as f64 / 4.0;
        let x = (ax + t * dx).round().clamp(0.0, edges.width as f64 - 1.0) as u32;
        let y = (ay + t * dy).round().clamp(0.0, edges.height as f64 - 1.0) as u32;
        let idx = (y * edges.width + x) as usize;
        let proj = (ux * edges.tangent_x[idx] as f64 + uy * edges.tangent_y[idx] as f64).abs();
        let weight = edges.magnitude[idx] as f64 / 255.0;
        total += proj * weight;
    }
    total / 5.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_image_has_no_edges() {
        let img = PixelImage {
            width: 8,
            height: 8,
            data: vec![128; 64],
        };
        let edges = compute_edge_map(&img);
        assert!(edges.magnitude.iter().all(|&m| m == 0));
    }

    #[test]
    fn vertical_bar_produces_edges_at_its_columns() {
        let mut img = PixelImage::new(16, 16);
        for y in 0..16 {
            for x in 6..10 {
                img.set(x, y, 0);
            }
        }
        let edges = compute_edge_map(&img);
        let any_edge = edges.magnitude.iter().any(|&m| m > 0);
        assert!(any_edge);
    }

    #[test]
    fn edge_alignment_is_zero_for_degenerate_line() {
        let img = PixelImage::new(16, 16);
        let edges = compute_edge_map(&img);
        let a = Pin { index: 0, x: 5, y: 5 };
        let b = Pin { index: 1, x: 5, y: 5 };
        assert_eq!(edge_alignment(&edges, &a, &b), 0.0);
    }

    #[test]
    fn tangent_vectors_are_unit_length_where_defined() {
        let mut img = PixelImage::new(16, 16);
        for y in 0..16 {
            for x in 6..10 {
                img.set(x, y, 0);
            }
        }
        let edges = compute_edge_map(&img);
        for i in 0..edges.tangent_x.len() {
            let len = (edges.tangent_x[i].powi(2) + edges.tangent_y[i].powi(2)).sqrt();
            assert!(len < 1.0001);
        }
    }
}
