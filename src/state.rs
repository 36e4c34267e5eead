use crate::compositor;
use crate::edges::EdgeMap;
use crate::face::FaceRegionMask;
use crate::pins::Pin;
use crate::pixel::{ColorImage, PixelImage};
use crate::pyramid::{self, Pyramid};
use crate::raster::LineCache;

/// Owns every piece of mutable state for exactly one generation job (spec
/// §3, §9). Handed exclusively to the optimization driver for the job's
/// lifetime; never shared between jobs.
pub struct ProgressState {
    pub width: u32,
    pub height: u32,
    pub progress_gray: PixelImage,
    pub progress_rgb: Option<ColorImage>,
    pub density: Vec<f32>,
    pub overdraw: Vec<u16>,
    pub edges: EdgeMap,
    pub target_pyramid: Pyramid,
    pub progress_pyramid: Pyramid,
    pub pin_usage: Vec<u32>,
    pub line_cache: LineCache,
    pub face_mask: FaceRegionMask,
    pub current_pin: u32,
}

impl ProgressState {
    pub fn new(
        target_gray: &PixelImage,
        color_mode_white: bool,
        pin_count: usize,
        face_mask: FaceRegionMask,
        edges: EdgeMap,
    ) -> Self {
        let width = target_gray.width;
        let height = target_gray.height;
        let n = (width * height) as usize;
        let target_pyramid = pyramid::build_pyramid(target_gray);
        let progress_gray = PixelImage::new(width, height);
        let progress_pyramid = pyramid::build_pyramid(&progress_gray);

        ProgressState {
            width,
            height,
            progress_rgb: if color_mode_white {
                Some(ColorImage::new_white(width, height))
            } else {
                None
            },
            progress_gray,
            density: vec![0.0; n],
            overdraw: vec![0; n],
            edges,
            target_pyramid,
            progress_pyramid,
            pin_usage: vec![0; pin_count],
            line_cache: LineCache::new(),
            face_mask,
            current_pin: 0,
        }
    }

    pub fn rasterize(&mut self, a: &Pin, b: &Pin, width_px: u32) -> std::sync::Arc<Vec<usize>> {
        self.line_cache.get_or_compute(a, b, width_px, self.width, self.height)
    }

    /// Forward-composite over `pixels` at opacity `alpha`, updating density
    /// and overdraw (spec §4.6). In color mode `color` selects the thread
    /// being drawn onto `progress_rgb`; in monochrome mode it is ignored and
    /// the black-thread approximation is applied to `progress_gray`.
    pub fn apply_forward(&mut self, pixels: &[usize], color: Option<(u8, u8, u8)>, alpha: f64) {
        for &i in pixels {
            match (&mut self.progress_rgb, color) {
                (Some(rgb), Some(c)) => {
                    rgb.data[i] = compositor::forward_color(rgb.data[i], c, alpha);
                }
                _ => {
                    self.progress_gray.data[i] = compositor::forward_gray(self.progress_gray.data[i], alpha);
                }
            }
            self.density[i] = compositor::update_density(self.density[i], alpha);
            self.overdraw[i] = self.overdraw[i].saturating_add(1);
        }
    }

    /// Revert a forward composite (used by refinement/annealing/backtracking
    /// only — spec §4.6).
    pub fn revert(&mut self, pixels: &[usize], color: Option<(u8, u8, u8)>, alpha: f64) {
        for &i in pixels {
            match (&mut self.progress_rgb, color) {
                (Some(rgb), Some(c)) => {
                    rgb.data[i] = compositor::reverse_color(rgb.data[i], c, alpha);
                }
                _ => {
                    self.progress_gray.data[i] = compositor::reverse_gray(self.progress_gray.data[i], alpha);
                }
            }
            self.density[i] = compositor::revert_density(self.density[i], alpha);
            self.overdraw[i] = self.overdraw[i].saturating_sub(1);
        }
    }

    pub fn refresh_pyramid(&mut self) {
        self.progress_pyramid = pyramid::build_pyramid(&self.progress_gray);
    }
}
