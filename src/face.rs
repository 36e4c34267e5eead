use crate::params::QualityPreset;
use crate::pixel::PixelImage;
use crate::pins::Pin;

#[derive(Clone, Copy, Debug)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    fn scaled_about_center(&self, factor: f64) -> Self {
        let (cx, cy) = self.center();
        let w = self.width * factor;
        let h = self.height * factor;
        BoundingBox {
            x: cx - w / 2.0,
            y: cy - h / 2.0,
            width: w,
            height: h,
        }
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

/// Face detection is consumed as a black box (spec §1 Non-goals): any
/// implementation — a real model, a remote call, a test stub — can be
/// plugged in through this trait. Detector failure never surfaces to the
/// caller; `build_face_region_mask` falls back to a centred default box.
pub trait FaceDetector {
    fn detect(&self, img: &PixelImage) -> Option<BoundingBox>;
}

/// Deterministic built-in fallback: a Haar-like cascade (eye band darker
/// than forehead band) over a sliding window, grounded on the retrieved
/// pack's MTCNN-style proposal generator. Good enough to bias pin density
/// and region policy without requiring a trained model in-tree.
pub struct HaarLikeFaceDetector;

impl FaceDetector for HaarLikeFaceDetector {
    fn detect(&self, img: &PixelImage) -> Option<BoundingBox> {
        let min_size = (img.width.min(img.height) / 4).max(8);
        let step = (min_size / 4).max(1);
        let mut best: Option<(f64, BoundingBox)> = None;

        let mut size = min_size;
        while size <= img.width.min(img.height) {
            let mut y = 0;
            while y + size <= img.height {
                let mut x = 0;
                while x + size <= img.width {
                    let score = haar_face_score(img, x, y, size);
                    if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                        best = Some((
                            score,
                            BoundingBox {
                                x: x as f64,
                                y: y as f64,
                                width: size as f64,
                                height: size as f64,
                            },
                        ));
                    }
                    x += step;
                }
                y += step;
            }
            size += step.max(1) * 2;
        }

        best.and_then(|(score, bbox)| if score > 0.55 { Some(bbox) } else { None })
    }
}

fn haar_face_score(img: &PixelImage, x: u32, y: u32, size: u32) -> f64 {
    let band = (size / 6).max(1);
    let forehead_y = y + size / 6;
    let eye_y = y + size / 3;
    let forehead = region_mean(img, x, forehead_y, size, band);
    let eyes = region_mean(img, x, eye_y, size, band);
    ((forehead - eyes) / 255.0 + 1.0) / 2.0
}

fn region_mean(img: &PixelImage, x: u32, y: u32, width: u32, height: u32) -> f64 {
    let mut sum = 0u64;
    let mut count = 0u64;
    for dy in 0..height {
        for dx in 0..width {
            let px = x + dx;
            let py = y + dy;
            if px < img.width && py < img.height {
                sum += img.get(px, py) as u64;
                count += 1;
            }
        }
    }
    if count == 0 { 0.0 } else { sum as f64 / count as f64 }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Region {
    Face,
    Body,
    Background,
}

pub struct FaceRegionMask {
    pub width: u32,
    pub height: u32,
    pub face_mask: Vec<bool>,
    pub body_mask: Vec<bool>,
    pub face_box: Option<BoundingBox>,
}

/// Build face/body/background masks for a preprocessed `width x height`
/// image (spec §4.4). Always matches the coordinates of the preprocessed
/// image, never the original upload.
pub fn build_face_region_mask(detector: &dyn FaceDetector, img: &PixelImage) -> FaceRegionMask {
    let w = img.width as f64;
    let h = img.height as f64;

    let detected = detector.detect(img);
    let (face_box, used_fallback) = match detected {
        Some(b) => (b, false),
        None => (
            BoundingBox {
                x: 0.3 * w,
                y: 0.15 * h,
                width: 0.4 * w,
                height: 0.5 * h,
            },
            true,
        ),
    };
    if used_fallback {
        log::info!("face detection unavailable, using centred default box");
    }

    let face_region = face_box.scaled_about_center(1.1);
    let body_region = face_box.scaled_about_center_xy(1.6, 2.0);

    let mut face_mask = vec![false; img.len()];
    let mut body_mask = vec![false; img.len()];
    for y in 0..img.height {
        for x in 0..img.width {
            let idx = (y * img.width + x) as usize;
            let (fx, fy) = (x as f64 + 0.5, y as f64 + 0.5);
            face_mask[idx] = face_region.contains(fx, fy);
            body_mask[idx] = body_region.contains(fx, fy);
        }
    }

    FaceRegionMask {
        width: img.width,
        height: img.height,
        face_mask,
        body_mask,
        face_box: Some(face_box),
    }
}

impl BoundingBox {
    fn scaled_about_center_xy(&self, fx: f64, fy: f64) -> Self {
        let (cx, cy) = self.center();
        let w = self.width * fx;
        let h = self.height * fy;
        BoundingBox {
            x: cx - w / 2.0,
            y: cy - h / 2.0,
            width: w,
            height: h,
        }
    }
}

impl FaceRegionMask {
    pub fn region_of(&self, pin: &Pin) -> Region {
        let idx = (pin.y as u32).min(self.height - 1) as usize * self.width as usize
            + (pin.x as u32).min(self.width - 1) as usize;
        if self.face_mask[idx] {
            Region::Face
        } else if self.body_mask[idx] {
            Region::Body
        } else {
            Region::Background
        }
    }

    /// Fraction of `pixels` that fall inside the face mask (spec §4.4).
    pub fn line_face_overlap(&self, pixels: &[usize]) -> f64 {
        if pixels.is_empty() {
            return 0.0;
        }
        let hits = pixels.iter().filter(|&&i| self.face_mask[i]).count();
        hits as f64 / pixels.len() as f64
    }
}

pub fn min_skip_for_region(region: Region, preset: QualityPreset) -> u32 {
    match region {
        Region::Face => 2,
        Region::Body => 4,
        Region::Background => preset.background_min_skip(),
    }
}

/// `effective_min_skip(a,b)` per spec §4.4.
pub fn effective_min_skip(
    mask: &FaceRegionMask,
    a: &Pin,
    b: &Pin,
    preset: QualityPreset,
    configured_min_pin_skip: u32,
) -> u32 {
    let ra = mask.region_of(a);
    let rb = mask.region_of(b);
    let skip = if ra == Region::Face || rb == Region::Face {
        2
    } else {
        min_skip_for_region(ra, preset).max(min_skip_for_region(rb, preset))
    };
    skip.max(configured_min_pin_skip)
}

pub fn overdraw_threshold(region: Region) -> f32 {
    match region {
        Region::Face | Region::Body => 0.80,
        Region::Background => 0.90,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoFace;
    impl FaceDetector for NoFace {
        fn detect(&self, _img: &PixelImage) -> Option<BoundingBox> {
            None
        }
    }

    #[test]
    fn missing_detector_falls_back_to_centred_box() {
        let img = PixelImage::new(100, 100);
        let mask = build_face_region_mask(&NoFace, &img);
        let bbox = mask.face_box.unwrap();
        assert_eq!(bbox.x, 30.0);
        assert_eq!(bbox.y, 15.0);
        assert_eq!(bbox.width, 40.0);
        assert_eq!(bbox.height, 50.0);
    }

    #[test]
    fn face_pins_always_get_min_skip_two() {
        let img = PixelImage::new(100, 100);
        let mask = build_face_region_mask(&NoFace, &img);
        let face_pin = Pin { index: 0, x: 50, y: 40 };
        let far_pin = Pin { index: 1, x: 5, y: 5 };
        let skip = effective_min_skip(&mask, &face_pin, &far_pin, QualityPreset::Balanced, 2);
        assert_eq!(skip, 2);
    }

    #[test]
    fn overlap_is_fraction_of_pixels_in_face_mask() {
        let img = PixelImage::new(100, 100);
        let mask = build_face_region_mask(&NoFace, &img);
        let pixels: Vec<usize> = (0..100).map(|i| i as usize).collect();
        let overlap = mask.line_face_overlap(&pixels);
        assert!((0.0..=1.0).contains(&overlap));
    }
}
