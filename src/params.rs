use serde::{Deserialize, Serialize};

use crate::error::{GenerationError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    Circular,
    Square,
    Rectangular,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    Monochrome,
    Color,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    Fast,
    Balanced,
    High,
}

impl QualityPreset {
    /// Three-stage coarse-to-fine driving is reserved for `high` and for LAB
    /// color mode, per spec §4.10; everything else runs a single greedy pass.
    pub fn uses_staged_driver(self, color_mode: ColorMode) -> bool {
        matches!(self, QualityPreset::High) || color_mode == ColorMode::Color
    }

    pub fn background_min_skip(self) -> u32 {
        match self {
            QualityPreset::Fast => 6,
            QualityPreset::Balanced => 7,
            QualityPreset::High => 8,
        }
    }

    pub fn uses_annealing_and_genetic(self) -> bool {
        matches!(self, QualityPreset::High)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ImageCrop {
    pub scale: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl Default for ImageCrop {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub frame_type: FrameType,
    pub pin_count: u32,
    pub frame_size: u32,
    pub thread_width: f64,
    pub thread_opacity: f64,
    pub color_mode: ColorMode,
    pub max_threads: u32,
    pub quality_preset: QualityPreset,
    pub use_edge_detection: bool,
    pub use_simulated_annealing: bool,
    pub use_pin_fatigue: bool,
    pub min_pin_skip: u32,
    pub image_crop: ImageCrop,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            frame_type: FrameType::Circular,
            pin_count: 400,
            frame_size: 500,
            thread_width: 0.4,
            thread_opacity: 0.12,
            color_mode: ColorMode::Monochrome,
            max_threads: 10_000,
            quality_preset: QualityPreset::Balanced,
            use_edge_detection: true,
            use_simulated_annealing: false,
            use_pin_fatigue: false,
            min_pin_skip: 2,
            image_crop: ImageCrop::default(),
        }
    }
}

impl GenerationParams {
    /// Input validation (spec §7 category 1). Fails the job before any work
    /// is done and names the offending field.
    pub fn validate(&self) -> Result<()> {
        fn check(cond: bool, field: &'static str, reason: impl Into<String>) -> Result<()> {
            if cond {
                Ok(())
            } else {
                Err(GenerationError::InvalidParam {
                    field,
                    reason: reason.into(),
                })
            }
        }

        check(
            (100..=800).contains(&self.pin_count),
            "pin_count",
            "must be in [100, 800]",
        )?;
        check(
            self.pin_count >= 3,
            "pin_count",
            "frame requires at least 3 pins",
        )?;
        check(
            (200..=1000).contains(&self.frame_size),
            "frame_size",
            "must be in [200, 1000] mm",
        )?;
        check(self.frame_size > 0, "frame_size", "must be non-zero")?;
        check(
            (0.2..=1.5).contains(&self.thread_width),
            "thread_width",
            "must be in [0.2, 1.5] mm",
        )?;
        check(
            (0.03..=0.35).contains(&self.thread_opacity),
            "thread_opacity",
            "must be in [0.03, 0.35]",
        )?;
        check(
            (500..=50_000).contains(&self.max_threads),
            "max_threads",
            "must be in [500, 50000]",
        )?;
        check(
            (1..=50).contains(&self.min_pin_skip),
            "min_pin_skip",
            "must be in [1, 50]",
        )?;
        check(
            (1.0..=3.0).contains(&self.image_crop.scale),
            "image_crop.scale",
            "must be in [1, 3]",
        )?;
        check(
            (-1.0..=1.0).contains(&self.image_crop.offset_x),
            "image_crop.offset_x",
            "must be in [-1, 1]",
        )?;
        check(
            (-1.0..=1.0).contains(&self.image_crop.offset_y),
            "image_crop.offset_y",
            "must be in [-1, 1]",
        )?;
        Ok(())
    }

    /// `T = min(frame_size, 512)` per spec §4.1.
    pub fn target_edge_size(&self) -> u32 {
        self.frame_size.min(512)
    }

    pub fn thread_width_px(&self) -> u32 {
        (2.0 * self.thread_width).round().max(1.0) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        GenerationParams::default().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_pin_count() {
        let mut p = GenerationParams::default();
        p.pin_count = 2;
        let err = p.validate().unwrap_err();
        assert!(matches!(err, GenerationError::InvalidParam { field: "pin_count", .. }));
    }

    #[test]
    fn target_edge_size_clamps_to_512() {
        let mut p = GenerationParams::default();
        p.frame_size = 1000;
        assert_eq!(p.target_edge_size(), 512);
        p.frame_size = 300;
        assert_eq!(p.target_edge_size(), 300);
    }
}
