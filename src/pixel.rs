use serde::{Deserialize, Serialize};

/// Grayscale raster: 255 = white, 0 = black (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PixelImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![255; (width * height) as usize],
        }
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, v: u8) {
        self.data[(y * self.width + x) as usize] = v;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// RGB raster (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColorImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<(u8, u8, u8)>,
}

impl ColorImage {
    pub fn new_white(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![(255, 255, 255); (width * height) as usize],
        }
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> (u8, u8, u8) {
        self.data[(y * self.width + x) as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, v: (u8, u8, u8)) {
        self.data[(y * self.width + x) as usize] = v;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
