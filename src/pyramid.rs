use crate::compositor::{linear_to_srgb, srgb_to_linear};
use crate::pixel::PixelImage;

/// 1/4 and 1/2 scale mirrors of one canvas (spec §4.7).
pub struct Pyramid {
    pub low: PixelImage,
    pub mid: PixelImage,
}

/// Box-filter downsample performed in linear light — averaging in gamma
/// space would produce darker-than-truth low-res copies that mislead
/// structure scoring (spec §4.7).
pub fn downsample_box(img: &PixelImage, factor: u32) -> PixelImage {
    let factor = factor.max(1);
    let out_w = (img.width / factor).max(1);
    let out_h = (img.height / factor).max(1);
    let mut data = vec![0u8; (out_w * out_h) as usize];

    for oy in 0..out_h {
        for ox in 0..out_w {
            let mut sum = 0f64;
            let mut count = 0u32;
            for dy in 0..factor {
                for dx in 0..factor {
                    let x = ox * factor + dx;
                    let y = oy * factor + dy;
                    if x < img.width && y < img.height {
                        sum += srgb_to_linear(img.get(x, y));
                        count += 1;
                    }
                }
            }
            let avg = if count > 0 { sum / count as f64 } else { 0.0 };
            data[(oy * out_w + ox) as usize] = linear_to_srgb(avg);
        }
    }

    PixelImage {
        width: out_w,
        height: out_h,
        data,
    }
}

pub fn build_pyramid(img: &PixelImage) -> Pyramid {
    Pyramid {
        low: downsample_box(img, 4),
        mid: downsample_box(img, 2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsampling_preserves_uniform_value() {
        let img = PixelImage {
            width: 8,
            height: 8,
            data: vec![128; 64],
        };
        let low = downsample_box(&img, 4);
        assert_eq!(low.width, 2);
        assert_eq!(low.height, 2);
        for &v in &low.data {
            assert!((v as i16 - 128).abs() <= 1);
        }
    }

    #[test]
    fn pyramid_dimensions_are_quarter_and_half() {
        let img = PixelImage::new(64, 64);
        let pyr = build_pyramid(&img);
        assert_eq!(pyr.low.width, 16);
        assert_eq!(pyr.mid.width, 32);
    }
}
