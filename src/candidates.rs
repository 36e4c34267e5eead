use frand::Rand;
use indexmap::IndexSet;

use crate::edges::{edge_alignment, EdgeMap};
use crate::face::{effective_min_skip, FaceRegionMask};
use crate::params::QualityPreset;
use crate::pins::Pin;

pub struct CandidateParams {
    pub k_edge: usize,
    pub k_rand: usize,
}

impl CandidateParams {
    pub fn for_preset(preset: QualityPreset) -> Self {
        match preset {
            QualityPreset::Fast => CandidateParams { k_edge: 25, k_rand: 10 },
            QualityPreset::Balanced => CandidateParams { k_edge: 30, k_rand: 12 },
            QualityPreset::High => CandidateParams { k_edge: 35, k_rand: 15 },
        }
    }
}

/// Up to ~50 candidate end pins for a thread starting at `from` (spec §4.8).
#[allow(clippy::too_many_arguments)]
pub fn generate_candidates(
    from: &Pin,
    pins: &[Pin],
    edges: &EdgeMap,
    face_mask: &FaceRegionMask,
    preset: QualityPreset,
    configured_min_pin_skip: u32,
    params: &CandidateParams,
    rng: &mut Rand,
) -> Vec<u32> {
    let valid: Vec<&Pin> = pins
        .iter()
        .filter(|p| {
            p.index != from.index
                && crate::pins::circular_distance(from.index, p.index, pins.len() as u32)
                    >= effective_min_skip(face_mask, from, p, preset, configured_min_pin_skip)
        })
        .collect();

    if valid.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(f64, u32)> = valid
        .iter()
        .map(|p| (edge_alignment(edges, from, p), p.index))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut chosen: IndexSet<u32> = scored.iter().take(params.k_edge).map(|(_, idx)| *idx).collect();

    let remaining: Vec<u32> = valid
        .iter()
        .map(|p| p.index)
        .filter(|idx| !chosen.contains(idx))
        .collect();

    let sampled = fisher_yates_sample(&remaining, params.k_rand, rng);
    for idx in sampled {
        chosen.insert(idx);
    }

    chosen.into_iter().collect()
}

fn fisher_yates_sample(pool: &[u32], k: usize, rng: &mut Rand) -> Vec<u32> {
    let mut pool = pool.to_vec();
    let take = k.min(pool.len());
    let mut result = Vec::with_capacity(take);
    let n = pool.len();
    for i in 0..take {
        let j = i + (rng.gen_range(0..(n - i) as u32) as usize);
        pool.swap(i, j);
        result.push(pool[i]);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edges::compute_edge_map;
    use crate::face::{build_face_region_mask, BoundingBox, FaceDetector};
    use crate::pins::place_pins;
    use crate::pixel::PixelImage;
    use crate::params::FrameType;

    struct NoFace;
    impl FaceDetector for NoFace {
        fn detect(&self, _img: &PixelImage) -> Option<BoundingBox> {
            None
        }
    }

    #[test]
    fn candidates_respect_min_skip() {
        let img = PixelImage::new(64, 64);
        let mask = build_face_region_mask(&NoFace, &img);
        let edges = compute_edge_map(&img);
        let pins = place_pins(FrameType::Circular, 40, 64, 64, None);
        let mut rng = Rand::with_seed(1);
        let params = CandidateParams::for_preset(QualityPreset::Balanced);
        let candidates = generate_candidates(&pins[0], &pins, &edges, &mask, QualityPreset::Balanced, 3, &params, &mut rng);
        for idx in candidates {
            let skip = crate::pins::circular_distance(0, idx, pins.len() as u32);
            assert!(skip >= 3);
        }
    }

    #[test]
    fn candidates_never_include_the_source_pin() {
        let img = PixelImage::new(64, 64);
        let mask = build_face_region_mask(&NoFace, &img);
        let edges = compute_edge_map(&img);
        let pins = place_pins(FrameType::Circular, 40, 64, 64, None);
        let mut rng = Rand::with_seed(2);
        let params = CandidateParams::for_preset(QualityPreset::Fast);
        let candidates = generate_candidates(&pins[5], &pins, &edges, &mask, QualityPreset::Fast, 2, &params, &mut rng);
        assert!(!candidates.contains(&5));
    }

    #[test]
    fn candidate_count_is_bounded() {
        let img = PixelImage::new(64, 64);
        let mask = build_face_region_mask(&NoFace, &img);
        let edges = compute_edge_map(&img);
        let pins = place_pins(FrameType::Circular, 200, 64, 64, None);
        let mut rng = Rand::with_seed(3);
        let params = CandidateParams::for_preset(QualityPreset::High);
        let candidates = generate_candidates(&pins[0], &pins, &edges, &mask, QualityPreset::High, 2, &params, &mut rng);
        assert!(candidates.len() <= 50);
    }
}
