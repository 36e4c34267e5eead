use crate::params::FrameType;

/// A nail on the physical frame; index into the fixed perimeter sequence.
/// Adjacency in index space always matches geometric adjacency — min-skip
/// relies on this (spec §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Pin {
    pub index: u32,
    pub x: u16,
    pub y: u16,
}

/// The angular range a face subtends on a circular frame, used to bias pin
/// density toward the face (spec §4.2).
#[derive(Clone, Copy, Debug)]
pub struct FaceSector {
    pub center_angle: f64,
    pub half_angle: f64,
}

impl FaceSector {
    pub fn from_face_box(cx: f64, cy: f64, radius: f64, face_cx: f64, face_cy: f64, face_w: f64) -> Self {
        let center_angle = (face_cy - cy).atan2(face_cx - cx);
        let half_angle = (face_w / 2.0).atan2(radius);
        FaceSector {
            center_angle,
            half_angle,
        }
    }

    fn contains(&self, angle: f64) -> bool {
        angular_diff(angle, self.center_angle) <= self.half_angle
    }
}

fn angular_diff(a: f64, b: f64) -> f64 {
    let two_pi = std::f64::consts::TAU;
    let mut d = (a - b) % two_pi;
    if d > std::f64::consts::PI {
        d -= two_pi;
    } else if d < -std::f64::consts::PI {
        d += two_pi;
    }
    d.abs()
}

/// Modular index distance between two pins on a perimeter of `count` pins.
pub fn circular_distance(a: u32, b: u32, count: u32) -> u32 {
    let diff = a.abs_diff(b);
    diff.min(count - diff)
}

/// Place pins on the frame perimeter. For circular frames with a face
/// sector, overshoots `pin_count` by up to 15% rather than truncating
/// (spec §9 design note); pins are re-indexed densely in perimeter order.
pub fn place_pins(
    frame_type: FrameType,
    pin_count: u32,
    width: u32,
    height: u32,
    face_sector: Option<FaceSector>,
) -> Vec<Pin> {
    match frame_type {
        FrameType::Circular => place_circular(pin_count, width, height, face_sector),
        FrameType::Square | FrameType::Rectangular => place_rectangular(pin_count, width, height),
    }
}

fn place_circular(pin_count: u32, width: u32, height: u32, face_sector: Option<FaceSector>) -> Vec<Pin> {
    let cx = width as f64 / 2.0;
    let cy = height as f64 / 2.0;
    let radius = (width.min(height) as f64) / 2.0 - 5.0;
    let two_pi = std::f64::consts::TAU;

    let angles: Vec<f64> = match face_sector {
        None => (0..pin_count).map(|i| two_pi * i as f64 / pin_count as f64).collect(),
        Some(sector) => {
            let baseline_step = two_pi / pin_count as f64;
            let compressed_step = baseline_step / 1.4;
            let max_count = ((pin_count as f64) * 1.15).ceil() as usize;
            let mut angles = Vec::with_capacity(max_count);
            let mut angle = 0.0;
            while angle < two_pi && angles.len() < max_count {
                angles.push(angle);
                let step = if sector.contains(angle) {
                    compressed_step
                } else {
                    baseline_step
                };
                angle += step;
            }
            angles
        }
    };

    angles
        .into_iter()
        .enumerate()
        .map(|(i, angle)| Pin {
            index: i as u32,
            x: (cx + radius * angle.cos()).round().clamp(0.0, u16::MAX as f64) as u16,
            y: (cy + radius * angle.sin()).round().clamp(0.0, u16::MAX as f64) as u16,
        })
        .collect()
}

fn place_rectangular(pin_count: u32, width: u32, height: u32) -> Vec<Pin> {
    const MARGIN: f64 = 5.0;
    let per_side = pin_count / 4;
    let w = width as f64;
    let h = height as f64;

    let lerp = |a: f64, b: f64, t: f64| a + (b - a) * t;
    let side_points = |count: u32, from: (f64, f64), to: (f64, f64)| -> Vec<(f64, f64)> {
        (0..count)
            .map(|i| {
                let t = i as f64 / count as f64;
                (lerp(from.0, to.0, t), lerp(from.1, to.1, t))
            })
            .collect()
    };

    let mut points = Vec::with_capacity((per_side * 4) as usize);
    points.extend(side_points(per_side, (MARGIN, MARGIN), (w - MARGIN, MARGIN)));
    points.extend(side_points(per_side, (w - MARGIN, MARGIN), (w - MARGIN, h - MARGIN)));
    points.extend(side_points(per_side, (w - MARGIN, h - MARGIN), (MARGIN, h - MARGIN)));
    points.extend(side_points(per_side, (MARGIN, h - MARGIN), (MARGIN, MARGIN)));

    points
        .into_iter()
        .enumerate()
        .map(|(i, (x, y))| Pin {
            index: i as u32,
            x: x.round().clamp(0.0, u16::MAX as f64) as u16,
            y: y.round().clamp(0.0, u16::MAX as f64) as u16,
        })
        .collect()
}
