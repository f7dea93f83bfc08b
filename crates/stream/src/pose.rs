//! Pose landmark overlay.
//!
//! Estimators return 17 COCO keypoints with coordinates normalised to the
//! frame (`0.0..=1.0`). Drawing happens on the full-size frame.

use image::{Rgb, RgbImage};

use crate::error::Result;

pub const INPUT_SIZE: u32 = 192;

const POINT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const EDGE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const POINT_RADIUS: i32 = 3;

/// COCO keypoint pairs joined by the skeleton overlay.
pub const SKELETON_EDGES: [(usize, usize); 18] = [
    (0, 1), (0, 2), (1, 3), (2, 4),
    (0, 5), (0, 6), (5, 7), (7, 9), (6, 8), (8, 10),
    (5, 6), (5, 11), (6, 12),
    (11, 12), (11, 13), (13, 15), (12, 14), (14, 16),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

pub trait PoseEstimator: Send {
    /// Keypoints for the person in `frame`. `frame` is already resized to
    /// `INPUT_SIZE` x `INPUT_SIZE`.
    fn estimate(&mut self, frame: &RgbImage) -> Result<Vec<Keypoint>>;
}

/// Draw keypoints and skeleton edges scoring above `threshold`.
pub fn draw_pose(img: &mut RgbImage, keypoints: &[Keypoint], threshold: f32) {
    let (w, h) = img.dimensions();
    let points: Vec<(i32, i32, f32)> = keypoints
        .iter()
        .map(|kp| ((kp.x * w as f32) as i32, (kp.y * h as f32) as i32, kp.score))
        .collect();

    for &(x, y, score) in &points {
        if score > threshold {
            fill_circle(img, x, y, POINT_RADIUS, POINT_COLOR);
        }
    }
    for &(i, j) in SKELETON_EDGES.iter() {
        let (Some(a), Some(b)) = (points.get(i), points.get(j)) else {
            continue;
        };
        if a.2 > threshold && b.2 > threshold {
            draw_line(img, (a.0, a.1), (b.0, b.1), EDGE_COLOR);
        }
    }
}

fn put(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    if x >= 0 && y >= 0 && (x as u32) < w && (y as u32) < h {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn fill_circle(img: &mut RgbImage, cx: i32, cy: i32, r: i32, color: Rgb<u8>) {
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                put(img, cx + dx, cy + dy, color);
            }
        }
    }
}

// Bresenham
fn draw_line(img: &mut RgbImage, from: (i32, i32), to: (i32, i32), color: Rgb<u8>) {
    let (mut x0, mut y0) = from;
    let (x1, y1) = to;
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(img, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(feature = "pose-tract")]
pub use tract::MoveNet;

#[cfg(feature = "pose-tract")]
mod tract {
    use std::path::Path;

    use image::RgbImage;
    use tract_onnx::prelude::*;

    use super::{Keypoint, PoseEstimator, INPUT_SIZE};
    use crate::error::{Result, StreamError};

    /// MoveNet single-pose (lightning) exported to ONNX. Takes an int32
    /// NHWC tensor and yields `[1, 1, 17, 3]` rows of `(y, x, score)`.
    pub struct MoveNet {
        model: TypedRunnableModel<TypedModel>,
    }

    impl MoveNet {
        pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
            let path = path.as_ref();
            let size = INPUT_SIZE as usize;
            let model = tract_onnx::onnx()
                .model_for_path(path)
                .map_err(|e| StreamError::Model(format!("load {}: {}", path.display(), e)))?
                .with_input_fact(0, InferenceFact::dt_shape(i32::datum_type(), tvec!(1, size, size, 3)))
                .map_err(|e| StreamError::Model(e.to_string()))?
                .into_optimized()
                .map_err(|e| StreamError::Model(e.to_string()))?
                .into_runnable()
                .map_err(|e| StreamError::Model(e.to_string()))?;
            Ok(Self { model })
        }
    }

    impl PoseEstimator for MoveNet {
        fn estimate(&mut self, frame: &RgbImage) -> Result<Vec<Keypoint>> {
            let size = INPUT_SIZE as usize;
            let input = tract_ndarray::Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
                frame.get_pixel(x as u32, y as u32)[c] as i32
            });
            let outputs = self
                .model
                .run(tvec!(input.into_tensor().into()))
                .map_err(|e| StreamError::Model(e.to_string()))?;
            let output = outputs.first().ok_or_else(|| StreamError::Model("model produced no outputs".into()))?;
            let view = output
                .to_array_view::<f32>()
                .map_err(|e| StreamError::Model(e.to_string()))?;
            let flat: Vec<f32> = view.iter().copied().collect();
            Ok(flat
                .chunks_exact(3)
                .map(|row| Keypoint { y: row[0], x: row[1], score: row[2] })
                .collect())
        }
    }
}
