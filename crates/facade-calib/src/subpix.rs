//! Gradient-orthogonality sub-pixel corner refinement.
//!
//! For a true corner `q`, every image gradient `g(p)` in its neighbourhood is
//! orthogonal to `p - q`. Summing `g gᵀ (p - q) = 0` over a Gaussian-weighted
//! window gives a 2x2 linear system that is re-centred and re-solved until
//! the update becomes negligible.

use facade_core::{sample_bilinear, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubPixParams {
    /// Half window size; the window is `(2 * half_window + 1)²` pixels.
    pub half_window: u32,
    pub max_iters: usize,
    /// Stop once the update is shorter than this (pixels).
    pub epsilon: f32,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            half_window: 5,
            max_iters: 100,
            epsilon: 1e-4,
        }
    }
}

fn gaussian_mask(half: i32) -> Vec<f32> {
    let norm = half.max(1) as f32;
    let weights: Vec<f32> = (-half..=half)
        .map(|k| {
            let t = k as f32 / norm;
            (-t * t).exp()
        })
        .collect();
    weights
        .iter()
        .flat_map(|wy| weights.iter().map(move |wx| wy * wx))
        .collect()
}

/// Refine a single corner.
///
/// A corner that drifts more than the half window from where it started is
/// reset to its start.
pub fn refine_corner(
    img: &GrayImageView<'_>,
    start: Point2<f32>,
    params: &SubPixParams,
) -> Point2<f32> {
    let half = params.half_window.max(1) as i32;
    let side = 2 * half + 1;
    let patch_side = side + 2;
    let mask = gaussian_mask(half);
    let eps_sq = params.epsilon * params.epsilon;

    let mut patch = vec![0.0f32; (patch_side * patch_side) as usize];
    let mut current = start;

    for _ in 0..params.max_iters.max(1) {
        // Patch centred on `current` with a one-pixel apron for gradients.
        let x0 = current.x - (half + 1) as f32;
        let y0 = current.y - (half + 1) as f32;
        for r in 0..patch_side {
            for c in 0..patch_side {
                patch[(r * patch_side + c) as usize] =
                    sample_bilinear(img, x0 + c as f32, y0 + r as f32);
            }
        }
        let at = |r: i32, c: i32| patch[(r * patch_side + c) as usize] as f64;

        let (mut a, mut b, mut c2) = (0.0f64, 0.0f64, 0.0f64);
        let (mut bb1, mut bb2) = (0.0f64, 0.0f64);
        for i in 0..side {
            let py = (i - half) as f64;
            for j in 0..side {
                let m = mask[(i * side + j) as usize] as f64;
                let gx = at(i + 1, j + 2) - at(i + 1, j);
                let gy = at(i + 2, j + 1) - at(i, j + 1);
                let gxx = gx * gx * m;
                let gxy = gx * gy * m;
                let gyy = gy * gy * m;
                let px = (j - half) as f64;

                a += gxx;
                b += gxy;
                c2 += gyy;
                bb1 += gxx * px + gxy * py;
                bb2 += gxy * px + gyy * py;
            }
        }

        let det = a * c2 - b * b;
        if det.abs() <= f64::EPSILON * f64::EPSILON {
            break;
        }
        let dx = ((c2 * bb1 - b * bb2) / det) as f32;
        let dy = ((a * bb2 - b * bb1) / det) as f32;
        let next = Point2::new(current.x + dx, current.y + dy);
        let err = dx * dx + dy * dy;
        current = next;

        let outside = current.x < 0.0
            || current.y < 0.0
            || current.x >= img.width as f32
            || current.y >= img.height as f32;
        if outside || err <= eps_sq {
            break;
        }
    }

    if (current.x - start.x).abs() > half as f32 || (current.y - start.y).abs() > half as f32 {
        start
    } else {
        current
    }
}

/// Refine all corners of one view.
pub fn refine_corners(
    img: &GrayImageView<'_>,
    corners: &[Point2<f32>],
    params: &SubPixParams,
) -> Vec<Point2<f32>> {
    corners
        .iter()
        .map(|&p| refine_corner(img, p, params))
        .collect()
}
