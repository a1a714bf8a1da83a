//! Per-image gain compensation.
//!
//! Every pair of images contributes its overlap pixel count `N` and the mean
//! pixel intensity of each side over that overlap. Gains minimise
//!
//! ```text
//! Σ_ij N_ij (α (g_i I_ij - g_j I_ji)² + β (1 - g_i)²)
//! ```
//!
//! which is a small dense linear system.

use image::{GrayImage, Luma, RgbImage};
use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::grid::ImageGrid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureParams {
    /// Pixels whose channels are all below this are masked out.
    pub dark_threshold: u8,
    /// Weight of the intensity-difference term.
    pub alpha: f64,
    /// Weight of the pull towards unit gain.
    pub beta: f64,
}

impl Default for ExposureParams {
    fn default() -> Self {
        Self {
            dark_threshold: 5,
            alpha: 0.01,
            beta: 100.0,
        }
    }
}

/// 255 where a pixel carries content, 0 where it is near black.
pub fn valid_mask(img: &RgbImage, dark_threshold: u8) -> GrayImage {
    let (w, h) = img.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let px = img.get_pixel(x, y).0;
        if px.iter().all(|&c| c < dark_threshold) {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

fn intensity(px: [u8; 3]) -> f64 {
    px.iter()
        .map(|&c| (c as f64) * (c as f64))
        .sum::<f64>()
        .sqrt()
}

/// Gains for images all placed at the same top-left origin.
pub fn compute_gains(
    images: &[&RgbImage],
    masks: &[&GrayImage],
    params: &ExposureParams,
) -> Vec<f64> {
    let n = images.len().min(masks.len());
    let mut counts = DMatrix::<f64>::zeros(n, n);
    let mut means = DMatrix::<f64>::zeros(n, n);

    for i in 0..n {
        for j in i..n {
            let w = images[i].width().min(images[j].width());
            let h = images[i].height().min(images[j].height());
            let (mut count, mut sum_i, mut sum_j) = (0usize, 0.0, 0.0);
            for y in 0..h {
                for x in 0..w {
                    if masks[i].get_pixel(x, y).0[0] != 0 && masks[j].get_pixel(x, y).0[0] != 0 {
                        count += 1;
                        sum_i += intensity(images[i].get_pixel(x, y).0);
                        sum_j += intensity(images[j].get_pixel(x, y).0);
                    }
                }
            }
            let count = count.max(1) as f64;
            counts[(i, j)] = count;
            counts[(j, i)] = count;
            means[(i, j)] = sum_i / count;
            means[(j, i)] = sum_j / count;
        }
    }

    let (alpha, beta) = (params.alpha, params.beta);
    let mut a = DMatrix::<f64>::zeros(n, n);
    let mut b = DVector::<f64>::zeros(n);
    for i in 0..n {
        for j in 0..n {
            b[i] += beta * counts[(i, j)];
            a[(i, i)] += beta * counts[(i, j)];
            if j == i {
                continue;
            }
            a[(i, i)] += 2.0 * alpha * means[(i, j)] * means[(i, j)] * counts[(i, j)];
            a[(i, j)] -= 2.0 * alpha * means[(i, j)] * means[(j, i)] * counts[(i, j)];
        }
    }

    match a.lu().solve(&b) {
        Some(g) if g.iter().all(|v| v.is_finite()) => g.iter().copied().collect(),
        _ => {
            debug!("gain system is singular, keeping unit gains");
            vec![1.0; n]
        }
    }
}

/// Scale every channel by `gain`, rounding and saturating.
pub fn apply_gain(img: &mut RgbImage, gain: f64) {
    for px in img.pixels_mut() {
        for c in px.0.iter_mut() {
            *c = (*c as f64 * gain).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Equalise exposure across the grid in place. Returns the gains in
/// row-major order.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(images = images.len()))
)]
pub fn compensate_exposure(images: &mut ImageGrid<RgbImage>, params: &ExposureParams) -> Vec<f64> {
    let masks: Vec<GrayImage> = images
        .iter()
        .map(|(_, img)| valid_mask(img, params.dark_threshold))
        .collect();
    let gains = {
        let imgs: Vec<&RgbImage> = images.iter().map(|(_, img)| img).collect();
        let masks: Vec<&GrayImage> = masks.iter().collect();
        compute_gains(&imgs, &masks, params)
    };
    for ((pos, img), &gain) in images.iter_mut().zip(&gains) {
        info!("{pos}: gain {gain:.4}");
        apply_gain(img, gain);
    }
    gains
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn mean(img: &RgbImage) -> f64 {
        img.pixels().map(|p| p.0[0] as f64).sum::<f64>() / (img.width() * img.height()) as f64
    }

    #[test]
    fn mask_drops_near_black_pixels() {
        let mut img = RgbImage::from_pixel(3, 1, Rgb([4, 4, 4]));
        img.put_pixel(1, 0, Rgb([4, 5, 0]));
        img.put_pixel(2, 0, Rgb([200, 0, 0]));
        let m = valid_mask(&img, 5);
        assert_eq!(m.as_raw(), &vec![0, 255, 255]);
    }

    #[test]
    fn exposure_gap_shrinks() {
        let mut grid = ImageGrid::from_rows(vec![vec![
            RgbImage::from_pixel(20, 10, Rgb([100, 100, 100])),
            RgbImage::from_pixel(20, 10, Rgb([50, 50, 50])),
        ]]);
        let gains = compensate_exposure(&mut grid, &ExposureParams::default());
        assert!(gains[0] < 1.0 && gains[1] > 1.0);
        let rows = grid.rows();
        let (a, b) = (mean(&rows[0][0]), mean(&rows[0][1]));
        assert!((a - b).abs() <= 25.0, "gap {a} vs {b}");
        // Closed form for this configuration: g = (0.684, 1.158).
        assert!((gains[0] - 0.684).abs() < 1e-3);
        assert!((gains[1] - 1.158).abs() < 1e-3);
    }

    #[test]
    fn equal_images_keep_unit_gain() {
        let img = RgbImage::from_pixel(8, 8, Rgb([80, 90, 100]));
        let masks = [valid_mask(&img, 5), valid_mask(&img, 5)];
        let gains = compute_gains(
            &[&img, &img],
            &[&masks[0], &masks[1]],
            &ExposureParams::default(),
        );
        for g in gains {
            assert!((g - 1.0).abs() < 1e-9);
        }
    }
}
