//! Lens undistortion by backward remapping.
//!
//! Every destination pixel is treated as an ideal pinhole projection; it is
//! pushed through the distortion model to find where it was recorded in the
//! source image, which is then sampled bilinearly. The same camera matrix is
//! used for both sides, so the output keeps the input resolution and focal
//! lengths.

use image::RgbImage;
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::camera::{Distortion, Intrinsics};
use crate::error::UndistortError;

/// Per-pixel source coordinates for a fixed camera and image size.
#[derive(Clone, Debug)]
pub struct UndistortMap {
    width: u32,
    height: u32,
    map_x: Vec<f32>,
    map_y: Vec<f32>,
}

impl UndistortMap {
    pub fn new(
        intr: &Intrinsics,
        dist: &Distortion,
        width: u32,
        height: u32,
    ) -> Result<Self, UndistortError> {
        if !intr.is_valid() || intr.matrix().try_inverse().is_none() {
            return Err(UndistortError::SingularCameraMatrix);
        }
        let n = width as usize * height as usize;
        let mut map_x = Vec::with_capacity(n);
        let mut map_y = Vec::with_capacity(n);
        for y in 0..height {
            for x in 0..width {
                let ideal = intr.to_normalized(Point2::new(x as f64, y as f64));
                let src = intr.to_pixel(dist.distort(ideal));
                map_x.push(src.x as f32);
                map_y.push(src.y as f32);
            }
        }
        Ok(Self {
            width,
            height,
            map_x,
            map_y,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Source position sampled for destination pixel `(x, y)`.
    pub fn source(&self, x: u32, y: u32) -> Option<(f32, f32)> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = y as usize * self.width as usize + x as usize;
        Some((self.map_x[i], self.map_y[i]))
    }

    /// Resample `src`; taps outside the source contribute black.
    pub fn apply(&self, src: &RgbImage) -> RgbImage {
        let mut out = RgbImage::new(self.width, self.height);
        for (x, y, px) in out.enumerate_pixels_mut() {
            let i = y as usize * self.width as usize + x as usize;
            px.0 = sample_rgb_constant(src, self.map_x[i], self.map_y[i]);
        }
        out
    }
}

fn sample_rgb_constant(img: &RgbImage, x: f32, y: f32) -> [u8; 3] {
    if !x.is_finite() || !y.is_finite() {
        return [0; 3];
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);
    let (w, h) = (img.width() as i64, img.height() as i64);

    let tap = |xx: i64, yy: i64| -> [f32; 3] {
        if xx < 0 || yy < 0 || xx >= w || yy >= h {
            [0.0; 3]
        } else {
            img.get_pixel(xx as u32, yy as u32).0.map(f32::from)
        }
    };
    let p00 = tap(x0, y0);
    let p10 = tap(x0 + 1, y0);
    let p01 = tap(x0, y0 + 1);
    let p11 = tap(x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] + fx * (p10[c] - p00[c]);
        let bottom = p01[c] + fx * (p11[c] - p01[c]);
        let v = top + fy * (bottom - top);
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Undistort one image with the given camera parameters.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, intr, dist), fields(width = img.width(), height = img.height()))
)]
pub fn undistort_image(
    img: &RgbImage,
    intr: &Intrinsics,
    dist: &Distortion,
) -> Result<RgbImage, UndistortError> {
    if img.width() == 0 || img.height() == 0 {
        return Err(UndistortError::EmptyImage);
    }
    let map = UndistortMap::new(intr, dist, img.width(), img.height())?;
    Ok(map.apply(img))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn intr() -> Intrinsics {
        Intrinsics {
            fx: 50.0,
            fy: 48.0,
            cx: 15.5,
            cy: 11.5,
        }
    }

    fn pattern(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, ((x + y) * 3 % 256) as u8])
        })
    }

    #[test]
    fn zero_distortion_is_identity() {
        let img = pattern(32, 24);
        let out = undistort_image(&img, &intr(), &Distortion::default()).expect("undistort");
        assert_eq!(out, img);
    }

    #[test]
    fn barrel_distortion_pulls_samples_outward() {
        let dist = Distortion {
            k1: 0.2,
            ..Distortion::default()
        };
        let map = UndistortMap::new(&intr(), &dist, 32, 24).expect("map");
        let (sx, sy) = map.source(31, 23).expect("in range");
        assert!(sx > 31.0 && sy > 23.0);
        let (cx, cy) = map.source(15, 11).expect("in range");
        assert!((cx - 15.0).abs() < 0.01 && (cy - 11.0).abs() < 0.01);
    }

    #[test]
    fn rejects_degenerate_inputs() {
        let bad = Intrinsics {
            fx: 0.0,
            ..intr()
        };
        assert_eq!(
            UndistortMap::new(&bad, &Distortion::default(), 4, 4).err(),
            Some(UndistortError::SingularCameraMatrix)
        );
        assert_eq!(
            undistort_image(&RgbImage::new(0, 0), &intr(), &Distortion::default()).err(),
            Some(UndistortError::EmptyImage)
        );
    }
}
