//! Multi-band (Laplacian pyramid) blending.
//!
//! Every fed image contributes its Laplacian pyramid weighted by the
//! Gaussian pyramid of its mask. After all images are fed each band is
//! normalised by its accumulated weight and the pyramid is collapsed.
//! Pyramids use the 5-tap `[1 4 6 4 1] / 16` kernel.

use image::{GrayImage, Luma, Rgb, RgbImage};
use log::debug;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::BlendError;
use crate::plane::Plane;
use crate::warp::{reflect, Rect};

const WEIGHT_EPS: f32 = 1e-5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendParams {
    /// Requested number of bands; capped by the canvas size.
    pub bands: u32,
}

impl Default for BlendParams {
    fn default() -> Self {
        Self { bands: 5 }
    }
}

impl BlendParams {
    /// Reflected context kept around each warped image, `3 · 2^bands`.
    pub fn margin(&self) -> u32 {
        3 << self.bands.min(16)
    }
}

/// `gfedcb|abcdefgh|gfedcba`
#[inline]
fn reflect101(p: isize, n: usize) -> usize {
    let n = n as isize;
    if n == 1 {
        return 0;
    }
    let period = 2 * n - 2;
    let p = p.rem_euclid(period);
    (if p >= n { period - p } else { p }) as usize
}

/// Blur with the 5-tap kernel and drop every second row and column.
/// The result is `((w + 1) / 2, (h + 1) / 2)`.
pub fn pyr_down(src: &Plane) -> Plane {
    const K: [f32; 5] = [1.0, 4.0, 6.0, 4.0, 1.0];
    let (sw, sh) = (src.width, src.height);
    let (dw, dh) = (sw.div_ceil(2), sh.div_ceil(2));

    let mut tmp = Plane::zeros(dw, sh);
    for y in 0..sh {
        for x in 0..dw {
            let cx = 2 * x as isize;
            let acc: f32 = K
                .iter()
                .enumerate()
                .map(|(k, w)| w * src.get(reflect101(cx + k as isize - 2, sw), y))
                .sum();
            tmp.set(x, y, acc / 16.0);
        }
    }
    Plane::from_fn(dw, dh, |x, y| {
        let cy = 2 * y as isize;
        let acc: f32 = K
            .iter()
            .enumerate()
            .map(|(k, w)| w * tmp.get(x, reflect101(cy + k as isize - 2, sh)))
            .sum();
        acc / 16.0
    })
}

/// Row of the 2x upsampling filter: even outputs take `(s[i-1] + 6 s[i] + s[i+1]) / 8`,
/// odd outputs `(s[i] + s[i+1]) / 2`. The left border mirrors (`s[-1] = s[1]`),
/// the right border replicates (`s[n] = s[n-1]`).
#[inline]
fn up_tap(get: impl Fn(usize) -> f32, n: usize, d: usize) -> f32 {
    let i = d / 2;
    let at = |j: isize| -> f32 {
        let j = if j < 0 { (-j).min(n as isize - 1) } else { j.min(n as isize - 1) };
        get(j as usize)
    };
    let i = i as isize;
    if d % 2 == 0 {
        (at(i - 1) + 6.0 * at(i) + at(i + 1)) / 8.0
    } else {
        (at(i) + at(i + 1)) / 2.0
    }
}

/// Upsample to `width × height`, which must be `2w` or `2w - 1` per axis.
pub fn pyr_up(src: &Plane, width: usize, height: usize) -> Plane {
    let (sw, sh) = (src.width, src.height);
    let mut tmp = Plane::zeros(width, sh);
    for y in 0..sh {
        for x in 0..width {
            tmp.set(x, y, up_tap(|j| src.get(j, y), sw, x));
        }
    }
    Plane::from_fn(width, height, |x, y| up_tap(|j| tmp.get(x, j), sh, y))
}

fn gaussian_pyramid(base: Plane, bands: u32) -> Vec<Plane> {
    let mut pyr = vec![base];
    for i in 0..bands as usize {
        let next = pyr_down(&pyr[i]);
        pyr.push(next);
    }
    pyr
}

fn laplacian_pyramid(base: Plane, bands: u32) -> Vec<Plane> {
    let mut pyr = gaussian_pyramid(base, bands);
    for i in 0..bands as usize {
        let up = pyr_up(&pyr[i + 1], pyr[i].width, pyr[i].height);
        for (v, u) in pyr[i].data.iter_mut().zip(&up.data) {
            *v -= u;
        }
    }
    pyr
}

/// Accumulates images over a canvas region and blends them band by band.
#[derive(Debug)]
pub struct MultiBandBlender {
    roi: Rect,
    bands: u32,
    /// Per level, one accumulator per colour channel.
    laplace: Vec<[Plane; 3]>,
    weights: Vec<Plane>,
}

impl MultiBandBlender {
    /// Blender over the canvas region `roi`. The band count is capped at
    /// `ceil(log2(max(width, height)))` and the working area is padded to a
    /// multiple of `2^bands`.
    pub fn new(roi: Rect, bands: u32) -> Result<Self, BlendError> {
        if roi.is_empty() {
            return Err(BlendError::EmptyCanvas {
                width: roi.width,
                height: roi.height,
            });
        }
        let max_len = roi.width.max(roi.height);
        let cap = u32::BITS - (max_len - 1).leading_zeros();
        let bands = bands.min(cap);
        let step = 1usize << bands;
        let pw = (roi.width as usize).div_ceil(step) * step;
        let ph = (roi.height as usize).div_ceil(step) * step;

        let mut laplace = Vec::with_capacity(bands as usize + 1);
        let mut weights = Vec::with_capacity(bands as usize + 1);
        let (mut w, mut h) = (pw, ph);
        for _ in 0..=bands {
            laplace.push([Plane::zeros(w, h), Plane::zeros(w, h), Plane::zeros(w, h)]);
            weights.push(Plane::zeros(w, h));
            w = w.div_ceil(2);
            h = h.div_ceil(2);
        }
        debug!(
            "blender over {}x{} at ({}, {}): {bands} bands, padded to {pw}x{ph}",
            roi.width, roi.height, roi.x, roi.y
        );
        Ok(Self {
            roi,
            bands,
            laplace,
            weights,
        })
    }

    pub fn bands(&self) -> u32 {
        self.bands
    }

    pub fn roi(&self) -> Rect {
        self.roi
    }

    /// Add `img` placed with its top-left corner at canvas position `tl`.
    /// `mask` weights each pixel, 255 being full weight.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, img, mask), fields(width = img.width(), height = img.height()))
    )]
    pub fn feed(
        &mut self,
        img: &RgbImage,
        mask: &GrayImage,
        tl: (u32, u32),
    ) -> Result<(), BlendError> {
        let (iw, ih) = img.dimensions();
        if mask.dimensions() != (iw, ih) {
            return Err(BlendError::MaskSizeMismatch {
                image_width: iw,
                image_height: ih,
                mask_width: mask.width(),
                mask_height: mask.height(),
            });
        }
        let rx = tl.0 as i64 - self.roi.x as i64;
        let ry = tl.1 as i64 - self.roi.y as i64;
        if rx < 0
            || ry < 0
            || rx + iw as i64 > self.roi.width as i64
            || ry + ih as i64 > self.roi.height as i64
        {
            return Err(BlendError::OutsideCanvas {
                x: tl.0 as i64,
                y: tl.1 as i64,
                width: iw,
                height: ih,
            });
        }
        if iw == 0 || ih == 0 {
            return Ok(());
        }

        let (pw, ph) = (self.weights[0].width as i64, self.weights[0].height as i64);
        let step = 1i64 << self.bands;
        let gap = 3 * step;

        // Aligned working window around the image, inside the padded area.
        let mut x0 = ((rx - gap).max(0) / step) * step;
        let mut y0 = ((ry - gap).max(0) / step) * step;
        let mut x1 = (rx + iw as i64 + gap).min(pw);
        let mut y1 = (ry + ih as i64 + gap).min(ph);
        x1 = x0 + (x1 - x0 + step - 1) / step * step;
        y1 = y0 + (y1 - y0 + step - 1) / step * step;
        let dx = (x1 - pw).max(0);
        let dy = (y1 - ph).max(0);
        x0 -= dx;
        x1 -= dx;
        y0 -= dy;
        y1 -= dy;

        let (left, top) = (rx - x0, ry - y0);
        let (ww, wh) = ((x1 - x0) as usize, (y1 - y0) as usize);
        let (iw64, ih64) = (iw as i64, ih as i64);

        let weight = Plane::from_fn(ww, wh, |x, y| {
            let (sx, sy) = (x as i64 - left, y as i64 - top);
            if sx < 0 || sy < 0 || sx >= iw64 || sy >= ih64 {
                0.0
            } else {
                mask.get_pixel(sx as u32, sy as u32).0[0] as f32 / 255.0
            }
        });
        let weight_pyr = gaussian_pyramid(weight, self.bands);

        for c in 0..3 {
            let channel = Plane::from_fn(ww, wh, |x, y| {
                let sx = reflect(x as i64 - left, iw64) as u32;
                let sy = reflect(y as i64 - top, ih64) as u32;
                img.get_pixel(sx, sy).0[c] as f32
            });
            let lap = laplacian_pyramid(channel, self.bands);
            for (level, (src, w)) in lap.iter().zip(&weight_pyr).enumerate() {
                let (ox, oy) = ((x0 >> level) as usize, (y0 >> level) as usize);
                let dst = &mut self.laplace[level][c];
                for y in 0..src.height {
                    for x in 0..src.width {
                        let i = (oy + y) * dst.width + ox + x;
                        dst.data[i] += src.get(x, y) * w.get(x, y);
                    }
                }
            }
        }
        for (level, w) in weight_pyr.iter().enumerate() {
            let (ox, oy) = ((x0 >> level) as usize, (y0 >> level) as usize);
            let dst = &mut self.weights[level];
            for y in 0..w.height {
                for x in 0..w.width {
                    let i = (oy + y) * dst.width + ox + x;
                    dst.data[i] += w.get(x, y);
                }
            }
        }
        Ok(())
    }

    /// Normalise, collapse and convert. Returns the blended region and the
    /// mask of pixels that received any weight.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(bands = self.bands))
    )]
    pub fn blend(mut self) -> (RgbImage, GrayImage) {
        for (level, weight) in self.weights.iter().enumerate() {
            for channel in self.laplace[level].iter_mut() {
                for (v, w) in channel.data.iter_mut().zip(&weight.data) {
                    *v /= w + WEIGHT_EPS;
                }
            }
        }
        for level in (1..self.laplace.len()).rev() {
            let (lower, upper) = self.laplace.split_at_mut(level);
            let target = &mut lower[level - 1];
            for (dst, src) in target.iter_mut().zip(upper[0].iter()) {
                let up = pyr_up(src, dst.width, dst.height);
                for (v, u) in dst.data.iter_mut().zip(&up.data) {
                    *v += u;
                }
            }
        }

        let (w, h) = (self.roi.width, self.roi.height);
        let weight0 = &self.weights[0];
        let base = &self.laplace[0];
        let mut image = RgbImage::new(w, h);
        let mut mask = GrayImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let (xu, yu) = (x as usize, y as usize);
                if weight0.get(xu, yu) <= WEIGHT_EPS {
                    continue;
                }
                let px = [0, 1, 2].map(|c| base[c].get(xu, yu).round().clamp(0.0, 255.0) as u8);
                image.put_pixel(x, y, Rgb(px));
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        (image, mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            Rgb([
                (x * 3 + y) as u8,
                ((x * y) % 251) as u8,
                if (x / 8 + y / 8) % 2 == 0 { 40 } else { 210 },
            ])
        })
    }

    #[test]
    fn pyramid_sizes_and_constants() {
        let p = Plane::from_fn(7, 5, |_, _| 3.0);
        let d = pyr_down(&p);
        assert_eq!((d.width, d.height), (4, 3));
        assert!(d.data.iter().all(|v| (v - 3.0).abs() < 1e-6));
        let u = pyr_up(&d, 7, 5);
        assert_eq!((u.width, u.height), (7, 5));
        assert!(u.data.iter().all(|v| (v - 3.0).abs() < 1e-6));
    }

    #[test]
    fn band_count_is_capped_by_size() {
        let b = MultiBandBlender::new(Rect::new(0, 0, 3, 3), 5).expect("blender");
        assert_eq!(b.bands(), 2);
        let b = MultiBandBlender::new(Rect::new(10, 10, 640, 480), 5).expect("blender");
        assert_eq!(b.bands(), 5);
        assert!(matches!(
            MultiBandBlender::new(Rect::new(0, 0, 0, 8), 5),
            Err(BlendError::EmptyCanvas { .. })
        ));
    }

    #[test]
    fn single_fully_masked_image_is_reproduced() {
        let img = pattern(64, 64);
        let mask = GrayImage::from_pixel(64, 64, Luma([255]));
        let mut b = MultiBandBlender::new(Rect::new(0, 0, 64, 64), 5).expect("blender");
        b.feed(&img, &mask, (0, 0)).expect("feed");
        let (out, out_mask) = b.blend();
        assert!(out_mask.pixels().all(|p| p.0[0] == 255));
        for (a, e) in out.pixels().zip(img.pixels()) {
            for c in 0..3 {
                assert!((a.0[c] as i32 - e.0[c] as i32).abs() <= 1, "{a:?} vs {e:?}");
            }
        }
    }

    #[test]
    fn unfed_pixels_stay_black() {
        let img = RgbImage::from_pixel(32, 64, Rgb([120, 60, 200]));
        let mask = GrayImage::from_pixel(32, 64, Luma([255]));
        let mut b = MultiBandBlender::new(Rect::new(0, 0, 96, 64), 5).expect("blender");
        b.feed(&img, &mask, (0, 0)).expect("feed");
        let (out, out_mask) = b.blend();
        assert_eq!(out.get_pixel(10, 10), &Rgb([120, 60, 200]));
        assert_eq!(out_mask.get_pixel(10, 10).0[0], 255);
        assert_eq!(out.get_pixel(90, 10), &Rgb([0, 0, 0]));
        assert_eq!(out_mask.get_pixel(90, 10).0[0], 0);
    }

    #[test]
    fn adjacent_equal_images_blend_seamlessly() {
        let left = RgbImage::from_pixel(32, 32, Rgb([90, 90, 90]));
        let right = RgbImage::from_pixel(32, 32, Rgb([90, 90, 90]));
        let full = GrayImage::from_pixel(32, 32, Luma([255]));
        let mut b = MultiBandBlender::new(Rect::new(100, 50, 64, 32), 5).expect("blender");
        b.feed(&left, &full, (100, 50)).expect("left");
        b.feed(&right, &full, (132, 50)).expect("right");
        let (out, _) = b.blend();
        assert!(out.pixels().all(|p| p.0 == [90, 90, 90]));
    }

    #[test]
    fn feed_validates_geometry() {
        let mut b = MultiBandBlender::new(Rect::new(0, 0, 16, 16), 3).expect("blender");
        let img = RgbImage::new(8, 8);
        assert!(matches!(
            b.feed(&img, &GrayImage::new(8, 7), (0, 0)),
            Err(BlendError::MaskSizeMismatch { .. })
        ));
        assert!(matches!(
            b.feed(&img, &GrayImage::new(8, 8), (12, 0)),
            Err(BlendError::OutsideCanvas { .. })
        ));
    }
}
