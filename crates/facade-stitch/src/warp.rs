//! Perspective warping onto the shared canvas and coverage claiming.
//!
//! Interpolation uses 5-bit fixed-point bilinear weights so that a tap
//! pattern of all-255 samples reproduces 255 exactly; footprint tests rely
//! on that.

use facade_core::Homography;
use image::{GrayImage, Luma, Rgb, RgbImage};
use log::warn;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

const INTER_BITS: u32 = 5;
const INTER_SCALE: i32 = 1 << INTER_BITS;
const WEIGHT_SHIFT: u32 = 2 * INTER_BITS;

/// Axis-aligned pixel rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Out-of-range handling for source taps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Border {
    /// Zero outside the source.
    Constant,
    /// `fedcba|abcdefgh|hgfedcb`.
    Reflect,
}

#[inline]
pub(crate) fn reflect(p: i64, n: i64) -> i64 {
    if n == 1 {
        return 0;
    }
    let period = 2 * n;
    let p = p.rem_euclid(period);
    if p >= n {
        period - 1 - p
    } else {
        p
    }
}

/// Source coordinate in 1/32 pixel units, or `None` where the projective
/// denominator vanishes.
#[inline]
fn source_fixed(inv: &Homography, x: u32, y: u32) -> Option<(i64, i64)> {
    let h = &inv.h;
    let (xf, yf) = (x as f64, y as f64);
    let w = h[(2, 0)] * xf + h[(2, 1)] * yf + h[(2, 2)];
    if w == 0.0 {
        return None;
    }
    let sx = (h[(0, 0)] * xf + h[(0, 1)] * yf + h[(0, 2)]) / w;
    let sy = (h[(1, 0)] * xf + h[(1, 1)] * yf + h[(1, 2)]) / w;
    let limit = (i32::MAX / INTER_SCALE) as f64;
    if !sx.is_finite() || !sy.is_finite() || sx.abs() > limit || sy.abs() > limit {
        return None;
    }
    Some((
        (sx * INTER_SCALE as f64).round() as i64,
        (sy * INTER_SCALE as f64).round() as i64,
    ))
}

#[inline]
fn weights(fx: i64, fy: i64) -> [i64; 4] {
    let s = INTER_SCALE as i64;
    [(s - fx) * (s - fy), fx * (s - fy), (s - fx) * fy, fx * fy]
}

fn sample<const C: usize>(
    src: &[u8],
    width: u32,
    height: u32,
    sx: i64,
    sy: i64,
    border: Border,
) -> Option<[u8; C]> {
    let s = INTER_SCALE as i64;
    let (x0, y0) = (sx.div_euclid(s), sy.div_euclid(s));
    let (fx, fy) = (sx.rem_euclid(s), sy.rem_euclid(s));
    let (w, h) = (width as i64, height as i64);
    let taps = [(x0, y0), (x0 + 1, y0), (x0, y0 + 1), (x0 + 1, y0 + 1)];
    let wts = weights(fx, fy);

    let mut acc = [0i64; C];
    let mut touched = false;
    for ((tx, ty), wt) in taps.into_iter().zip(wts) {
        let inside = tx >= 0 && ty >= 0 && tx < w && ty < h;
        let (tx, ty) = match (inside, border) {
            (true, _) => (tx, ty),
            (false, Border::Reflect) => (reflect(tx, w), reflect(ty, h)),
            (false, Border::Constant) => continue,
        };
        touched |= inside;
        let base = (ty * w + tx) as usize * C;
        for c in 0..C {
            acc[c] += wt * src[base + c] as i64;
        }
    }
    if border == Border::Constant && !touched {
        return None;
    }
    let half = 1i64 << (WEIGHT_SHIFT - 1);
    Some(acc.map(|v| ((v + half) >> WEIGHT_SHIFT).clamp(0, 255) as u8))
}

/// Warp `src` by `h` (source → canvas) into the canvas rectangle `roi`.
pub fn warp_rgb(src: &RgbImage, h: &Homography, roi: Rect, border: Border) -> RgbImage {
    let mut out = RgbImage::new(roi.width, roi.height);
    let Some(inv) = h.inverse() else {
        return out;
    };
    let (w, hgt) = src.dimensions();
    for (x, y, px) in out.enumerate_pixels_mut() {
        if let Some((sx, sy)) = source_fixed(&inv, roi.x + x, roi.y + y) {
            if let Some(v) = sample::<3>(src.as_raw(), w, hgt, sx, sy, border) {
                *px = Rgb(v);
            }
        }
    }
    out
}

/// Warp a single-channel mask, zero outside the source.
pub fn warp_mask(src: &GrayImage, h: &Homography, roi: Rect) -> GrayImage {
    let mut out = GrayImage::new(roi.width, roi.height);
    let Some(inv) = h.inverse() else {
        return out;
    };
    let (w, hgt) = src.dimensions();
    for (x, y, px) in out.enumerate_pixels_mut() {
        if let Some((sx, sy)) = source_fixed(&inv, roi.x + x, roi.y + y) {
            if let Some(v) = sample::<1>(src.as_raw(), w, hgt, sx, sy, Border::Constant) {
                *px = Luma(v);
            }
        }
    }
    out
}

/// Image rectangle shrunk by one pixel on every side.
pub fn footprint_source_mask(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let inner = x >= 1 && y >= 1 && x + 1 < width && y + 1 < height;
        Luma([if inner { 255 } else { 0 }])
    })
}

/// Canvas bounding box of an image warped by `h`, clipped to the canvas.
///
/// `None` when the image does not reach the canvas. When a corner maps
/// behind the projection plane the whole canvas is returned.
pub fn warped_bounds(h: &Homography, width: u32, height: u32, canvas: (u32, u32)) -> Option<Rect> {
    let corners = [
        (0.0, 0.0),
        (width as f64, 0.0),
        (0.0, height as f64),
        (width as f64, height as f64),
    ];
    let m = &h.h;
    let mut min = (f64::INFINITY, f64::INFINITY);
    let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (x, y) in corners {
        let w = m[(2, 0)] * x + m[(2, 1)] * y + m[(2, 2)];
        if w <= f64::EPSILON {
            return Some(Rect::new(0, 0, canvas.0, canvas.1));
        }
        let p = h.apply(Point2::new(x, y));
        min = (min.0.min(p.x), min.1.min(p.y));
        max = (max.0.max(p.x), max.1.max(p.y));
    }
    // One pixel of bilinear spill on each side.
    let x0 = (min.0.floor() - 1.0).max(0.0);
    let y0 = (min.1.floor() - 1.0).max(0.0);
    let x1 = (max.0.ceil() + 2.0).min(canvas.0 as f64);
    let y1 = (max.1.ceil() + 2.0).min(canvas.1 as f64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    if min.0 < 0.0 || min.1 < 0.0 || max.0 > canvas.0 as f64 || max.1 > canvas.1 as f64 {
        warn!(
            "warped extent x [{:.0}, {:.0}] y [{:.0}, {:.0}] is clipped to the {}x{} canvas",
            min.0, max.0, min.1, max.1, canvas.0, canvas.1
        );
    }
    Some(Rect::new(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

/// Grow `r` by `margin` on every side, clipped to the canvas.
pub fn expand(r: Rect, margin: u32, canvas: (u32, u32)) -> Rect {
    let x0 = r.x.saturating_sub(margin);
    let y0 = r.y.saturating_sub(margin);
    let x1 = r.right().saturating_add(margin).min(canvas.0);
    let y1 = r.bottom().saturating_add(margin).min(canvas.1);
    Rect::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
}

/// One image warped onto a canvas region.
#[derive(Clone, Debug)]
pub struct WarpedImage {
    pub roi: Rect,
    pub image: RgbImage,
    /// 255 where the warped image footprint fully covers the pixel.
    pub footprint: GrayImage,
}

/// Warp an image and its shrunk footprint. `margin` extra pixels of
/// reflected content are kept around the footprint.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, h), fields(width = img.width(), height = img.height()))
)]
pub fn warp_image(
    img: &RgbImage,
    h: &Homography,
    canvas: (u32, u32),
    margin: u32,
) -> Option<WarpedImage> {
    let bounds = warped_bounds(h, img.width(), img.height(), canvas)?;
    let roi = expand(bounds, margin, canvas);
    let image = warp_rgb(img, h, roi, Border::Reflect);
    let src_mask = footprint_source_mask(img.width(), img.height());
    let warped = warp_mask(&src_mask, h, roi);
    let footprint = GrayImage::from_fn(roi.width, roi.height, |x, y| {
        Luma([if warped.get_pixel(x, y).0[0] == 255 { 255 } else { 0 }])
    });
    Some(WarpedImage {
        roi,
        image,
        footprint,
    })
}

/// Running union of claimed canvas pixels; the first image to cover a
/// pixel keeps it.
#[derive(Clone, Debug)]
pub struct CoverageClaim {
    total: GrayImage,
}

impl CoverageClaim {
    pub fn new(canvas: (u32, u32)) -> Self {
        Self {
            total: GrayImage::new(canvas.0, canvas.1),
        }
    }

    /// Pixels of `footprint` (placed at `roi`) not yet claimed; they are
    /// claimed by this call.
    pub fn claim(&mut self, roi: Rect, footprint: &GrayImage) -> GrayImage {
        let mut mine = GrayImage::new(footprint.width(), footprint.height());
        for (x, y, px) in footprint.enumerate_pixels() {
            if px.0[0] != 255 {
                continue;
            }
            let (cx, cy) = (roi.x + x, roi.y + y);
            if cx >= self.total.width() || cy >= self.total.height() {
                continue;
            }
            let slot = self.total.get_pixel_mut(cx, cy);
            if slot.0[0] == 0 {
                slot.0[0] = 255;
                mine.put_pixel(x, y, Luma([255]));
            }
        }
        mine
    }

    pub fn total(&self) -> &GrayImage {
        &self.total
    }
}
