//! Corner keypoints with SIFT-layout gradient descriptors.
//!
//! Keypoints are maxima of the Harris response on a Gaussian-smoothed
//! luminance plane. Each keypoint gets one dominant orientation from a
//! 36-bin gradient histogram, and a 4×4×8 histogram of gradients sampled in
//! the rotated patch around it.

use std::f32::consts::{PI, TAU};

use image::RgbImage;
use log::debug;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::plane::Plane;

/// Descriptor length: 4×4 spatial cells × 8 orientation bins.
pub const DESCRIPTOR_WIDTH: usize = 128;

const DESC_CELLS: usize = 4;
const DESC_BINS: usize = 8;
const DESC_CELL_SCALE: f32 = 3.0;
const DESC_MAG_CLAMP: f32 = 0.2;
const ORI_BINS: usize = 36;
const ORI_SIGMA_FACTOR: f32 = 1.5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureParams {
    /// Keep at most this many of the strongest keypoints.
    pub max_features: usize,
    /// Minimum response relative to the strongest response in the image.
    pub contrast_threshold: f32,
    /// Reject points whose principal-curvature ratio exceeds this.
    pub edge_threshold: f32,
    /// Gaussian pre-smoothing of the luminance plane.
    pub sigma: f32,
    /// Non-maximum suppression radius in pixels.
    pub nms_radius: usize,
    /// Harris `k` in `det - k·trace²`.
    pub harris_k: f32,
    /// Gaussian integration scale of the structure tensor.
    pub window_sigma: f32,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            max_features: 1000,
            contrast_threshold: 0.01,
            edge_threshold: 10.0,
            sigma: 1.6,
            nms_radius: 3,
            harris_k: 0.04,
            window_sigma: 2.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Diameter of the described neighbourhood.
    pub size: f32,
    /// Dominant gradient direction in degrees, `[0, 360)`, image axes.
    pub angle: f32,
    pub response: f32,
}

/// Row-major `len × DESCRIPTOR_WIDTH` descriptor matrix.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Descriptors {
    data: Vec<f32>,
}

impl Descriptors {
    pub fn from_rows<I, R>(rows: I) -> Option<Self>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[f32]>,
    {
        let mut data = Vec::new();
        for row in rows {
            let row = row.as_ref();
            if row.len() != DESCRIPTOR_WIDTH {
                return None;
            }
            data.extend_from_slice(row);
        }
        Some(Self { data })
    }

    pub fn len(&self) -> usize {
        self.data.len() / DESCRIPTOR_WIDTH
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * DESCRIPTOR_WIDTH..(i + 1) * DESCRIPTOR_WIDTH]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> + '_ {
        self.data.chunks_exact(DESCRIPTOR_WIDTH)
    }

    fn push(&mut self, row: &[f32; DESCRIPTOR_WIDTH]) {
        self.data.extend_from_slice(row);
    }
}

/// Keypoints paired one to one with descriptor rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Descriptors,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

fn harris_response(smooth: &Plane, params: &FeatureParams) -> (Plane, Plane, Plane) {
    let (gx, gy) = smooth.gradients();
    let n = gx.data.len();
    let mut xx = Plane::zeros(gx.width, gx.height);
    let mut yy = Plane::zeros(gx.width, gx.height);
    let mut xy = Plane::zeros(gx.width, gx.height);
    for i in 0..n {
        xx.data[i] = gx.data[i] * gx.data[i];
        yy.data[i] = gy.data[i] * gy.data[i];
        xy.data[i] = gx.data[i] * gy.data[i];
    }
    let xx = xx.gaussian_blur(params.window_sigma);
    let yy = yy.gaussian_blur(params.window_sigma);
    let xy = xy.gaussian_blur(params.window_sigma);

    let edge = params.edge_threshold;
    let edge_limit = (edge + 1.0) * (edge + 1.0) / edge;
    let mut response = Plane::zeros(gx.width, gx.height);
    for i in 0..n {
        let det = xx.data[i] * yy.data[i] - xy.data[i] * xy.data[i];
        let tr = xx.data[i] + yy.data[i];
        if det <= 0.0 || tr * tr / det >= edge_limit {
            continue;
        }
        response.data[i] = det - params.harris_k * tr * tr;
    }
    (response, gx, gy)
}

/// Strict local maxima; ties go to the earlier pixel in raster order.
fn local_maxima(
    response: &Plane,
    radius: usize,
    margin: usize,
    threshold: f32,
) -> Vec<(usize, usize)> {
    let (w, h) = (response.width, response.height);
    let mut out = Vec::new();
    if w <= 2 * margin || h <= 2 * margin {
        return out;
    }
    for y in margin..h - margin {
        'pixel: for x in margin..w - margin {
            let v = response.get(x, y);
            if v <= threshold {
                continue;
            }
            let (y0, y1) = (y.saturating_sub(radius), (y + radius).min(h - 1));
            let (x0, x1) = (x.saturating_sub(radius), (x + radius).min(w - 1));
            for ny in y0..=y1 {
                for nx in x0..=x1 {
                    if (nx, ny) == (x, y) {
                        continue;
                    }
                    let o = response.get(nx, ny);
                    let earlier = (ny, nx) < (y, x);
                    if o > v || (o == v && earlier) {
                        continue 'pixel;
                    }
                }
            }
            out.push((x, y));
        }
    }
    out
}

fn dominant_orientation(gx: &Plane, gy: &Plane, x: usize, y: usize, scale: f32) -> f32 {
    let sigma = ORI_SIGMA_FACTOR * scale;
    let radius = (3.0 * sigma).round() as isize;
    let denom = 2.0 * sigma * sigma;
    let mut hist = [0.0f32; ORI_BINS];
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let (px, py) = (x as isize + dx, y as isize + dy);
            if px <= 0 || py <= 0 || px >= gx.width as isize - 1 || py >= gx.height as isize - 1 {
                continue;
            }
            let (u, v) = (gx.get(px as usize, py as usize), gy.get(px as usize, py as usize));
            let w = (-((dx * dx + dy * dy) as f32) / denom).exp();
            let angle = v.atan2(u).rem_euclid(TAU);
            let bin = ((angle * ORI_BINS as f32 / TAU).round() as usize) % ORI_BINS;
            hist[bin] += w * (u * u + v * v).sqrt();
        }
    }

    // Circular [1 4 6 4 1] smoothing.
    let smooth: Vec<f32> = (0..ORI_BINS)
        .map(|i| {
            let at = |k: isize| hist[(i as isize + k).rem_euclid(ORI_BINS as isize) as usize];
            (at(-2) + at(2) + 4.0 * (at(-1) + at(1)) + 6.0 * at(0)) / 16.0
        })
        .collect();
    let (best, _) = smooth
        .iter()
        .enumerate()
        .fold((0usize, f32::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });

    let left = smooth[(best + ORI_BINS - 1) % ORI_BINS];
    let right = smooth[(best + 1) % ORI_BINS];
    let denom = left - 2.0 * smooth[best] + right;
    let offset = if denom.abs() > f32::EPSILON {
        0.5 * (left - right) / denom
    } else {
        0.0
    };
    ((best as f32 + offset) * TAU / ORI_BINS as f32).rem_euclid(TAU)
}

fn describe(
    gx: &Plane,
    gy: &Plane,
    x: usize,
    y: usize,
    angle: f32,
    scale: f32,
) -> [f32; DESCRIPTOR_WIDTH] {
    let d = DESC_CELLS as f32;
    let cell = DESC_CELL_SCALE * scale;
    let radius = (cell * std::f32::consts::SQRT_2 * (d + 1.0) * 0.5).round() as isize;
    let (sin_t, cos_t) = angle.sin_cos();
    let (sin_t, cos_t) = (sin_t / cell, cos_t / cell);
    let exp_scale = -1.0 / (d * d * 0.5);
    let bins_per_rad = DESC_BINS as f32 / TAU;

    // Padded so trilinear spill at the edges needs no bounds checks.
    const SIDE: usize = DESC_CELLS + 2;
    let mut hist = [0.0f32; SIDE * SIDE * (DESC_BINS + 2)];
    let idx = |r: usize, c: usize, o: usize| (r * SIDE + c) * (DESC_BINS + 2) + o;

    for i in -radius..=radius {
        for j in -radius..=radius {
            let c_rot = j as f32 * cos_t + i as f32 * sin_t;
            let r_rot = -j as f32 * sin_t + i as f32 * cos_t;
            let rbin = r_rot + d / 2.0 - 0.5;
            let cbin = c_rot + d / 2.0 - 0.5;
            if rbin <= -1.0 || rbin >= d || cbin <= -1.0 || cbin >= d {
                continue;
            }
            let (px, py) = (x as isize + j, y as isize + i);
            if px <= 0 || py <= 0 || px >= gx.width as isize - 1 || py >= gx.height as isize - 1 {
                continue;
            }
            let (u, v) = (gx.get(px as usize, py as usize), gy.get(px as usize, py as usize));
            let mag = (u * u + v * v).sqrt() * ((c_rot * c_rot + r_rot * r_rot) * exp_scale).exp();
            let obin = (v.atan2(u) - angle).rem_euclid(TAU) * bins_per_rad;

            let (r0, c0, o0) = (rbin.floor(), cbin.floor(), obin.floor());
            let (fr, fc, fo) = (rbin - r0, cbin - c0, obin - o0);
            let (r0, c0) = ((r0 as isize + 1) as usize, (c0 as isize + 1) as usize);
            let o0 = (o0 as usize) % DESC_BINS;

            for (dr, wr) in [(0, 1.0 - fr), (1, fr)] {
                for (dc, wc) in [(0, 1.0 - fc), (1, fc)] {
                    for (dob, wo) in [(0, 1.0 - fo), (1, fo)] {
                        hist[idx(r0 + dr, c0 + dc, o0 + dob)] += mag * wr * wc * wo;
                    }
                }
            }
        }
    }

    let mut desc = [0.0f32; DESCRIPTOR_WIDTH];
    for r in 0..DESC_CELLS {
        for c in 0..DESC_CELLS {
            let base = idx(r + 1, c + 1, 0);
            // Fold the wrap-around bins back.
            let mut bins = [0.0f32; DESC_BINS];
            bins.copy_from_slice(&hist[base..base + DESC_BINS]);
            bins[0] += hist[base + DESC_BINS];
            bins[1] += hist[base + DESC_BINS + 1];
            let out = (r * DESC_CELLS + c) * DESC_BINS;
            desc[out..out + DESC_BINS].copy_from_slice(&bins);
        }
    }
    normalize_descriptor(&mut desc);
    desc
}

fn normalize_descriptor(desc: &mut [f32; DESCRIPTOR_WIDTH]) {
    let norm = desc.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return;
    }
    let clamp = DESC_MAG_CLAMP * norm;
    desc.iter_mut().for_each(|v| *v = v.min(clamp));
    let norm = desc.iter().map(|v| v * v).sum::<f32>().sqrt().max(f32::EPSILON);
    desc.iter_mut().for_each(|v| *v /= norm);
}

/// Detect keypoints and compute their descriptors.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(img, params), fields(width = img.width(), height = img.height()))
)]
pub fn detect_and_describe(img: &RgbImage, params: &FeatureParams) -> Features {
    let luma = Plane::luminance(img);
    if luma.data.is_empty() {
        return Features::default();
    }
    let smooth = luma.gaussian_blur(params.sigma);
    let (response, gx, gy) = harris_response(&smooth, params);

    let max_response = response.data.iter().copied().fold(0.0f32, f32::max);
    if max_response <= 0.0 {
        return Features::default();
    }
    let margin = params.nms_radius.max(1);
    let threshold = params.contrast_threshold * max_response;
    let mut peaks = local_maxima(&response, params.nms_radius, margin, threshold);
    peaks.sort_by(|a, b| {
        response
            .get(b.0, b.1)
            .total_cmp(&response.get(a.0, a.1))
            .then_with(|| (a.1, a.0).cmp(&(b.1, b.0)))
    });
    peaks.truncate(params.max_features);
    debug!("{} keypoints above {:.3e}", peaks.len(), threshold);

    let scale = params.sigma;
    let size = 2.0 * DESC_CELL_SCALE * scale * DESC_CELLS as f32 * 0.5;
    let mut features = Features::default();
    for (x, y) in peaks {
        let angle = dominant_orientation(&gx, &gy, x, y, scale);
        let desc = describe(&gx, &gy, x, y, angle, scale);
        features.keypoints.push(Keypoint {
            x: x as f32,
            y: y as f32,
            size,
            angle: angle * 180.0 / PI,
            response: response.get(x, y),
        });
        features.descriptors.push(&desc);
    }
    features
}
