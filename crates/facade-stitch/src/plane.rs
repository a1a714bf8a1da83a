//! Single-channel `f32` image planes and the separable filters the
//! detector and the blender run on them.

use image::RgbImage;

#[derive(Clone, Debug, PartialEq)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl Plane {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Rec. 601 luma of an RGB image, in `0..=255`.
    pub fn luminance(img: &RgbImage) -> Self {
        let (w, h) = img.dimensions();
        Self::from_fn(w as usize, h as usize, |x, y| {
            let [r, g, b] = img.get_pixel(x as u32, y as u32).0;
            0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
        })
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        self.data[y * self.width + x] = v;
    }

    /// Sample with replicated borders.
    #[inline]
    pub fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let xi = x.clamp(0, self.width as isize - 1) as usize;
        let yi = y.clamp(0, self.height as isize - 1) as usize;
        self.get(xi, yi)
    }

    /// Separable Gaussian blur, replicated borders, kernel radius `ceil(3σ)`.
    pub fn gaussian_blur(&self, sigma: f32) -> Plane {
        if sigma <= 0.0 || self.data.is_empty() {
            return self.clone();
        }
        let kernel = gaussian_kernel(sigma);
        let r = (kernel.len() / 2) as isize;

        let mut tmp = Plane::zeros(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let acc: f32 = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, w)| w * self.get_clamped(x as isize + k as isize - r, y as isize))
                    .sum();
                tmp.set(x, y, acc);
            }
        }
        let mut out = Plane::zeros(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let acc: f32 = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, w)| w * tmp.get_clamped(x as isize, y as isize + k as isize - r))
                    .sum();
                out.set(x, y, acc);
            }
        }
        out
    }

    /// Central-difference gradients `(∂x, ∂y)`, replicated borders.
    pub fn gradients(&self) -> (Plane, Plane) {
        let gx = Plane::from_fn(self.width, self.height, |x, y| {
            let (x, y) = (x as isize, y as isize);
            0.5 * (self.get_clamped(x + 1, y) - self.get_clamped(x - 1, y))
        });
        let gy = Plane::from_fn(self.width, self.height, |x, y| {
            let (x, y) = (x as isize, y as isize);
            0.5 * (self.get_clamped(x, y + 1) - self.get_clamped(x, y - 1))
        });
        (gx, gy)
    }
}

fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let r = (3.0 * sigma).ceil().max(1.0) as i32;
    let denom = 2.0 * sigma * sigma;
    let mut k: Vec<f32> = (-r..=r).map(|i| (-(i * i) as f32 / denom).exp()).collect();
    let sum: f32 = k.iter().sum();
    k.iter_mut().for_each(|v| *v /= sum);
    k
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn blur_preserves_constant_planes() {
        let p = Plane::from_fn(9, 7, |_, _| 42.0);
        let b = p.gaussian_blur(1.6);
        for v in b.data {
            assert_relative_eq!(v, 42.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn gradients_of_a_ramp() {
        let p = Plane::from_fn(6, 5, |x, y| 2.0 * x as f32 + 3.0 * y as f32);
        let (gx, gy) = p.gradients();
        assert_relative_eq!(gx.get(2, 2), 2.0);
        assert_relative_eq!(gy.get(2, 2), 3.0);
    }
}
