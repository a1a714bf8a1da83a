/// Borrowed row-major 8-bit grayscale buffer.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

impl<'a> GrayImageView<'a> {
    /// Wrap a raw buffer; returns `None` when the length does not match.
    pub fn new(width: usize, height: usize, data: &'a [u8]) -> Option<Self> {
        (width.checked_mul(height)? == data.len()).then_some(Self {
            width,
            height,
            data,
        })
    }

    /// Pixel fetch with replicated borders.
    #[inline]
    pub fn get_clamped(&self, x: i32, y: i32) -> u8 {
        let xi = x.clamp(0, self.width as i32 - 1) as usize;
        let yi = y.clamp(0, self.height as i32 - 1) as usize;
        self.data[yi * self.width + xi]
    }
}

/// Bilinear sample at `(x, y)` with replicated borders (as `getRectSubPix`).
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    if src.width == 0 || src.height == 0 {
        return 0.0;
    }
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = src.get_clamped(x0, y0) as f32;
    let p10 = src.get_clamped(x0 + 1, y0) as f32;
    let p01 = src.get_clamped(x0, y0 + 1) as f32;
    let p11 = src.get_clamped(x0 + 1, y0 + 1) as f32;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        let data = [0u8; 5];
        assert!(GrayImageView::new(2, 3, &data).is_none());
        assert!(GrayImageView::new(1, 5, &data).is_some());
    }

    #[test]
    fn bilinear_interpolates_and_replicates_border() {
        let data = [0u8, 100, 200, 255];
        let view = GrayImageView::new(2, 2, &data).unwrap();
        assert_eq!(sample_bilinear(&view, 0.5, 0.0), 50.0);
        assert_eq!(sample_bilinear(&view, 0.0, 0.5), 100.0);
        // Outside the image the nearest edge pixel is used.
        assert_eq!(sample_bilinear(&view, 5.0, 5.0), 255.0);
        assert_eq!(sample_bilinear(&view, -3.0, 0.0), 0.0);
    }
}
