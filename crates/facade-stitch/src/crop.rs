use image::{imageops, RgbImage};

use crate::error::StitchError;
use crate::warp::Rect;

/// Bounding box of all pixels that are not pure black.
pub fn content_bounds(img: &RgbImage) -> Option<Rect> {
    let mut min = (u32::MAX, u32::MAX);
    let mut max = (0u32, 0u32);
    let mut found = false;
    for (x, y, px) in img.enumerate_pixels() {
        if px.0 == [0, 0, 0] {
            continue;
        }
        found = true;
        min = (min.0.min(x), min.1.min(y));
        max = (max.0.max(x), max.1.max(y));
    }
    found.then(|| Rect::new(min.0, min.1, max.0 - min.0 + 1, max.1 - min.1 + 1))
}

/// Crop to [`content_bounds`]; an all-black image is an error.
pub fn crop_to_content(img: &RgbImage) -> Result<(RgbImage, Rect), StitchError> {
    let rect = content_bounds(img).ok_or(StitchError::EmptyComposite)?;
    let cropped = imageops::crop_imm(img, rect.x, rect.y, rect.width, rect.height).to_image();
    Ok((cropped, rect))
}
