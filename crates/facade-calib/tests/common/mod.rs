#![allow(dead_code)]

use facade_calib::{CheckerboardSpec, Intrinsics};
use image::{GrayImage, Luma};
use nalgebra::{Matrix3, Point2, Rotation3, Vector3};

const DARK: f32 = 25.0;
const LIGHT: f32 = 230.0;

/// Render a board of `(cols + 1) × (rows + 1)` squares with 4×4 supersampling.
///
/// `to_board` maps a pixel position to board coordinates measured in
/// squares from the outer corner.
pub fn render(
    board: &CheckerboardSpec,
    size: (u32, u32),
    to_board: impl Fn(f64, f64) -> Option<(f64, f64)>,
) -> GrayImage {
    let squares_x = board.cols as f64 + 1.0;
    let squares_y = board.rows as f64 + 1.0;
    let shade = |px: f64, py: f64| -> f32 {
        match to_board(px, py) {
            Some((bx, by)) if bx >= 0.0 && by >= 0.0 && bx < squares_x && by < squares_y => {
                if (bx.floor() as i64 + by.floor() as i64) % 2 == 0 {
                    DARK
                } else {
                    LIGHT
                }
            }
            _ => LIGHT,
        }
    };
    GrayImage::from_fn(size.0, size.1, |x, y| {
        let mut acc = 0.0;
        for sy in 0..4 {
            for sx in 0..4 {
                let px = x as f64 + (sx as f64 + 0.5) / 4.0 - 0.5;
                let py = y as f64 + (sy as f64 + 0.5) / 4.0 - 0.5;
                acc += shade(px, py);
            }
        }
        Luma([(acc / 16.0).round() as u8])
    })
}

/// Board rotated by `angle` and scaled to `square` pixels, outer corner at `origin`.
/// Returns the image and the true inner corners in row-major order.
pub fn render_affine(
    board: &CheckerboardSpec,
    square: f64,
    origin: (f64, f64),
    angle: f64,
    size: (u32, u32),
) -> (GrayImage, Vec<Point2<f32>>) {
    let (s, c) = angle.sin_cos();
    let img = render(board, size, |px, py| {
        let (dx, dy) = (px - origin.0, py - origin.1);
        Some(((c * dx + s * dy) / square, (-s * dx + c * dy) / square))
    });
    let corners = inner_corners(board)
        .map(|(bx, by)| {
            let (lx, ly) = (bx * square, by * square);
            Point2::new(
                (origin.0 + c * lx - s * ly) as f32,
                (origin.1 + s * lx + c * ly) as f32,
            )
        })
        .collect();
    (img, corners)
}

/// Board seen by a pinhole camera at pose `(rotation, translation)`.
/// Board units are `board.square_size`.
pub fn render_perspective(
    board: &CheckerboardSpec,
    intr: &Intrinsics,
    rotation: &Rotation3<f64>,
    translation: &Vector3<f64>,
    size: (u32, u32),
) -> Option<GrayImage> {
    let r = rotation.matrix();
    let columns = [r.column(0).into_owned(), r.column(1).into_owned(), *translation];
    let h = intr.matrix() * Matrix3::from_columns(&columns);
    let h_inv = h.try_inverse()?;
    // Object points start at the first inner corner, one square in.
    let s = board.square_size;
    Some(render(board, size, |px, py| {
        let b = h_inv * Vector3::new(px, py, 1.0);
        if b.z.abs() < 1e-12 {
            return None;
        }
        Some((b.x / b.z / s + 1.0, b.y / b.z / s + 1.0))
    }))
}

fn inner_corners(board: &CheckerboardSpec) -> impl Iterator<Item = (f64, f64)> + '_ {
    (1..=board.rows).flat_map(move |r| (1..=board.cols).map(move |c| (c as f64, r as f64)))
}
