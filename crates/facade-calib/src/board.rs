use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Planar checkerboard described by its *inner* corner lattice.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerboardSpec {
    /// Inner corners along a board row.
    pub cols: u32,
    /// Inner corners along a board column.
    pub rows: u32,
    /// Square edge length in world units.
    pub square_size: f64,
}

impl Default for CheckerboardSpec {
    fn default() -> Self {
        Self {
            cols: 9,
            rows: 6,
            square_size: 36.8,
        }
    }
}

impl CheckerboardSpec {
    pub fn corner_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    /// Board-frame corner coordinates on `z = 0`, row-major (`cols` per row).
    ///
    /// Index `r * cols + c` holds `(c * s, r * s, 0)`, matching the order
    /// produced by corner detection.
    pub fn object_points(&self) -> Vec<Point3<f64>> {
        let s = self.square_size;
        (0..self.rows)
            .flat_map(|r| (0..self.cols).map(move |c| Point3::new(c as f64 * s, r as f64 * s, 0.0)))
            .collect()
    }
}
