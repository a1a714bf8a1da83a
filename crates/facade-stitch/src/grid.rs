use std::fmt;

use serde::{Deserialize, Serialize};

/// Zero-based position of an image in the facade grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridPosition {
    pub row: usize,
    pub col: usize,
}

impl GridPosition {
    pub const ANCHOR: GridPosition = GridPosition { row: 0, col: 0 };

    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    pub fn is_anchor(&self) -> bool {
        *self == Self::ANCHOR
    }
}

impl fmt::Display for GridPosition {
    /// One-based, the way file names count.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}, column {}", self.row + 1, self.col + 1)
    }
}

/// The image each position is registered against.
///
/// The anchor has none, the first image of a row hangs off the first image
/// of the row above, every other image off its left neighbour.
pub fn neighbor_of(pos: GridPosition) -> Option<GridPosition> {
    match (pos.row, pos.col) {
        (0, 0) => None,
        (r, 0) => Some(GridPosition::new(r - 1, 0)),
        (r, c) => Some(GridPosition::new(r, c - 1)),
    }
}

/// Rows of payloads in row-major order. Rows may differ in length.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageGrid<T> {
    rows: Vec<Vec<T>>,
}

impl<T> Default for ImageGrid<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T> ImageGrid<T> {
    pub fn from_rows(rows: Vec<Vec<T>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<T>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Total number of images.
    pub fn len(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, pos: GridPosition) -> Option<&T> {
        self.rows.get(pos.row)?.get(pos.col)
    }

    pub fn get_mut(&mut self, pos: GridPosition) -> Option<&mut T> {
        self.rows.get_mut(pos.row)?.get_mut(pos.col)
    }

    pub fn contains(&self, pos: GridPosition) -> bool {
        self.get(pos).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GridPosition, &T)> + '_ {
        self.rows.iter().enumerate().flat_map(|(r, row)| {
            row.iter()
                .enumerate()
                .map(move |(c, item)| (GridPosition::new(r, c), item))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (GridPosition, &mut T)> + '_ {
        self.rows.iter_mut().enumerate().flat_map(|(r, row)| {
            row.iter_mut()
                .enumerate()
                .map(move |(c, item)| (GridPosition::new(r, c), item))
        })
    }

    pub fn positions(&self) -> impl Iterator<Item = GridPosition> + '_ {
        self.iter().map(|(pos, _)| pos)
    }

    pub fn map<U>(&self, mut f: impl FnMut(GridPosition, &T) -> U) -> ImageGrid<U> {
        ImageGrid {
            rows: self
                .rows
                .iter()
                .enumerate()
                .map(|(r, row)| {
                    row.iter()
                        .enumerate()
                        .map(|(c, item)| f(GridPosition::new(r, c), item))
                        .collect()
                })
                .collect(),
        }
    }

    pub fn try_map<U, E>(
        &self,
        mut f: impl FnMut(GridPosition, &T) -> Result<U, E>,
    ) -> Result<ImageGrid<U>, E> {
        let mut rows = Vec::with_capacity(self.rows.len());
        for (r, row) in self.rows.iter().enumerate() {
            let mut out = Vec::with_capacity(row.len());
            for (c, item) in row.iter().enumerate() {
                out.push(f(GridPosition::new(r, c), item)?);
            }
            rows.push(out);
        }
        Ok(ImageGrid { rows })
    }
}
