//! Grouping facade photographs into grid rows by file name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use facade_core::list_image_files;
use image::RgbImage;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::LoaderError;
use crate::grid::{GridPosition, ImageGrid};

/// How a file name encodes its grid position.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NamingConvention {
    /// Stem ends in `<row>_<col>`, both one-based, e.g. `facade_2_3.jpg`.
    #[default]
    RowColumn,
    /// A single ASCII digit `offset_from_end` bytes before the end of the
    /// file name is the one-based row; columns follow name order.
    ///
    /// Rows past 9 cannot be expressed: in `img10.jpg` with offset 5 the
    /// digit read is `0`, which never matches a row.
    RowDigit { offset_from_end: usize },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub naming: NamingConvention,
    /// File name skipped when scanning, normally the stitch output.
    pub exclude: Option<String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            naming: NamingConvention::default(),
            exclude: Some("result.jpg".to_string()),
        }
    }
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

/// `(row, col)` one-based from a stem ending in `<row>_<col>`.
pub fn parse_row_column(path: &Path) -> Option<(usize, usize)> {
    let stem = path.file_stem()?.to_str()?;
    let (head, col) = stem.rsplit_once('_')?;
    if col.is_empty() || !col.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits = head
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    let row: usize = head[head.len() - digits..].parse().ok()?;
    let col: usize = col.parse().ok()?;
    (row >= 1 && col >= 1).then_some((row, col))
}

/// One-based row digit at a fixed offset from the end of the file name.
pub fn parse_row_digit(path: &Path, offset_from_end: usize) -> Option<usize> {
    let name = file_name(path).as_bytes();
    let idx = name.len().checked_sub(offset_from_end)?;
    let b = *name.get(idx)?;
    b.is_ascii_digit().then(|| (b - b'0') as usize)
}

fn log_ignored(rows: impl IntoIterator<Item = (usize, Vec<PathBuf>)>, after: usize) {
    for (row, paths) in rows {
        for path in paths {
            warn!(
                "{}: row {row} is not reached, rows stop after {after}; ignored",
                path.display()
            );
        }
    }
}

fn grid_row_column(files: Vec<PathBuf>) -> Result<ImageGrid<PathBuf>, LoaderError> {
    let mut by_row: BTreeMap<usize, BTreeMap<usize, PathBuf>> = BTreeMap::new();
    for path in files {
        let (row, col) =
            parse_row_column(&path).ok_or_else(|| LoaderError::InvalidFileName(path.clone()))?;
        let cols = by_row.entry(row).or_default();
        if let Some(other) = cols.get(&col) {
            return Err(LoaderError::DuplicatePosition {
                position: GridPosition::new(row - 1, col - 1),
                path,
                other: other.clone(),
            });
        }
        cols.insert(col, path);
    }

    let mut rows = Vec::new();
    let mut next = 1;
    while let Some(cols) = by_row.remove(&next) {
        let mut row = Vec::with_capacity(cols.len());
        for (expected, (col, path)) in (1..).zip(cols) {
            if col != expected {
                return Err(LoaderError::ColumnGap {
                    row: next,
                    missing: expected,
                });
            }
            row.push(path);
        }
        rows.push(row);
        next += 1;
    }
    log_ignored(
        by_row
            .into_iter()
            .map(|(r, cols)| (r, cols.into_values().collect())),
        next - 1,
    );
    Ok(ImageGrid::from_rows(rows))
}

fn grid_row_digit(files: Vec<PathBuf>, offset_from_end: usize) -> ImageGrid<PathBuf> {
    let mut by_row: BTreeMap<usize, Vec<PathBuf>> = BTreeMap::new();
    for path in files {
        match parse_row_digit(&path, offset_from_end) {
            Some(row) if row >= 1 => by_row.entry(row).or_default().push(path),
            _ => warn!("{}: no row digit, ignored", path.display()),
        }
    }
    let mut rows = Vec::new();
    let mut next = 1;
    while let Some(row) = by_row.remove(&next) {
        rows.push(row);
        next += 1;
    }
    log_ignored(by_row, next - 1);
    ImageGrid::from_rows(rows)
}

/// Arrange the image files of `dir` into the grid, without decoding them.
pub fn scan_grid(dir: &Path, config: &LoaderConfig) -> Result<ImageGrid<PathBuf>, LoaderError> {
    let files: Vec<PathBuf> = list_image_files(dir)
        .map_err(|source| LoaderError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .into_iter()
        .filter(|p| config.exclude.as_deref() != Some(file_name(p)))
        .collect();

    let grid = match config.naming {
        NamingConvention::RowColumn => grid_row_column(files)?,
        NamingConvention::RowDigit { offset_from_end } => grid_row_digit(files, offset_from_end),
    };
    if grid.is_empty() {
        return Err(LoaderError::NoImages(dir.to_path_buf()));
    }
    for (pos, path) in grid.iter() {
        info!("{pos}: {}", path.display());
    }
    Ok(grid)
}

/// Decode every image of a scanned grid as 8-bit RGB.
pub fn load_images(paths: &ImageGrid<PathBuf>) -> Result<ImageGrid<RgbImage>, LoaderError> {
    paths.try_map(|_, path| {
        image::open(path)
            .map(|img| img.to_rgb8())
            .map_err(|source| LoaderError::LoadImage {
                path: path.clone(),
                source,
            })
    })
}
