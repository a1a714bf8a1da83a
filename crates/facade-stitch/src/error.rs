use std::path::PathBuf;

use crate::grid::GridPosition;

/// Errors produced while grouping files into the image grid.
#[derive(thiserror::Error, Debug)]
pub enum LoaderError {
    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file name {0} does not end in <row>_<col>")]
    InvalidFileName(PathBuf),

    #[error("{path} and {other} both map to {position}")]
    DuplicatePosition {
        position: GridPosition,
        path: PathBuf,
        other: PathBuf,
    },

    #[error("row {row} has no image for column {missing}")]
    ColumnGap { row: usize, missing: usize },

    #[error("failed to load image {path}: {source}")]
    LoadImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no grid images found in {0}")]
    NoImages(PathBuf),
}

/// Why a pairwise homography could not be estimated.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum HomographyError {
    #[error("{position}: {matches} matches, need at least {required}")]
    TooFewMatches {
        position: GridPosition,
        matches: usize,
        required: usize,
    },

    #[error("{position}: RANSAC found no consensus among {matches} matches")]
    RansacFailed {
        position: GridPosition,
        matches: usize,
    },
}

impl HomographyError {
    pub fn position(&self) -> GridPosition {
        match self {
            HomographyError::TooFewMatches { position, .. }
            | HomographyError::RansacFailed { position, .. } => *position,
        }
    }
}

/// Errors of the multi-band blender.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BlendError {
    #[error("blend canvas must be non-empty, got {width}x{height}")]
    EmptyCanvas { width: u32, height: u32 },

    #[error("image is {image_width}x{image_height} but its mask is {mask_width}x{mask_height}")]
    MaskSizeMismatch {
        image_width: u32,
        image_height: u32,
        mask_width: u32,
        mask_height: u32,
    },

    #[error("region at ({x}, {y}) of size {width}x{height} lies outside the blend canvas")]
    OutsideCanvas {
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    },
}

/// Top-level stitching error.
#[derive(thiserror::Error, Debug)]
pub enum StitchError {
    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Homography(#[from] HomographyError),

    #[error(transparent)]
    Blend(#[from] BlendError),

    #[error("anchor image (1, 1) is missing")]
    MissingAnchor,

    #[error("stitched composite is entirely black")]
    EmptyComposite,

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to save image {path}: {source}")]
    SaveImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to serialize stitch report: {0}")]
    Json(#[from] serde_json::Error),
}
