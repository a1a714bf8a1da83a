use std::path::PathBuf;

/// Why a single image did not yield a usable corner set.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CornerError {
    #[error("checkerboard pattern {cols}x{rows} not found ({candidates} corner candidates)")]
    PatternNotFound {
        cols: u32,
        rows: u32,
        candidates: usize,
    },

    #[error("image is too small for corner detection ({width}x{height})")]
    ImageTooSmall { width: u32, height: u32 },
}

/// Errors produced while estimating intrinsics and distortion.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("no views to calibrate from")]
    NoViews,

    #[error("view {view}: {object} object points but {image} image points")]
    MismatchedCounts {
        view: usize,
        object: usize,
        image: usize,
    },

    #[error("view {view}: {count} points, need at least 4")]
    TooFewPoints { view: usize, count: usize },

    #[error("view {view}: object points are not planar (z != 0)")]
    NonPlanarTarget { view: usize },

    #[error("view {view}: homography estimation failed")]
    HomographyFailed { view: usize },

    #[error("degenerate intrinsics: {0}")]
    DegenerateIntrinsics(&'static str),

    #[error("invalid image size {width}x{height}")]
    InvalidImageSize { width: u32, height: u32 },

    #[error("calibration produced non-finite parameters")]
    NonFinite,
}

/// Errors produced by [`crate::undistort_image`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum UndistortError {
    #[error("camera matrix is not invertible")]
    SingularCameraMatrix,

    #[error("empty image")]
    EmptyImage,
}

/// Errors of the directory-level calibration session.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load image {path}: {source}")]
    LoadImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to save image {path}: {source}")]
    SaveImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to serialize calibration: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Undistort(#[from] UndistortError),
}
