//! Stitching a grid of overlapping facade photographs into one composite.
//!
//! ## Quickstart
//!
//! ```no_run
//! use std::path::Path;
//! use facade_stitch::{run_stitch, StitchConfig};
//!
//! let report = run_stitch(Path::new("facade"), None, None, &StitchConfig::default())?;
//! println!("wrote {}", report.output.display());
//! # Ok::<(), facade_stitch::StitchError>(())
//! ```
//!
//! Stages, each consuming the full output of the previous one:
//! 1. Group files into rows from their names.
//! 2. Corner keypoints with 128-wide gradient descriptors.
//! 3. Ratio-tested matches against the neighbour image (the one to the left,
//!    or the one above for the first column).
//! 4. RANSAC homography into the neighbour frame.
//! 5. Chain pairwise homographies into the frame of the top-left image.
//! 6. Gain compensation.
//! 7. Warp onto the canvas, claim coverage first come first served, and
//!    multi-band blend.
//! 8. Crop to non-black content.

mod blend;
mod crop;
mod error;
mod exposure;
mod features;
mod graph;
mod grid;
mod loader;
mod matcher;
mod pairwise;
mod pipeline;
mod plane;
mod warp;

pub use blend::{pyr_down, pyr_up, BlendParams, MultiBandBlender};
pub use crop::{content_bounds, crop_to_content};
pub use error::{BlendError, HomographyError, LoaderError, StitchError};
pub use exposure::{apply_gain, compensate_exposure, compute_gains, valid_mask, ExposureParams};
pub use features::{
    detect_and_describe, Descriptors, FeatureParams, Features, Keypoint, DESCRIPTOR_WIDTH,
};
pub use graph::{chain_to_anchor, compose_references};
pub use grid::{neighbor_of, GridPosition, ImageGrid};
pub use loader::{
    load_images, parse_row_column, parse_row_digit, scan_grid, LoaderConfig, NamingConvention,
};
pub use matcher::{match_descriptors, DistanceMetric, FeatureMatch, MatchParams};
pub use pairwise::{
    estimate_pairwise, matched_points, HomographyEstimator, PairwiseHomography, PairwiseParams,
    PointPair,
};
pub use pipeline::{
    build_state, composite, detect_features, estimate_homographies, match_neighbors, run_stitch,
    CanvasParams, Composite, FailurePolicy, PositionReport, StitchConfig, StitchReport,
    StitchState,
};
pub use plane::Plane;
pub use warp::{
    expand, footprint_source_mask, warp_image, warp_mask, warp_rgb, warped_bounds, Border,
    CoverageClaim, Rect, WarpedImage,
};
