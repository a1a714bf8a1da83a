//! Core types and utilities shared by the facade calibration and stitching crates.
//!
//! The crate stays small: homographies, a generic RANSAC loop, a borrowed
//! grayscale view with bilinear sampling, image-directory listing and the
//! logger used by the binaries. It does not depend on a concrete image type.

mod fs;
mod homography;
mod image;
mod logger;
mod ransac;

pub use fs::{has_image_extension, list_image_files, IMAGE_EXTENSIONS};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use image::{sample_bilinear, GrayImageView};
pub use ransac::{ransac, Estimator, RansacOptions, RansacResult};

#[cfg(feature = "tracing")]
pub use logger::{init_tracing, TryInitError};

pub use logger::init_with_level;
