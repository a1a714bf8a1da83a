//! Entry point for the facade workspace.
//!
//! Re-exports the calibration and stitching crates and adds the JSON
//! configuration shared by the `facade` binary.
//!
//! ## Quickstart
//!
//! ```no_run
//! use facade::{AppConfig, FacadeError};
//!
//! let config = AppConfig::from_json_file("facade.json".as_ref())?;
//! let report = facade::stitch::run_stitch(&config.paths.facade_dir, None, None, &config.stitch)?;
//! println!("{}", report.output.display());
//! # Ok::<(), FacadeError>(())
//! ```
//!
//! ## API map
//! - `facade::core`: homographies, RANSAC, image listing, logging.
//! - `facade::calib`: checkerboard detection, calibration, undistortion.
//! - `facade::stitch`: grid loading, registration, exposure, blending.

mod config;

pub use facade_calib as calib;
pub use facade_core as core;
pub use facade_stitch as stitch;

pub use config::{AppConfig, FacadeError, PathsConfig};
