//! Checkerboard camera calibration and undistortion built on `facade-core`.
//!
//! ## Quickstart
//!
//! ```
//! use facade_calib::{calibrate_camera, CheckerboardSpec, RefineParams, ViewCorrespondence};
//!
//! let board = CheckerboardSpec::default();
//! assert_eq!(board.object_points().len(), 54);
//!
//! let views: Vec<ViewCorrespondence> = Vec::new();
//! let result = calibrate_camera(&views, (1280, 720), &RefineParams::default());
//! assert!(result.is_err());
//! ```
//!
//! Pipeline:
//! 1. Detect ChESS corner candidates.
//! 2. Link mutual nearest neighbours along two global grid axes.
//! 3. BFS each component into integer grid coordinates and look for a full
//!    `cols × rows` window (or its transpose).
//! 4. Refine corners with the gradient-orthogonality iteration.
//! 5. Per-view homographies, closed-form intrinsics, planar poses.
//! 6. Levenberg-Marquardt over intrinsics, distortion and poses.
//! 7. Undistort by backward remapping through the distortion model.

mod board;
mod calibrate;
mod camera;
mod corners;
mod error;
mod gridgraph;
mod init;
mod refine;
mod session;
mod subpix;
mod undistort;

pub use board::CheckerboardSpec;
pub use calibrate::{calibrate_camera, reprojection_rms, CameraCalibration};
pub use camera::{project_point, Distortion, Intrinsics, ViewPose};
pub use corners::{
    assemble_checkerboard, detect_raw_corners, find_checkerboard_corners, CornerParams,
};
pub use error::{CalibrationError, CornerError, SessionError, UndistortError};
pub use gridgraph::GridGraphParams;
pub use init::{centered_intrinsics, initial_intrinsics, pose_from_homography, zhang_intrinsics};
pub use refine::{refine_calibration, RefineOutcome, RefineParams, ViewCorrespondence};
pub use session::{
    collect_correspondences, run_calibration, undistort_directory, CalibrationConfig,
    CalibrationReport, CollectedViews, ViewOutcome, ViewRecord,
};
pub use subpix::{refine_corner, refine_corners, SubPixParams};
pub use undistort::{undistort_image, UndistortMap};
