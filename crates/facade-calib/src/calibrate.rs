use facade_core::estimate_homography;
use log::{debug, info};
use nalgebra::{Matrix3, Point2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::camera::{project_point, Distortion, Intrinsics, ViewPose};
use crate::error::CalibrationError;
use crate::init::{initial_intrinsics, pose_from_homography};
use crate::refine::{refine_calibration, RefineParams, ViewCorrespondence};

/// Result of a successful calibration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    /// Row-major camera matrix.
    pub camera_matrix: [[f64; 3]; 3],
    pub intrinsics: Intrinsics,
    pub distortion: Distortion,
    /// Board-to-camera pose per calibrated view.
    pub poses: Vec<ViewPose>,
    /// Root mean square reprojection error over all points, in pixels.
    pub rms: f64,
    pub image_size: [u32; 2],
    pub iterations: usize,
}

impl CameraCalibration {
    pub fn camera_matrix(&self) -> Matrix3<f64> {
        self.intrinsics.matrix()
    }
}

fn validate(views: &[ViewCorrespondence]) -> Result<(), CalibrationError> {
    if views.is_empty() {
        return Err(CalibrationError::NoViews);
    }
    for (view, v) in views.iter().enumerate() {
        if v.object.len() != v.image.len() {
            return Err(CalibrationError::MismatchedCounts {
                view,
                object: v.object.len(),
                image: v.image.len(),
            });
        }
        if v.object.len() < 4 {
            return Err(CalibrationError::TooFewPoints {
                view,
                count: v.object.len(),
            });
        }
        if v.object.iter().any(|p| p.z.abs() > 1e-9) {
            return Err(CalibrationError::NonPlanarTarget { view });
        }
    }
    Ok(())
}

/// Estimate intrinsics, five-coefficient distortion and per-view poses.
///
/// Pipeline: per-view DLT homography, closed-form intrinsics, planar pose
/// per view, then joint Levenberg-Marquardt on reprojection error.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(views, params), fields(views = views.len()))
)]
pub fn calibrate_camera(
    views: &[ViewCorrespondence],
    image_size: (u32, u32),
    params: &RefineParams,
) -> Result<CameraCalibration, CalibrationError> {
    validate(views)?;
    if image_size.0 == 0 || image_size.1 == 0 {
        return Err(CalibrationError::InvalidImageSize {
            width: image_size.0,
            height: image_size.1,
        });
    }

    let homographies = views
        .iter()
        .enumerate()
        .map(|(view, v)| {
            let src: Vec<Point2<f64>> = v.object.iter().map(|p| Point2::new(p.x, p.y)).collect();
            estimate_homography(&src, &v.image)
                .map(|h| h.h)
                .ok_or(CalibrationError::HomographyFailed { view })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let init = initial_intrinsics(&homographies, image_size)?;
    let poses = homographies
        .iter()
        .enumerate()
        .map(|(view, h)| {
            pose_from_homography(&init, h).ok_or(CalibrationError::HomographyFailed { view })
        })
        .collect::<Result<Vec<_>, _>>()?;
    debug!(
        "initial fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
        init.fx, init.fy, init.cx, init.cy
    );

    let out = refine_calibration(views, init, Distortion::default(), &poses, params);
    if !out.intrinsics.is_valid()
        || !out.distortion.to_array().iter().all(|c| c.is_finite())
        || !out.cost.is_finite()
    {
        return Err(CalibrationError::NonFinite);
    }

    let rms = reprojection_rms(views, &out.intrinsics, &out.distortion, &out.poses);
    info!(
        "calibrated {} views: fx={:.3} fy={:.3} cx={:.3} cy={:.3} rms={:.4}px",
        views.len(),
        out.intrinsics.fx,
        out.intrinsics.fy,
        out.intrinsics.cx,
        out.intrinsics.cy,
        rms
    );

    Ok(CameraCalibration {
        camera_matrix: out.intrinsics.to_array(),
        intrinsics: out.intrinsics,
        distortion: out.distortion,
        poses: out.poses,
        rms,
        image_size: [image_size.0, image_size.1],
        iterations: out.iterations,
    })
}

/// `sqrt(Σ |reprojection error|² / N)` over all points of all views.
pub fn reprojection_rms(
    views: &[ViewCorrespondence],
    intr: &Intrinsics,
    dist: &Distortion,
    poses: &[ViewPose],
) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (view, pose) in views.iter().zip(poses) {
        let (rotation, translation) = (pose.rotation(), pose.translation());
        for (obj, img) in view.object.iter().zip(&view.image) {
            let p = project_point(intr, dist, &rotation, &translation, obj);
            sum += (p - img).norm_squared();
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        (sum / count as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn rejects_malformed_input() {
        let params = RefineParams::default();
        assert_eq!(
            calibrate_camera(&[], (640, 480), &params),
            Err(CalibrationError::NoViews)
        );

        let short = ViewCorrespondence {
            object: vec![Point3::origin(); 3],
            image: vec![Point2::origin(); 3],
        };
        assert_eq!(
            calibrate_camera(&[short], (640, 480), &params),
            Err(CalibrationError::TooFewPoints { view: 0, count: 3 })
        );

        let mismatched = ViewCorrespondence {
            object: vec![Point3::origin(); 5],
            image: vec![Point2::origin(); 4],
        };
        assert!(matches!(
            calibrate_camera(&[mismatched], (640, 480), &params),
            Err(CalibrationError::MismatchedCounts { view: 0, .. })
        ));

        let lifted = ViewCorrespondence {
            object: vec![Point3::new(0.0, 0.0, 1.0); 4],
            image: vec![Point2::origin(); 4],
        };
        assert_eq!(
            calibrate_camera(&[lifted], (640, 480), &params),
            Err(CalibrationError::NonPlanarTarget { view: 0 })
        );
    }
}
