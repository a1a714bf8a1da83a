use approx::assert_relative_eq;
use facade_calib::{
    calibrate_camera, find_checkerboard_corners, project_point, CheckerboardSpec, CornerParams,
    Distortion, Intrinsics, RefineParams, ViewCorrespondence,
};
use image::{GrayImage, Luma};
use nalgebra::{Rotation3, Vector3};

mod common;

#[test]
fn clean_board_yields_all_refined_corners() {
    let board = CheckerboardSpec::default();
    let (img, truth) = common::render_affine(&board, 32.0, (70.0, 50.0), 0.06, (480, 360));

    let corners =
        find_checkerboard_corners(&img, &board, &CornerParams::default()).expect("board found");
    assert_eq!(corners.len(), 54);

    // Row-major from the corner nearest the image origin.
    let max_err = corners
        .iter()
        .zip(&truth)
        .map(|(a, b)| (a - b).norm())
        .fold(0.0f32, f32::max);
    assert!(max_err < 0.3, "max corner error {max_err}");
}

#[test]
fn blank_image_reports_missing_pattern() {
    let img = GrayImage::from_pixel(200, 150, Luma([128]));
    let board = CheckerboardSpec::default();
    let err = find_checkerboard_corners(&img, &board, &CornerParams::default())
        .expect_err("nothing to find");
    assert!(matches!(
        err,
        facade_calib::CornerError::PatternNotFound { cols: 9, rows: 6, .. }
    ));
}

fn synthetic_views(intr: &Intrinsics, dist: &Distortion) -> Vec<ViewCorrespondence> {
    let board = CheckerboardSpec::default();
    let object = board.object_points();
    let poses = [
        ((0.1, -0.2, 0.05), (-150.0, -100.0, 650.0)),
        ((-0.25, 0.1, -0.1), (-140.0, -90.0, 700.0)),
        ((0.3, 0.25, 0.2), (-170.0, -80.0, 800.0)),
        ((-0.1, -0.3, 0.0), (-120.0, -110.0, 750.0)),
        ((0.2, 0.0, -0.15), (-160.0, -95.0, 600.0)),
    ];
    poses
        .iter()
        .map(|&((r, p, y), (tx, ty, tz))| {
            let rot = Rotation3::from_euler_angles(r, p, y);
            let t = Vector3::new(tx, ty, tz);
            ViewCorrespondence {
                object: object.clone(),
                image: object
                    .iter()
                    .map(|o| project_point(intr, dist, &rot, &t, o))
                    .collect(),
            }
        })
        .collect()
}

#[test]
fn zero_distortion_views_recover_camera_matrix() {
    let intr = Intrinsics {
        fx: 820.0,
        fy: 810.0,
        cx: 640.0,
        cy: 360.0,
    };
    let views = synthetic_views(&intr, &Distortion::default());
    let calib =
        calibrate_camera(&views, (1280, 720), &RefineParams::default()).expect("calibration");

    assert_relative_eq!(calib.intrinsics.fx, 820.0, epsilon = 1e-3);
    assert_relative_eq!(calib.intrinsics.fy, 810.0, epsilon = 1e-3);
    assert_relative_eq!(calib.intrinsics.cx, 640.0, epsilon = 1e-3);
    assert_relative_eq!(calib.intrinsics.cy, 360.0, epsilon = 1e-3);
    for c in calib.distortion.to_array() {
        assert!(c.abs() < 1e-5, "distortion coefficient {c}");
    }
    assert!(calib.rms < 1e-4);
    assert_eq!(calib.poses.len(), views.len());
    assert_eq!(calib.camera_matrix[0][2], calib.intrinsics.cx);
}

#[test]
fn radial_distortion_is_recovered() {
    let intr = Intrinsics {
        fx: 800.0,
        fy: 800.0,
        cx: 630.0,
        cy: 370.0,
    };
    let dist = Distortion {
        k1: -0.12,
        k2: 0.05,
        ..Distortion::default()
    };
    let views = synthetic_views(&intr, &dist);
    let params = RefineParams {
        fix_k3: true,
        ..RefineParams::default()
    };
    let calib = calibrate_camera(&views, (1280, 720), &params).expect("calibration");

    assert_relative_eq!(calib.intrinsics.fx, 800.0, epsilon = 1e-2);
    assert_relative_eq!(calib.intrinsics.cx, 630.0, epsilon = 1e-2);
    assert_relative_eq!(calib.distortion.k1, -0.12, epsilon = 1e-4);
    assert_relative_eq!(calib.distortion.k2, 0.05, epsilon = 1e-3);
    assert!(calib.rms < 1e-3);
}
