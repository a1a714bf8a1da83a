use facade_calib::{
    run_calibration, CalibrationConfig, CalibrationReport, CheckerboardSpec, Intrinsics,
    ViewOutcome,
};
use image::{GrayImage, Luma, RgbImage};
use nalgebra::{Rotation3, Vector3};

mod common;

const SIZE: (u32, u32) = (640, 480);

fn camera() -> Intrinsics {
    Intrinsics {
        fx: 560.0,
        fy: 560.0,
        cx: 320.0,
        cy: 240.0,
    }
}

fn write_views(dir: &std::path::Path) {
    let board = CheckerboardSpec::default();
    let poses = [
        ((0.25, -0.15, 0.03), (-150.0, -95.0, 520.0)),
        ((-0.2, 0.25, -0.05), (-140.0, -90.0, 560.0)),
        ((0.1, 0.3, 0.08), (-160.0, -85.0, 600.0)),
        ((-0.3, -0.1, 0.0), (-145.0, -100.0, 540.0)),
    ];
    for (i, &((r, p, y), (tx, ty, tz))) in poses.iter().enumerate() {
        let img = common::render_perspective(
            &board,
            &camera(),
            &Rotation3::from_euler_angles(r, p, y),
            &Vector3::new(tx, ty, tz),
            SIZE,
        )
        .expect("invertible homography");
        img.save(dir.join(format!("view_{i:02}.png"))).expect("save view");
    }
}

#[test]
fn directory_session_writes_calibration_and_undistorted_images() {
    let root = tempfile::tempdir().expect("tempdir");
    let calib_dir = root.path().join("calibration");
    let distorted_dir = root.path().join("distorted");
    let out_dir = root.path().join("out");
    std::fs::create_dir_all(&calib_dir).expect("mkdir");
    std::fs::create_dir_all(&distorted_dir).expect("mkdir");

    write_views(&calib_dir);
    // Blank frame of the right size and a frame of the wrong size.
    GrayImage::from_pixel(SIZE.0, SIZE.1, Luma([128]))
        .save(calib_dir.join("view_10_blank.png"))
        .expect("save");
    GrayImage::from_pixel(320, 240, Luma([128]))
        .save(calib_dir.join("view_11_small.png"))
        .expect("save");
    std::fs::write(calib_dir.join("view_12_broken.png"), b"not a png").expect("write");
    std::fs::write(calib_dir.join("notes.txt"), b"ignored").expect("write");

    RgbImage::from_pixel(SIZE.0, SIZE.1, image::Rgb([90, 120, 150]))
        .save(distorted_dir.join("a.png"))
        .expect("save");
    RgbImage::from_pixel(SIZE.0, SIZE.1, image::Rgb([10, 20, 30]))
        .save(distorted_dir.join("b.png"))
        .expect("save");

    let config = CalibrationConfig::default();
    let report =
        run_calibration(&calib_dir, &distorted_dir, &out_dir, &config).expect("session");

    assert_eq!(report.views.len(), 7);
    let accepted = report.views.iter().filter(|v| v.outcome.is_accepted()).count();
    assert_eq!(accepted, 4);
    assert!(matches!(
        report.views[4].outcome,
        ViewOutcome::PatternNotFound { .. }
    ));
    assert_eq!(
        report.views[5].outcome,
        ViewOutcome::SizeMismatch {
            expected: [640, 480],
            found: [320, 240]
        }
    );
    assert!(matches!(report.views[6].outcome, ViewOutcome::Unreadable { .. }));

    let k = &report.calibration.intrinsics;
    assert!((k.fx - 560.0).abs() < 15.0, "fx {}", k.fx);
    assert!((k.fy - 560.0).abs() < 15.0, "fy {}", k.fy);
    assert!((k.cx - 320.0).abs() < 15.0, "cx {}", k.cx);
    assert!((k.cy - 240.0).abs() < 15.0, "cy {}", k.cy);
    assert!(report.calibration.rms < 0.5);
    assert_eq!(report.calibration.image_size, [640, 480]);

    assert_eq!(report.undistorted.len(), 2);
    assert!(out_dir.join("image_0.jpg").is_file());
    assert!(out_dir.join("image_1.jpg").is_file());

    let json = std::fs::read_to_string(out_dir.join("calibration.json")).expect("json");
    let parsed: CalibrationReport = serde_json::from_str(&json).expect("parse report");
    assert_eq!(parsed.calibration.image_size, [640, 480]);
    assert_eq!(parsed.views.len(), 7);
}

#[test]
fn empty_directory_fails_without_views() {
    let root = tempfile::tempdir().expect("tempdir");
    let err = run_calibration(
        root.path(),
        root.path(),
        &root.path().join("out"),
        &CalibrationConfig::default(),
    )
    .expect_err("no views");
    assert!(matches!(
        err,
        facade_calib::SessionError::Calibration(facade_calib::CalibrationError::NoViews)
    ));
}
