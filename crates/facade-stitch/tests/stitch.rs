use facade_stitch::{
    run_stitch, CanvasParams, GridPosition, StitchConfig, StitchError, StitchReport,
};
use image::{imageops, Rgb, RgbImage};

/// Deterministic xorshift so fixtures do not depend on an RNG crate.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 >> 32) as u32
    }

    fn range(&mut self, lo: u32, hi: u32) -> u32 {
        lo + self.next() % (hi - lo)
    }
}

/// Random overlapping rectangles on a mid-gray background.
fn scene(width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, Rgb([128, 128, 128]));
    let mut rng = Lcg(0x9e37_79b9_7f4a_7c15);
    for _ in 0..160 {
        let (w, h) = (rng.range(6, 34), rng.range(6, 34));
        let x0 = rng.range(0, width - w);
        let y0 = rng.range(0, height - h);
        let color = Rgb([
            rng.range(20, 236) as u8,
            rng.range(20, 236) as u8,
            rng.range(20, 236) as u8,
        ]);
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, color);
            }
        }
    }
    img
}

fn config() -> StitchConfig {
    StitchConfig {
        canvas: CanvasParams {
            width: 400,
            height: 200,
        },
        ..StitchConfig::default()
    }
}

#[test]
fn two_tiles_stitch_into_one_row() {
    let dir = tempfile::tempdir().expect("tempdir");
    let full = scene(320, 160);
    imageops::crop_imm(&full, 0, 0, 220, 160)
        .to_image()
        .save(dir.path().join("facade_1_1.png"))
        .expect("save left");
    imageops::crop_imm(&full, 100, 0, 220, 160)
        .to_image()
        .save(dir.path().join("facade_1_2.png"))
        .expect("save right");

    let report_path = dir.path().join("report.json");
    let report = run_stitch(dir.path(), None, Some(&report_path), &config()).expect("stitch");

    assert_eq!(report.output, dir.path().join("result.jpg"));
    assert!(report.output.is_file());
    assert_eq!(report.positions.len(), 2);

    let right = &report.positions[1];
    assert_eq!(right.position, GridPosition::new(0, 1));
    assert!(right.matches >= 8, "{} matches", right.matches);
    assert!(right.inliers.is_some_and(|n| n >= 8));
    assert_eq!(report.positions[0].chain, vec![GridPosition::new(0, 0)]);
    assert_eq!(right.chain, vec![GridPosition::new(0, 1), GridPosition::new(0, 0)]);
    let h = right
        .reference
        .and_then(|h| h.normalized())
        .expect("registered")
        .to_array();
    let expected = [[1.0, 0.0, 100.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    for (row, erow) in h.iter().zip(expected) {
        for (v, e) in row.iter().zip(erow) {
            assert!((v - e).abs() < 1e-3, "{h:?}");
        }
    }

    // Footprints are shrunk by a pixel on each side.
    assert_eq!((report.crop.x, report.crop.y), (1, 1));
    assert_eq!((report.crop.width, report.crop.height), (318, 158));

    let written = image::open(&report.output).expect("decode").to_rgb8();
    assert_eq!(written.dimensions(), (318, 158));

    let json = std::fs::read_to_string(&report_path).expect("report");
    let parsed: StitchReport = serde_json::from_str(&json).expect("parse report");
    assert_eq!(parsed.crop, report.crop);
    assert_eq!(parsed.positions[1].chain, right.chain);
}

#[test]
fn featureless_neighbour_aborts_by_default() {
    let dir = tempfile::tempdir().expect("tempdir");
    scene(200, 120)
        .save(dir.path().join("f_1_1.png"))
        .expect("save");
    RgbImage::from_pixel(200, 120, Rgb([90, 90, 90]))
        .save(dir.path().join("f_1_2.png"))
        .expect("save");

    let err = run_stitch(dir.path(), None, None, &config()).expect_err("no matches");
    match err {
        StitchError::Homography(e) => assert_eq!(e.position(), GridPosition::new(0, 1)),
        other => panic!("unexpected error {other}"),
    }
}
