//! Directory-level calibration run: detect boards in one folder, calibrate,
//! undistort another folder and write everything to an output folder.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use facade_core::list_image_files;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use log::{info, warn};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::board::CheckerboardSpec;
use crate::calibrate::{calibrate_camera, CameraCalibration};
use crate::corners::{find_checkerboard_corners, CornerParams};
use crate::error::{CalibrationError, SessionError};
use crate::refine::{RefineParams, ViewCorrespondence};
use crate::undistort::UndistortMap;

/// Everything the calibration pipeline can be tuned with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub board: CheckerboardSpec,
    pub corners: CornerParams,
    pub refine: RefineParams,
    /// JPEG quality of the undistorted images, 1..=100.
    pub jpeg_quality: u8,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            board: CheckerboardSpec::default(),
            corners: CornerParams::default(),
            refine: RefineParams::default(),
            jpeg_quality: 95,
        }
    }
}

/// What happened to one calibration image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ViewOutcome {
    Accepted { corners: Vec<[f32; 2]> },
    PatternNotFound { reason: String },
    SizeMismatch { expected: [u32; 2], found: [u32; 2] },
    Unreadable { reason: String },
}

impl ViewOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ViewOutcome::Accepted { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub path: PathBuf,
    pub outcome: ViewOutcome,
}

/// Correspondences gathered from a directory plus per-image outcomes.
#[derive(Clone, Debug, Default)]
pub struct CollectedViews {
    pub records: Vec<ViewRecord>,
    pub correspondences: Vec<ViewCorrespondence>,
    /// Size of the first accepted image.
    pub image_size: Option<(u32, u32)>,
}

/// Output of [`run_calibration`], written to `calibration.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub views: Vec<ViewRecord>,
    pub calibration: CameraCalibration,
    /// Undistorted images in the order of the distorted directory listing.
    pub undistorted: Vec<PathBuf>,
}

/// Detect the board in every image of `dir`.
///
/// The first accepted image fixes the image size; later images of another
/// size are recorded as [`ViewOutcome::SizeMismatch`].
#[cfg_attr(feature = "tracing", instrument(level = "info", skip(config)))]
pub fn collect_correspondences(
    dir: &Path,
    config: &CalibrationConfig,
) -> Result<CollectedViews, SessionError> {
    let files = list_image_files(dir).map_err(|source| SessionError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;
    info!("{} calibration images in {}", files.len(), dir.display());

    let object = config.board.object_points();
    let mut out = CollectedViews::default();

    for path in files {
        let outcome = match image::open(&path) {
            Err(err) => {
                warn!("{}: unreadable: {err}", path.display());
                ViewOutcome::Unreadable {
                    reason: err.to_string(),
                }
            }
            Ok(img) => {
                let gray = img.to_luma8();
                let size = gray.dimensions();
                match out.image_size {
                    Some(expected) if expected != size => {
                        warn!(
                            "{}: size {}x{} differs from {}x{}, skipped",
                            path.display(),
                            size.0,
                            size.1,
                            expected.0,
                            expected.1
                        );
                        ViewOutcome::SizeMismatch {
                            expected: [expected.0, expected.1],
                            found: [size.0, size.1],
                        }
                    }
                    _ => match find_checkerboard_corners(&gray, &config.board, &config.corners) {
                        Ok(corners) => {
                            info!("{}: {} corners", path.display(), corners.len());
                            out.image_size.get_or_insert(size);
                            out.correspondences.push(ViewCorrespondence {
                                object: object.clone(),
                                image: corners
                                    .iter()
                                    .map(|p| Point2::new(p.x as f64, p.y as f64))
                                    .collect(),
                            });
                            ViewOutcome::Accepted {
                                corners: corners.iter().map(|p| [p.x, p.y]).collect(),
                            }
                        }
                        Err(err) => {
                            warn!("{}: {err}", path.display());
                            ViewOutcome::PatternNotFound {
                                reason: err.to_string(),
                            }
                        }
                    },
                }
            }
        };
        out.records.push(ViewRecord { path, outcome });
    }
    Ok(out)
}

fn save_jpeg(path: &Path, img: &RgbImage, quality: u8) -> Result<(), SessionError> {
    let file = File::create(path).map_err(|source| SessionError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100))
        .encode_image(img)
        .map_err(|source| SessionError::SaveImage {
            path: path.to_path_buf(),
            source,
        })
}

/// Undistort every image in `dir` into `output_dir/image_<i>.jpg`.
///
/// `i` is the index in the sorted listing, so unreadable files leave gaps.
/// The remap table is rebuilt only when the image size changes.
pub fn undistort_directory(
    dir: &Path,
    output_dir: &Path,
    calibration: &CameraCalibration,
    jpeg_quality: u8,
) -> Result<Vec<PathBuf>, SessionError> {
    let files = list_image_files(dir).map_err(|source| SessionError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut written = Vec::with_capacity(files.len());
    let mut map: Option<UndistortMap> = None;

    for (i, path) in files.iter().enumerate() {
        let img = match image::open(path) {
            Ok(img) => img.to_rgb8(),
            Err(err) => {
                warn!("{}: unreadable, not undistorted: {err}", path.display());
                continue;
            }
        };
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            warn!("{}: empty image, not undistorted", path.display());
            continue;
        }
        let current = match map.take() {
            Some(m) if m.width() == w && m.height() == h => m,
            _ => UndistortMap::new(&calibration.intrinsics, &calibration.distortion, w, h)?,
        };
        let undistorted = current.apply(&img);
        map = Some(current);

        let target = output_dir.join(format!("image_{i}.jpg"));
        save_jpeg(&target, &undistorted, jpeg_quality)?;
        info!("{} -> {}", path.display(), target.display());
        written.push(target);
    }
    Ok(written)
}

/// Full calibration pipeline.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip(config)))]
pub fn run_calibration(
    calibration_dir: &Path,
    distorted_dir: &Path,
    output_dir: &Path,
    config: &CalibrationConfig,
) -> Result<CalibrationReport, SessionError> {
    let collected = collect_correspondences(calibration_dir, config)?;
    let accepted = collected
        .records
        .iter()
        .filter(|r| r.outcome.is_accepted())
        .count();
    info!(
        "{accepted} of {} calibration images accepted",
        collected.records.len()
    );

    let image_size = collected
        .image_size
        .ok_or(CalibrationError::NoViews)?;
    let calibration = calibrate_camera(&collected.correspondences, image_size, &config.refine)?;

    std::fs::create_dir_all(output_dir).map_err(|source| SessionError::Write {
        path: output_dir.to_path_buf(),
        source,
    })?;
    let undistorted =
        undistort_directory(distorted_dir, output_dir, &calibration, config.jpeg_quality)?;

    let report = CalibrationReport {
        views: collected.records,
        calibration,
        undistorted,
    };
    let json_path = output_dir.join("calibration.json");
    let json = serde_json::to_string_pretty(&report)?;
    std::fs::write(&json_path, json).map_err(|source| SessionError::Write {
        path: json_path.clone(),
        source,
    })?;
    info!("calibration written to {}", json_path.display());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_survive_partial_json() {
        let cfg: CalibrationConfig =
            serde_json::from_str(r#"{ "board": { "square_size": 25.0 } }"#).expect("json");
        assert_eq!(cfg.board.cols, 9);
        assert_eq!(cfg.board.rows, 6);
        assert_eq!(cfg.board.square_size, 25.0);
        assert_eq!(cfg.jpeg_quality, 95);
        assert_eq!(cfg.corners, CornerParams::default());
    }

    #[test]
    fn outcomes_serialize_with_status_tag() {
        let json = serde_json::to_value(ViewOutcome::SizeMismatch {
            expected: [640, 480],
            found: [320, 240],
        })
        .expect("json");
        assert_eq!(json["status"], "size_mismatch");
        assert_eq!(json["found"][0], 320);
    }
}
