use std::fs;
use std::path::{Path, PathBuf};

use facade_calib::{CalibrationConfig, SessionError};
use facade_stitch::{StitchConfig, StitchError};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum FacadeError {
    #[error("failed to read config {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Calibration(#[from] SessionError),

    #[error(transparent)]
    Stitch(#[from] StitchError),

    #[error("failed to serialize config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to install logger: {0}")]
    Logger(#[from] log::SetLoggerError),

    #[cfg(feature = "tracing")]
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(#[from] facade_core::TryInitError),
}

/// Default input and output locations, overridable on the command line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub calibration_dir: PathBuf,
    pub distorted_dir: PathBuf,
    pub undistorted_dir: PathBuf,
    pub facade_dir: PathBuf,
    /// Stitch output; `<facade_dir>/result.jpg` when unset.
    pub stitch_output: Option<PathBuf>,
    pub stitch_report: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            calibration_dir: PathBuf::from("images/calibration_images"),
            distorted_dir: PathBuf::from("images/distorted_images"),
            undistorted_dir: PathBuf::from("images/undistorted_images"),
            facade_dir: PathBuf::from("images/facade"),
            stitch_output: None,
            stitch_report: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub calibration: CalibrationConfig,
    pub stitch: StitchConfig,
}

impl AppConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, FacadeError> {
        let text = fs::read_to_string(path).map_err(|source| FacadeError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| FacadeError::ParseConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Config file contents, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, FacadeError> {
        path.map_or_else(|| Ok(Self::default()), Self::from_json_file)
    }
}
