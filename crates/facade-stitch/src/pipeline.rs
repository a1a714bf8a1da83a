//! The stitching driver: every stage's output lives in [`StitchState`].

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use facade_core::Homography;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use log::{info, warn};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::blend::{BlendParams, MultiBandBlender};
use crate::crop::crop_to_content;
use crate::error::{HomographyError, StitchError};
use crate::exposure::{compensate_exposure, ExposureParams};
use crate::features::{detect_and_describe, FeatureParams, Features};
use crate::graph::{chain_to_anchor, compose_references};
use crate::grid::{neighbor_of, GridPosition, ImageGrid};
use crate::loader::{load_images, scan_grid, LoaderConfig};
use crate::matcher::{match_descriptors, FeatureMatch, MatchParams};
use crate::pairwise::{estimate_pairwise, PairwiseHomography, PairwiseParams};
use crate::warp::{warp_image, CoverageClaim, Rect, WarpedImage};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasParams {
    pub width: u32,
    pub height: u32,
}

impl Default for CanvasParams {
    fn default() -> Self {
        Self {
            width: 5000,
            height: 3000,
        }
    }
}

impl CanvasParams {
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// What to do when a pairwise homography cannot be estimated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop with the failing position.
    #[default]
    Abort,
    /// Drop the edge; the image and everything hanging off it are left out.
    Skip,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    pub loader: LoaderConfig,
    pub features: FeatureParams,
    pub matching: MatchParams,
    pub pairwise: PairwiseParams,
    pub exposure: ExposureParams,
    pub canvas: CanvasParams,
    pub blend: BlendParams,
    pub failure_policy: FailurePolicy,
    pub jpeg_quality: u8,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            loader: LoaderConfig::default(),
            features: FeatureParams::default(),
            matching: MatchParams::default(),
            pairwise: PairwiseParams::default(),
            exposure: ExposureParams::default(),
            canvas: CanvasParams::default(),
            blend: BlendParams::default(),
            failure_policy: FailurePolicy::default(),
            jpeg_quality: 95,
        }
    }
}

/// All intermediate results of one stitching run.
#[derive(Debug)]
pub struct StitchState {
    pub paths: ImageGrid<PathBuf>,
    pub images: ImageGrid<RgbImage>,
    pub features: ImageGrid<Features>,
    /// Matches against the neighbour; empty for the anchor.
    pub matches: ImageGrid<Vec<FeatureMatch>>,
    pub pairwise: ImageGrid<Option<PairwiseHomography>>,
    pub references: ImageGrid<Option<Homography>>,
    /// Row-major exposure gains.
    pub gains: Vec<f64>,
}

/// A blended canvas region.
#[derive(Clone, Debug)]
pub struct Composite {
    pub image: RgbImage,
    /// Where `image` sits on the canvas.
    pub roi: Rect,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PositionReport {
    pub position: GridPosition,
    pub path: PathBuf,
    pub features: usize,
    pub matches: usize,
    pub inliers: Option<usize>,
    /// Positions whose pairwise homographies compose this one's reference,
    /// from this position down to the anchor.
    pub chain: Vec<GridPosition>,
    /// Into the anchor frame; `None` when excluded.
    pub reference: Option<Homography>,
    pub gain: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StitchReport {
    pub output: PathBuf,
    pub canvas: CanvasParams,
    pub positions: Vec<PositionReport>,
    /// Crop of the composite, in canvas coordinates.
    pub crop: Rect,
}

/// Keypoints and descriptors of every image.
pub fn detect_features(
    images: &ImageGrid<RgbImage>,
    params: &FeatureParams,
) -> ImageGrid<Features> {
    images.map(|pos, img| {
        let features = detect_and_describe(img, params);
        info!("{pos}: {} features", features.len());
        features
    })
}

/// Ratio-tested matches of every image against its neighbour.
pub fn match_neighbors(
    features: &ImageGrid<Features>,
    params: &MatchParams,
) -> ImageGrid<Vec<FeatureMatch>> {
    features.map(|pos, current| {
        let Some(neighbor) = neighbor_of(pos).and_then(|n| features.get(n)) else {
            return Vec::new();
        };
        let matches = match_descriptors(&neighbor.descriptors, &current.descriptors, params);
        info!("{pos}: {} matches", matches.len());
        matches
    })
}

/// Pairwise homographies; the anchor gets the identity.
pub fn estimate_homographies(
    features: &ImageGrid<Features>,
    matches: &ImageGrid<Vec<FeatureMatch>>,
    params: &PairwiseParams,
    policy: FailurePolicy,
) -> Result<ImageGrid<Option<PairwiseHomography>>, HomographyError> {
    features.try_map(|pos, current| {
        let Some(neighbor) = neighbor_of(pos).and_then(|n| features.get(n)) else {
            return Ok(Some(PairwiseHomography::identity()));
        };
        let pos_matches = matches.get(pos).map(Vec::as_slice).unwrap_or_default();
        match estimate_pairwise(pos, current, neighbor, pos_matches, params) {
            Ok(h) => Ok(Some(h)),
            Err(err) => match policy {
                FailurePolicy::Abort => Err(err),
                FailurePolicy::Skip => {
                    warn!("{err}; skipping");
                    Ok(None)
                }
            },
        }
    })
}

/// Warp every registered image onto the canvas and blend them.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
pub fn composite(
    images: &ImageGrid<RgbImage>,
    references: &ImageGrid<Option<Homography>>,
    canvas: &CanvasParams,
    blend: &BlendParams,
) -> Result<Composite, StitchError> {
    let size = canvas.size();
    let margin = blend.margin();

    let mut warped: Vec<(GridPosition, WarpedImage)> = Vec::new();
    for (pos, img) in images.iter() {
        let Some(h) = references.get(pos).copied().flatten() else {
            continue;
        };
        match warp_image(img, &h, size, margin) {
            Some(w) => warped.push((pos, w)),
            None => warn!("{pos}: warped image misses the canvas"),
        }
    }

    let union = warped
        .iter()
        .map(|(_, w)| w.roi)
        .reduce(|a, b| {
            let (x0, y0) = (a.x.min(b.x), a.y.min(b.y));
            let (x1, y1) = (a.right().max(b.right()), a.bottom().max(b.bottom()));
            Rect::new(x0, y0, x1 - x0, y1 - y0)
        })
        .ok_or(StitchError::EmptyComposite)?;

    let mut claim = CoverageClaim::new(size);
    let mut blender = MultiBandBlender::new(union, blend.bands)?;
    for (pos, w) in &warped {
        let mask = claim.claim(w.roi, &w.footprint);
        let claimed = mask.pixels().filter(|p| p.0[0] != 0).count();
        info!("{pos}: claimed {claimed} canvas pixels");
        blender.feed(&w.image, &mask, (w.roi.x, w.roi.y))?;
    }
    let (image, _) = blender.blend();
    Ok(Composite { image, roi: union })
}

fn save_jpeg(path: &Path, img: &RgbImage, quality: u8) -> Result<(), StitchError> {
    let file = File::create(path).map_err(|source| StitchError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100))
        .encode_image(img)
        .map_err(|source| StitchError::SaveImage {
            path: path.to_path_buf(),
            source,
        })
}

/// Load, register, equalise and blend the grid in `input_dir`.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip(config)))]
pub fn build_state(input_dir: &Path, config: &StitchConfig) -> Result<StitchState, StitchError> {
    let paths = scan_grid(input_dir, &config.loader)?;
    if !paths.contains(GridPosition::ANCHOR) {
        return Err(StitchError::MissingAnchor);
    }
    let mut images = load_images(&paths)?;
    info!("loaded {} images in {} rows", images.len(), images.row_count());

    let features = detect_features(&images, &config.features);
    let matches = match_neighbors(&features, &config.matching);
    let pairwise = estimate_homographies(
        &features,
        &matches,
        &config.pairwise,
        config.failure_policy,
    )?;
    let references = compose_references(&pairwise.map(|_, p| p.as_ref().map(|p| p.homography)));
    let gains = compensate_exposure(&mut images, &config.exposure);

    Ok(StitchState {
        paths,
        images,
        features,
        matches,
        pairwise,
        references,
        gains,
    })
}

/// Run the whole pipeline and write the cropped composite to `output`
/// (default `<input_dir>/result.jpg`) and, when given, a JSON report.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip(config)))]
pub fn run_stitch(
    input_dir: &Path,
    output: Option<&Path>,
    report_path: Option<&Path>,
    config: &StitchConfig,
) -> Result<StitchReport, StitchError> {
    let state = build_state(input_dir, config)?;
    let composite = composite(&state.images, &state.references, &config.canvas, &config.blend)?;
    let (cropped, rect) = crop_to_content(&composite.image)?;
    let crop = Rect::new(
        composite.roi.x + rect.x,
        composite.roi.y + rect.y,
        rect.width,
        rect.height,
    );
    info!(
        "composite {}x{} cropped at ({}, {})",
        crop.width, crop.height, crop.x, crop.y
    );

    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| input_dir.join("result.jpg"));
    save_jpeg(&output, &cropped, config.jpeg_quality)?;
    info!("wrote {}", output.display());

    let positions = state
        .paths
        .iter()
        .zip(&state.gains)
        .map(|((pos, path), &gain)| PositionReport {
            position: pos,
            path: path.clone(),
            features: state.features.get(pos).map_or(0, Features::len),
            matches: state.matches.get(pos).map_or(0, Vec::len),
            inliers: state.pairwise.get(pos).cloned().flatten().map(|p| p.inliers),
            chain: chain_to_anchor(pos),
            reference: state.references.get(pos).copied().flatten(),
            gain,
        })
        .collect();
    let report = StitchReport {
        output,
        canvas: config.canvas.clone(),
        positions,
        crop,
    };

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json).map_err(|source| StitchError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(report)
}
