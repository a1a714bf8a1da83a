//! Robust homography between an image and its grid neighbour.

use facade_core::{
    estimate_homography, homography_from_4pt, ransac, Estimator, Homography, RansacOptions,
};
use log::info;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::HomographyError;
use crate::features::Features;
use crate::grid::GridPosition;
use crate::matcher::FeatureMatch;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PairwiseParams {
    pub ransac: RansacOptions,
    /// Matches required before RANSAC is attempted.
    pub min_matches: usize,
}

impl Default for PairwiseParams {
    fn default() -> Self {
        Self {
            ransac: RansacOptions::default(),
            min_matches: HomographyEstimator::MIN_SAMPLES,
        }
    }
}

/// Homography from an image into its neighbour's frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PairwiseHomography {
    pub homography: Homography,
    pub matches: usize,
    pub inliers: usize,
    pub inlier_rms: f64,
}

impl PairwiseHomography {
    pub fn identity() -> Self {
        Self {
            homography: Homography::identity(),
            matches: 0,
            inliers: 0,
            inlier_rms: 0.0,
        }
    }
}

/// `(point in current image, point in neighbour)`.
pub type PointPair = (Point2<f64>, Point2<f64>);

/// RANSAC model for point-to-point homographies.
pub struct HomographyEstimator;

fn area2(a: &Point2<f64>, b: &Point2<f64>, c: &Point2<f64>) -> f64 {
    (b - a).perp(&(c - a))
}

fn has_collinear_triple(pts: &[Point2<f64>; 4]) -> bool {
    const MIN_AREA2: f64 = 1e-6;
    [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)]
        .iter()
        .any(|&(i, j, k)| area2(&pts[i], &pts[j], &pts[k]).abs() <= MIN_AREA2)
}

impl Estimator for HomographyEstimator {
    type Datum = PointPair;
    type Model = Homography;

    const MIN_SAMPLES: usize = 4;

    fn fit(data: &[PointPair], sample: &[usize]) -> Option<Homography> {
        let src = [0, 1, 2, 3].map(|i| data[sample[i]].0);
        let dst = [0, 1, 2, 3].map(|i| data[sample[i]].1);
        homography_from_4pt(&src, &dst)
    }

    fn residual(h: &Homography, datum: &PointPair) -> f64 {
        let p = h.apply(datum.0);
        if !(p.x.is_finite() && p.y.is_finite()) {
            return f64::INFINITY;
        }
        (p - datum.1).norm()
    }

    fn is_degenerate(data: &[PointPair], sample: &[usize]) -> bool {
        let src = [0, 1, 2, 3].map(|i| data[sample[i]].0);
        let dst = [0, 1, 2, 3].map(|i| data[sample[i]].1);
        has_collinear_triple(&src) || has_collinear_triple(&dst)
    }

    fn refit(data: &[PointPair], inliers: &[usize]) -> Option<Homography> {
        let (src, dst): (Vec<_>, Vec<_>) = inliers.iter().map(|&i| data[i]).unzip();
        estimate_homography(&src, &dst)
    }
}

/// Point pairs for `matches`, which index the neighbour (query) and the
/// current image (train).
pub fn matched_points(
    current: &Features,
    neighbor: &Features,
    matches: &[FeatureMatch],
) -> Vec<PointPair> {
    matches
        .iter()
        .filter_map(|m| {
            let c = current.keypoints.get(m.train_idx)?;
            let n = neighbor.keypoints.get(m.query_idx)?;
            Some((
                Point2::new(c.x as f64, c.y as f64),
                Point2::new(n.x as f64, n.y as f64),
            ))
        })
        .collect()
}

/// Robust homography mapping `current` into `neighbor`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(current, neighbor, matches, params), fields(matches = matches.len()))
)]
pub fn estimate_pairwise(
    position: GridPosition,
    current: &Features,
    neighbor: &Features,
    matches: &[FeatureMatch],
    params: &PairwiseParams,
) -> Result<PairwiseHomography, HomographyError> {
    let pairs = matched_points(current, neighbor, matches);
    let required = params.min_matches.max(HomographyEstimator::MIN_SAMPLES);
    if pairs.len() < required {
        return Err(HomographyError::TooFewMatches {
            position,
            matches: pairs.len(),
            required,
        });
    }

    let result = ransac::<HomographyEstimator>(&pairs, &params.ransac);
    let homography = result
        .model
        .filter(Homography::is_finite)
        .ok_or(HomographyError::RansacFailed {
            position,
            matches: pairs.len(),
        })?;
    info!(
        "{position}: RANSAC inliers {} of {} ({} iterations)",
        result.inliers.len(),
        pairs.len(),
        result.iters
    );
    Ok(PairwiseHomography {
        homography,
        matches: pairs.len(),
        inliers: result.inliers.len(),
        inlier_rms: result.inlier_rms,
    })
}
