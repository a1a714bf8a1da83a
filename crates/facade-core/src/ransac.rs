//! Model-agnostic RANSAC.
//!
//! Implement [`Estimator`] for a model and call [`ransac`]. The loop never
//! panics; when no consensus is reached the result carries `model == None`.

use rand::prelude::IndexedRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Tuning knobs for [`ransac`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacOptions {
    /// Upper bound on hypotheses drawn.
    pub max_iters: usize,
    /// A datum is an inlier when its residual is `<= thresh`.
    pub thresh: f64,
    /// Consensus sets smaller than this are rejected.
    pub min_inliers: usize,
    /// Target probability of drawing one all-inlier sample, in `[0, 1)`.
    pub confidence: f64,
    pub seed: u64,
    /// Re-estimate the winning hypothesis from all of its inliers.
    pub refit_on_inliers: bool,
}

impl Default for RansacOptions {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            thresh: 1.0,
            min_inliers: 4,
            confidence: 0.999,
            seed: 0x5eed,
            refit_on_inliers: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RansacResult<M> {
    pub model: Option<M>,
    /// Indices into the input slice, ascending.
    pub inliers: Vec<usize>,
    pub inlier_rms: f64,
    /// Hypotheses actually drawn.
    pub iters: usize,
}

impl<M> RansacResult<M> {
    fn empty() -> Self {
        Self {
            model: None,
            inliers: Vec::new(),
            inlier_rms: f64::INFINITY,
            iters: 0,
        }
    }

    pub fn success(&self) -> bool {
        self.model.is_some()
    }
}

/// A model that can be hypothesised from a minimal sample and scored per datum.
pub trait Estimator {
    type Datum;
    type Model;

    const MIN_SAMPLES: usize;

    /// Fit from exactly `MIN_SAMPLES` indices. `None` rejects the sample.
    fn fit(data: &[Self::Datum], sample: &[usize]) -> Option<Self::Model>;

    /// Non-negative error in the units of [`RansacOptions::thresh`].
    fn residual(model: &Self::Model, datum: &Self::Datum) -> f64;

    fn is_degenerate(_data: &[Self::Datum], _sample: &[usize]) -> bool {
        false
    }

    /// Least-squares fit over a consensus set; `None` keeps the hypothesis.
    fn refit(_data: &[Self::Datum], _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

/// Iterations needed so that one clean sample is drawn with `confidence`.
fn required_iterations(confidence: f64, inlier_ratio: f64, sample_size: usize) -> Option<usize> {
    if !(0.0..1.0).contains(&confidence) || inlier_ratio <= 0.0 {
        return None;
    }
    let clean = inlier_ratio.min(1.0).powi(sample_size as i32);
    let miss = (1.0 - clean).max(f64::MIN_POSITIVE).ln();
    if miss >= 0.0 {
        return None;
    }
    Some(((1.0 - confidence).ln() / miss).ceil().max(1.0) as usize)
}

fn score<E: Estimator>(
    data: &[E::Datum],
    model: &E::Model,
    thresh: f64,
    inliers: &mut Vec<usize>,
) -> f64 {
    inliers.clear();
    let mut sq = 0.0;
    for (i, d) in data.iter().enumerate() {
        let r = E::residual(model, d);
        if r <= thresh {
            inliers.push(i);
            sq += r * r;
        }
    }
    if inliers.is_empty() {
        f64::INFINITY
    } else {
        (sq / inliers.len() as f64).sqrt()
    }
}

/// Run RANSAC over `data`.
///
/// Hypotheses are ranked by inlier count, ties broken by inlier RMS. The
/// iteration budget shrinks as better consensus sets are found.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip_all, fields(n = data.len()))
)]
pub fn ransac<E: Estimator>(data: &[E::Datum], opts: &RansacOptions) -> RansacResult<E::Model> {
    let mut best = RansacResult::empty();
    if E::MIN_SAMPLES == 0 || data.len() < E::MIN_SAMPLES {
        return best;
    }

    let indices: Vec<usize> = (0..data.len()).collect();
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut sample = Vec::with_capacity(E::MIN_SAMPLES);
    let mut inliers = Vec::with_capacity(data.len());
    let mut budget = opts.max_iters;
    let mut iters = 0;

    while iters < budget {
        iters += 1;
        sample.clear();
        sample.extend(indices.choose_multiple(&mut rng, E::MIN_SAMPLES).copied());

        if E::is_degenerate(data, &sample) {
            continue;
        }
        let Some(mut model) = E::fit(data, &sample) else {
            continue;
        };

        let mut rms = score::<E>(data, &model, opts.thresh, &mut inliers);
        if inliers.len() < opts.min_inliers.max(E::MIN_SAMPLES) {
            continue;
        }

        if opts.refit_on_inliers {
            if let Some(refined) = E::refit(data, &inliers) {
                let mut refined_inliers = Vec::with_capacity(data.len());
                let refined_rms = score::<E>(data, &refined, opts.thresh, &mut refined_inliers);
                if refined_inliers.len() >= inliers.len() {
                    model = refined;
                    rms = refined_rms;
                    inliers = refined_inliers;
                }
            }
        }

        let better = best.model.is_none()
            || inliers.len() > best.inliers.len()
            || (inliers.len() == best.inliers.len() && rms < best.inlier_rms);
        if better {
            best.model = Some(model);
            best.inliers = inliers.clone();
            best.inlier_rms = rms;

            let ratio = best.inliers.len() as f64 / data.len() as f64;
            if let Some(n) = required_iterations(opts.confidence, ratio, E::MIN_SAMPLES) {
                budget = n.clamp(iters, opts.max_iters);
            }
        }
    }

    best.iters = iters;
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Horizontal offset model `y = c`.
    struct Level;

    impl Estimator for Level {
        type Datum = (f64, f64);
        type Model = f64;

        const MIN_SAMPLES: usize = 1;

        fn fit(data: &[Self::Datum], sample: &[usize]) -> Option<f64> {
            Some(data[sample[0]].1)
        }

        fn residual(model: &f64, datum: &Self::Datum) -> f64 {
            (datum.1 - model).abs()
        }

        fn refit(data: &[Self::Datum], inliers: &[usize]) -> Option<f64> {
            let sum: f64 = inliers.iter().map(|&i| data[i].1).sum();
            Some(sum / inliers.len() as f64)
        }
    }

    #[test]
    fn empty_input_has_no_model() {
        let res = ransac::<Level>(&[], &RansacOptions::default());
        assert!(!res.success());
        assert!(res.inliers.is_empty());
    }

    #[test]
    fn rejects_outliers_and_refits() {
        let mut data: Vec<(f64, f64)> = (0..20)
            .map(|i| (i as f64, 3.0 + if i % 2 == 0 { 0.1 } else { -0.1 }))
            .collect();
        data.extend([(1.0, 40.0), (2.0, -12.0), (3.0, 9.0)]);

        let opts = RansacOptions {
            thresh: 0.5,
            ..RansacOptions::default()
        };
        let res = ransac::<Level>(&data, &opts);
        let model = res.model.expect("consensus");
        assert!((model - 3.0).abs() < 1e-9);
        assert_eq!(res.inliers, (0..20).collect::<Vec<_>>());
        assert!(res.iters <= opts.max_iters);
    }

    #[test]
    fn iteration_bound_shrinks_with_inlier_ratio() {
        assert_eq!(required_iterations(0.999, 1.0, 4), Some(1));
        assert_eq!(required_iterations(0.999, 0.0, 4), None);
        let half = required_iterations(0.999, 0.5, 4).unwrap();
        let most = required_iterations(0.999, 0.9, 4).unwrap();
        assert!(most < half);
        assert!(half > 100);
    }
}
