//! Brute-force descriptor matching with the nearest-neighbour ratio test.

use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::features::Descriptors;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Squared Euclidean distance.
    #[default]
    SquaredL2,
    L2,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParams {
    pub metric: DistanceMetric,
    /// Keep a match only when `best < ratio × second best`.
    pub ratio: f32,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::SquaredL2,
            ratio: 0.8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatch {
    /// Row in the query (neighbour) descriptors.
    pub query_idx: usize,
    /// Row in the train (current image) descriptors.
    pub train_idx: usize,
    pub distance: f32,
}

fn distance(a: &[f32], b: &[f32], metric: DistanceMetric) -> f32 {
    let sq: f32 = a.iter().zip(b).map(|(p, q)| (p - q) * (p - q)).sum();
    match metric {
        DistanceMetric::SquaredL2 => sq,
        DistanceMetric::L2 => sq.sqrt(),
    }
}

/// Brute-force two-nearest-neighbour search with Lowe's ratio test.
///
/// Queries with a single train candidate have nothing to compare against
/// and are kept.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(query = query.len(), train = train.len()))
)]
pub fn match_descriptors(
    query: &Descriptors,
    train: &Descriptors,
    params: &MatchParams,
) -> Vec<FeatureMatch> {
    let mut matches = Vec::new();
    for (query_idx, q) in query.iter().enumerate() {
        let mut best: Option<(usize, f32)> = None;
        let mut second: Option<f32> = None;
        for (train_idx, t) in train.iter().enumerate() {
            let d = distance(q, t, params.metric);
            match best {
                Some((_, bd)) if d >= bd => {
                    if second.is_none_or(|sd| d < sd) {
                        second = Some(d);
                    }
                }
                _ => {
                    second = best.map(|(_, bd)| bd);
                    best = Some((train_idx, d));
                }
            }
        }
        let Some((train_idx, d)) = best else {
            continue;
        };
        if second.is_none_or(|sd| d < params.ratio * sd) {
            matches.push(FeatureMatch {
                query_idx,
                train_idx,
                distance: d,
            });
        }
    }
    matches
}
