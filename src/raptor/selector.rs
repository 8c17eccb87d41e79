//! Cluster-count selection.
//!
//! Each round either collapses every item into one cluster or asks an
//! elbow analysis over trial k-means costs for the number of clusters. Three
//! independent elbow estimators vote on the curve; the knee estimator breaks
//! ties.

use super::clustering::{cosine_similarity, Clusterer};
use super::error::{TreeError, TreeResult};
use super::tree::Fragment;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// How the collapse-to-one decision is made
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollapseStrategy {
    /// Size limits combined with pairwise similarity
    #[default]
    Adaptive,
    /// Average similarity or a small item count
    Similarity,
    /// Item count only
    Threshold,
    /// Fixed small item count
    Fixed,
}

impl std::str::FromStr for CollapseStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "adaptive" => Ok(Self::Adaptive),
            "similarity" => Ok(Self::Similarity),
            "threshold" => Ok(Self::Threshold),
            "fixed" => Ok(Self::Fixed),
            _ => Err(format!("Unknown collapse strategy: {}", s)),
        }
    }
}

/// Selector thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorConfig {
    #[serde(default)]
    pub strategy: CollapseStrategy,

    /// Always collapse at or below this many items
    #[serde(default = "default_pair_limit")]
    pub pair_limit: usize,

    /// Collapse when average similarity reaches this...
    #[serde(default = "default_high_avg")]
    pub high_avg_similarity: f32,

    /// ...and the least similar pair reaches this
    #[serde(default = "default_high_min")]
    pub high_min_similarity: f32,

    /// Small sets collapse when average similarity exceeds this
    #[serde(default = "default_small_avg")]
    pub small_set_avg_similarity: f32,

    #[serde(default = "default_small_limit")]
    pub small_set_limit: usize,

    /// Anything this small collapses regardless of similarity
    #[serde(default = "default_tail_limit")]
    pub tail_limit: usize,

    /// Average similarity above which the `similarity` strategy collapses
    #[serde(default = "default_similarity_avg")]
    pub similarity_strategy_avg: f32,

    #[serde(default = "default_fixed_limit")]
    pub fixed_limit: usize,
}

fn default_pair_limit() -> usize {
    2
}

fn default_high_avg() -> f32 {
    0.75
}

fn default_high_min() -> f32 {
    0.50
}

fn default_small_avg() -> f32 {
    0.60
}

fn default_small_limit() -> usize {
    4
}

fn default_tail_limit() -> usize {
    5
}

fn default_similarity_avg() -> f32 {
    0.70
}

fn default_fixed_limit() -> usize {
    3
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            strategy: CollapseStrategy::default(),
            pair_limit: default_pair_limit(),
            high_avg_similarity: default_high_avg(),
            high_min_similarity: default_high_min(),
            small_set_avg_similarity: default_small_avg(),
            small_set_limit: default_small_limit(),
            tail_limit: default_tail_limit(),
            similarity_strategy_avg: default_similarity_avg(),
            fixed_limit: default_fixed_limit(),
        }
    }
}

impl SelectorConfig {
    pub fn validate(&self) -> Result<(), String> {
        let thresholds = [
            ("high_avg_similarity", self.high_avg_similarity),
            ("high_min_similarity", self.high_min_similarity),
            ("small_set_avg_similarity", self.small_set_avg_similarity),
            ("similarity_strategy_avg", self.similarity_strategy_avg),
        ];
        for (name, value) in thresholds {
            if !(-1.0..=1.0).contains(&value) {
                return Err(format!("{} must be between -1.0 and 1.0, got {}", name, value));
            }
        }
        if self.pair_limit == 0 {
            return Err("pair_limit must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Pairwise cosine similarity over all distinct item pairs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityStats {
    pub average: f32,
    pub minimum: f32,
    pub pairs: usize,
}

impl SimilarityStats {
    /// `None` when fewer than two embeddings are given.
    pub fn from_embeddings(embeddings: &[Vec<f32>]) -> Option<Self> {
        let mut sum = 0.0f64;
        let mut minimum = f32::INFINITY;
        let mut pairs = 0usize;

        for (i, a) in embeddings.iter().enumerate() {
            for b in &embeddings[i + 1..] {
                let sim = cosine_similarity(a, b);
                sum += sim as f64;
                minimum = minimum.min(sim);
                pairs += 1;
            }
        }

        (pairs > 0).then(|| Self {
            average: (sum / pairs as f64) as f32,
            minimum,
            pairs,
        })
    }
}

/// Why a round was collapsed into a single cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollapseRule {
    TooFewItems,
    HighSimilarity,
    SmallAndSimilar,
    SmallTail,
    SimilarityStrategy,
    ThresholdStrategy,
    FixedStrategy,
}

impl std::fmt::Display for CollapseRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewItems => write!(f, "too few items"),
            Self::HighSimilarity => write!(f, "high pairwise similarity"),
            Self::SmallAndSimilar => write!(f, "small and fairly similar set"),
            Self::SmallTail => write!(f, "small tail set"),
            Self::SimilarityStrategy => write!(f, "similarity strategy"),
            Self::ThresholdStrategy => write!(f, "threshold strategy"),
            Self::FixedStrategy => write!(f, "fixed strategy"),
        }
    }
}

/// Candidate cluster counts for the elbow analysis:
/// `1..=min(n, max(n / 2 + 3, 3))`. Empty for `n == 0`.
pub fn safe_k_range(n: usize) -> RangeInclusive<usize> {
    let max_k = n.min((n / 2 + 3).max(3));
    1..=max_k
}

/// Elbow estimators over a `(k, inertia)` curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElbowEstimator {
    /// Max distance to the chord after normalizing both axes to [0, 1]
    Knee,
    /// Max perpendicular distance to the chord on raw axes
    ElbowDistance,
    /// Max absolute second difference
    Derivative,
}

impl ElbowEstimator {
    /// Voting order; the first entry breaks ties.
    pub const ALL: [ElbowEstimator; 3] = [Self::Knee, Self::ElbowDistance, Self::Derivative];

    /// `None` for an empty or inconsistent curve.
    pub fn estimate(&self, ks: &[usize], inertias: &[f64]) -> Option<usize> {
        if ks.is_empty() || ks.len() != inertias.len() {
            return None;
        }
        match self {
            Self::Knee => knee_point(ks, inertias),
            Self::ElbowDistance => elbow_distance(ks, inertias),
            Self::Derivative => derivative_point(ks, inertias),
        }
    }
}

impl std::fmt::Display for ElbowEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Knee => write!(f, "knee"),
            Self::ElbowDistance => write!(f, "elbow_distance"),
            Self::Derivative => write!(f, "derivative"),
        }
    }
}

/// Index of the first maximum, ignoring NaN.
fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

fn min_max_scale(values: &[f64]) -> Vec<f64> {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    if span <= 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / span).collect()
}

/// Perpendicular distance from every point to the chord joining the first
/// and last points. All zeros when the chord is degenerate.
fn chord_distances(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let last = xs.len() - 1;
    let (x0, y0) = (xs[0], ys[0]);
    let (dx, dy) = (xs[last] - x0, ys[last] - y0);
    let norm = (dx * dx + dy * dy).sqrt();
    if norm == 0.0 {
        return vec![0.0; xs.len()];
    }
    xs.iter()
        .zip(ys)
        .map(|(&x, &y)| (dx * (y0 - y) - dy * (x0 - x)).abs() / norm)
        .collect()
}

fn knee_point(ks: &[usize], inertias: &[f64]) -> Option<usize> {
    let xs: Vec<f64> = ks.iter().map(|&k| k as f64).collect();
    let distances = chord_distances(&min_max_scale(&xs), &min_max_scale(inertias));
    argmax(&distances).map(|i| ks[i])
}

fn elbow_distance(ks: &[usize], inertias: &[f64]) -> Option<usize> {
    let last = ks.len() - 1;
    let (x0, y0) = (ks[0] as f64, inertias[0]);
    let (dx, dy) = (ks[last] as f64 - x0, inertias[last] - y0);
    let norm = (dx * dx + dy * dy).sqrt();
    if norm == 0.0 {
        return Some(ks[0]);
    }
    let (ux, uy) = (dx / norm, dy / norm);

    // Distance between each point and its projection onto the chord.
    let distances: Vec<f64> = ks
        .iter()
        .zip(inertias)
        .map(|(&k, &y)| {
            let (vx, vy) = (k as f64 - x0, y - y0);
            let proj = vx * ux + vy * uy;
            let (px, py) = (vx - proj * ux, vy - proj * uy);
            (px * px + py * py).sqrt()
        })
        .collect();
    argmax(&distances).map(|i| ks[i])
}

fn derivative_point(ks: &[usize], inertias: &[f64]) -> Option<usize> {
    if inertias.len() < 3 {
        return Some(ks[ks.len() / 2]);
    }
    let first: Vec<f64> = inertias.windows(2).map(|w| w[1] - w[0]).collect();
    let curvature: Vec<f64> = first.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    // Two differences shrink the curve by two; shift back by one.
    argmax(&curvature).map(|i| ks[i + 1])
}

/// Combine estimator votes: a value backed by at least two estimators wins,
/// otherwise the knee vote, otherwise the first vote available.
pub fn majority_vote(votes: &[(ElbowEstimator, Option<usize>)]) -> Option<usize> {
    let valid: Vec<(ElbowEstimator, usize)> = votes
        .iter()
        .filter_map(|(est, k)| k.map(|k| (*est, k)))
        .collect();

    let mut best: Option<(usize, usize)> = None;
    for (_, k) in &valid {
        let count = valid.iter().filter(|(_, other)| other == k).count();
        if count >= 2 && best.map_or(true, |(_, c)| count > c) {
            best = Some((*k, count));
        }
    }
    if let Some((k, _)) = best {
        return Some(k);
    }

    valid
        .iter()
        .find(|(est, _)| *est == ElbowEstimator::Knee)
        .or_else(|| valid.first())
        .map(|(_, k)| *k)
}

/// Evaluate `cost` for every candidate k. Failed trials are logged and left
/// out of the curve.
pub fn cost_curve<F>(candidates: RangeInclusive<usize>, mut cost: F) -> (Vec<usize>, Vec<f64>)
where
    F: FnMut(usize) -> TreeResult<f64>,
{
    let mut ks = Vec::new();
    let mut inertias = Vec::new();
    for k in candidates {
        match cost(k) {
            Ok(c) => {
                tracing::debug!("Trial k={}: inertia {:.4}", k, c);
                ks.push(k);
                inertias.push(c);
            }
            Err(e) => tracing::warn!("Trial k={} failed: {}", k, e),
        }
    }
    (ks, inertias)
}

/// Pick k from an evaluated `(k, inertia)` curve by estimator vote.
pub fn elbow_k(ks: &[usize], inertias: &[f64]) -> TreeResult<usize> {
    let votes: Vec<(ElbowEstimator, Option<usize>)> = ElbowEstimator::ALL
        .iter()
        .map(|est| (*est, est.estimate(ks, inertias)))
        .collect();
    for (est, k) in &votes {
        tracing::debug!("Elbow estimator {}: {:?}", est, k);
    }
    majority_vote(&votes).ok_or(TreeError::NoValidK { n_items: ks.len() })
}

/// Chooses, per round, between a full collapse (k = 1) and an elbow-derived k.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    config: SelectorConfig,
    clusterer: Clusterer,
}

impl Selector {
    pub fn new(config: SelectorConfig, clusterer: Clusterer) -> Self {
        Self { config, clusterer }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Collapse rule that fires for these items, if any. Rules are checked
    /// in priority order.
    pub fn collapse_rule(&self, n: usize, embeddings: &[Vec<f32>]) -> Option<CollapseRule> {
        let cfg = &self.config;
        match cfg.strategy {
            CollapseStrategy::Adaptive => {
                if n <= cfg.pair_limit {
                    return Some(CollapseRule::TooFewItems);
                }
                if let Some(stats) = SimilarityStats::from_embeddings(embeddings) {
                    tracing::debug!(
                        "Pairwise similarity avg {:.4}, min {:.4}",
                        stats.average,
                        stats.minimum
                    );
                    if stats.average >= cfg.high_avg_similarity
                        && stats.minimum >= cfg.high_min_similarity
                    {
                        return Some(CollapseRule::HighSimilarity);
                    }
                    if n <= cfg.small_set_limit && stats.average > cfg.small_set_avg_similarity {
                        return Some(CollapseRule::SmallAndSimilar);
                    }
                }
                (n <= cfg.tail_limit).then_some(CollapseRule::SmallTail)
            }
            CollapseStrategy::Similarity => match SimilarityStats::from_embeddings(embeddings) {
                Some(stats) if n > 1 => (stats.average > cfg.similarity_strategy_avg
                    || n <= cfg.small_set_limit)
                    .then_some(CollapseRule::SimilarityStrategy),
                _ => (n <= cfg.fixed_limit).then_some(CollapseRule::SimilarityStrategy),
            },
            CollapseStrategy::Threshold => {
                (n <= cfg.tail_limit).then_some(CollapseRule::ThresholdStrategy)
            }
            CollapseStrategy::Fixed => (n <= cfg.fixed_limit).then_some(CollapseRule::FixedStrategy),
        }
    }

    /// Number of clusters for this round: `1` forces a collapse, anything
    /// else comes from the elbow analysis.
    pub fn select(&self, items: &[Fragment], embeddings: &[Vec<f32>]) -> TreeResult<usize> {
        if items.len() != embeddings.len() {
            return Err(TreeError::InvalidInput(format!(
                "{} items but {} embeddings",
                items.len(),
                embeddings.len()
            )));
        }

        let n = items.len();
        if let Some(rule) = self.collapse_rule(n, embeddings) {
            tracing::info!("Collapsing {} items into one cluster ({})", n, rule);
            return Ok(1);
        }

        let (ks, inertias) =
            cost_curve(safe_k_range(n), |k| self.clusterer.trial_cost(items, embeddings, k));
        if ks.is_empty() {
            return Err(TreeError::NoValidK { n_items: n });
        }

        let k = elbow_k(&ks, &inertias)?;
        tracing::info!("Elbow analysis chose k={} for {} items", k, n);
        Ok(k)
    }
}
