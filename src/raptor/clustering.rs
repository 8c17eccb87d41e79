//! Centroid-based clustering of embedded fragments.
//!
//! Embeddings are unit-normalized first, so squared Euclidean distance and
//! cosine similarity rank points the same way. Partitioning is seeded
//! k-means++ followed by bounded Lloyd refinement.

use super::error::{TreeError, TreeResult};
use super::tree::Fragment;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn normalize(embedding: &[f32]) -> Vec<f32> {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return embedding.to_vec();
    }
    embedding.iter().map(|v| v / norm).collect()
}

/// Calculate centroid (average) of multiple embeddings
pub fn calculate_centroid(embeddings: &[&[f32]]) -> Vec<f32> {
    if embeddings.is_empty() {
        return Vec::new();
    }

    let dim = embeddings[0].len();
    let mut centroid = vec![0.0; dim];

    for emb in embeddings {
        for (i, val) in emb.iter().enumerate() {
            centroid[i] += val;
        }
    }

    let n = embeddings.len() as f32;
    for val in centroid.iter_mut() {
        *val /= n;
    }

    centroid
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Clusterer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClustererConfig {
    /// Seed for centroid initialization
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Independent initializations; the lowest-inertia one wins
    #[serde(default = "default_n_init")]
    pub n_init: usize,

    /// Upper bound on refinement passes per initialization
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,

    /// Stop once the total squared centroid shift drops below this
    #[serde(default = "default_tol")]
    pub tol: f64,
}

fn default_seed() -> u64 {
    42
}

fn default_n_init() -> usize {
    3
}

fn default_max_iter() -> usize {
    300
}

fn default_tol() -> f64 {
    1e-4
}

impl Default for ClustererConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            n_init: default_n_init(),
            max_iter: default_max_iter(),
            tol: default_tol(),
        }
    }
}

/// One cluster produced by [`Clusterer::fit`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResult {
    pub cluster_id: usize,
    /// Positions into the item list passed to `fit`
    pub members: Vec<usize>,
    /// Position of the member closest to the centroid
    pub representative: usize,
    pub content: String,
    pub keyword: String,
}

/// Outcome of a single k-means run
#[derive(Debug, Clone)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f32>>,
    pub inertia: f64,
}

/// Seeded k-means (k-means++ initialization, Lloyd refinement).
#[derive(Debug, Clone)]
pub struct KMeans {
    k: usize,
    max_iter: usize,
    tol: f64,
    seed: u64,
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: default_max_iter(),
            tol: default_tol(),
            seed: default_seed(),
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// k-means++: first centroid uniform, the rest sampled proportionally to
    /// squared distance from the nearest chosen centroid.
    fn init_centroids(&self, data: &[Vec<f32>], rng: &mut StdRng) -> Vec<Vec<f32>> {
        let n = data.len();
        let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(self.k);
        centroids.push(data[rng.gen_range(0..n)].clone());

        while centroids.len() < self.k {
            let distances: Vec<f32> = data
                .iter()
                .map(|point| {
                    centroids
                        .iter()
                        .map(|c| squared_distance(point, c))
                        .fold(f32::MAX, f32::min)
                })
                .collect();

            let total: f32 = distances.iter().sum();
            if total <= 0.0 {
                centroids.push(data[rng.gen_range(0..n)].clone());
                continue;
            }

            let threshold = rng.gen::<f32>() * total;
            let mut cumsum = 0.0;
            let mut selected = distances.iter().rposition(|&d| d > 0.0).unwrap_or(n - 1);
            for (j, &d) in distances.iter().enumerate() {
                cumsum += d;
                if cumsum >= threshold && d > 0.0 {
                    selected = j;
                    break;
                }
            }
            centroids.push(data[selected].clone());
        }

        centroids
    }

    fn assign(data: &[Vec<f32>], centroids: &[Vec<f32>], labels: &mut [usize]) {
        for (point, label) in data.iter().zip(labels.iter_mut()) {
            let mut best_cluster = 0;
            let mut best_dist = f32::MAX;
            for (c, centroid) in centroids.iter().enumerate() {
                let dist = squared_distance(point, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best_cluster = c;
                }
            }
            *label = best_cluster;
        }
    }

    /// Member means per cluster; `None` for clusters without members.
    fn member_means(&self, data: &[Vec<f32>], labels: &[usize]) -> Vec<Option<Vec<f32>>> {
        let mut groups: Vec<Vec<&[f32]>> = vec![Vec::new(); self.k];
        for (point, &label) in data.iter().zip(labels) {
            groups[label].push(point.as_slice());
        }
        groups
            .iter()
            .map(|g| (!g.is_empty()).then(|| calculate_centroid(g)))
            .collect()
    }

    pub fn fit(&self, data: &[Vec<f32>]) -> TreeResult<KMeansFit> {
        if data.is_empty() {
            return Err(TreeError::ClusteringFailure("no points to cluster".to_string()));
        }
        if self.k == 0 || self.k > data.len() {
            return Err(TreeError::ClusteringFailure(format!(
                "cannot create {} clusters from {} points",
                self.k,
                data.len()
            )));
        }
        let dim = data[0].len();
        if let Some(bad) = data.iter().find(|p| p.len() != dim) {
            return Err(TreeError::InvalidInput(format!(
                "point dimension mismatch: expected {}, found {}",
                dim,
                bad.len()
            )));
        }

        let n = data.len();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = self.init_centroids(data, &mut rng);
        let mut labels = vec![0usize; n];

        for _ in 0..self.max_iter {
            Self::assign(data, &centroids, &mut labels);

            let new_centroids: Vec<Vec<f32>> = self
                .member_means(data, &labels)
                .into_iter()
                .map(|mean| mean.unwrap_or_else(|| data[rng.gen_range(0..n)].clone()))
                .collect();

            let shift: f32 = centroids
                .iter()
                .zip(new_centroids.iter())
                .map(|(a, b)| squared_distance(a, b))
                .sum();

            centroids = new_centroids;
            if (shift as f64) < self.tol {
                break;
            }
        }

        Self::assign(data, &centroids, &mut labels);
        for (centroid, mean) in centroids.iter_mut().zip(self.member_means(data, &labels)) {
            if let Some(mean) = mean {
                *centroid = mean;
            }
        }

        let inertia = data
            .iter()
            .zip(&labels)
            .map(|(point, &label)| squared_distance(point, &centroids[label]) as f64)
            .sum();

        Ok(KMeansFit {
            labels,
            centroids,
            inertia,
        })
    }
}

/// Partitions embedded fragments and picks one representative per cluster.
///
/// Stateless apart from its configuration: repeated calls with the same
/// input give the same output.
#[derive(Debug, Clone, Default)]
pub struct Clusterer {
    config: ClustererConfig,
}

impl Clusterer {
    pub fn new(config: ClustererConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClustererConfig {
        &self.config
    }

    /// Partition `items` into `k` clusters.
    ///
    /// When `k` exceeds the number of items every item becomes its own
    /// cluster. Clusters left without members are dropped.
    pub fn fit(
        &self,
        items: &[Fragment],
        embeddings: &[Vec<f32>],
        k: usize,
    ) -> TreeResult<Vec<ClusterResult>> {
        let data = prepare(items, embeddings)?;
        if k == 0 {
            return Err(TreeError::ClusteringFailure(
                "cluster count must be positive".to_string(),
            ));
        }

        let n = data.len();
        if k > n {
            tracing::warn!(
                "Requested {} clusters for {} items, using one cluster per item",
                k,
                n
            );
            return Ok(items
                .iter()
                .enumerate()
                .map(|(i, item)| ClusterResult {
                    cluster_id: i,
                    members: vec![i],
                    representative: i,
                    content: item.content.clone(),
                    keyword: item.keyword.clone(),
                })
                .collect());
        }

        let fit = self.best_fit(&data, k)?;

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
        for (position, &label) in fit.labels.iter().enumerate() {
            members[label].push(position);
        }

        let mut results = Vec::with_capacity(k);
        for (cluster_id, positions) in members.into_iter().enumerate() {
            if positions.is_empty() {
                tracing::debug!("Dropping empty cluster {}", cluster_id);
                continue;
            }
            let representative = representative_position(&positions, &data, &fit.centroids[cluster_id]);
            let item = &items[representative];
            results.push(ClusterResult {
                cluster_id,
                members: positions,
                representative,
                content: item.content.clone(),
                keyword: item.keyword.clone(),
            });
        }

        tracing::debug!(
            "Clustered {} items into {} clusters (inertia {:.4})",
            n,
            results.len(),
            fit.inertia
        );
        Ok(results)
    }

    /// Total within-cluster squared distance for a trial partition into `k`
    /// clusters. Used by the elbow analysis; nothing is retained.
    pub fn trial_cost(&self, items: &[Fragment], embeddings: &[Vec<f32>], k: usize) -> TreeResult<f64> {
        let data = prepare(items, embeddings)?;
        if k == 0 {
            return Err(TreeError::ClusteringFailure(
                "cluster count must be positive".to_string(),
            ));
        }
        let k = k.min(data.len());
        Ok(self.best_fit(&data, k)?.inertia)
    }

    fn best_fit(&self, data: &[Vec<f32>], k: usize) -> TreeResult<KMeansFit> {
        let mut best: Option<KMeansFit> = None;
        for run in 0..self.config.n_init.max(1) {
            let fit = KMeans::new(k)
                .with_max_iter(self.config.max_iter)
                .with_tol(self.config.tol)
                .with_seed(self.config.seed.wrapping_add(run as u64))
                .fit(data)?;
            if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
                best = Some(fit);
            }
        }
        best.ok_or_else(|| TreeError::ClusteringFailure("no k-means run completed".to_string()))
    }
}

/// Validate inputs and return unit-normalized embeddings.
fn prepare(items: &[Fragment], embeddings: &[Vec<f32>]) -> TreeResult<Vec<Vec<f32>>> {
    if items.is_empty() {
        return Err(TreeError::ClusteringFailure("no items to cluster".to_string()));
    }
    if embeddings.is_empty() {
        return Err(TreeError::ClusteringFailure("no embeddings".to_string()));
    }
    if items.len() != embeddings.len() {
        return Err(TreeError::InvalidInput(format!(
            "{} items but {} embeddings",
            items.len(),
            embeddings.len()
        )));
    }

    let dim = embeddings[0].len();
    if dim == 0 {
        return Err(TreeError::ClusteringFailure("embeddings have no dimensions".to_string()));
    }
    if let Some(bad) = embeddings.iter().find(|e| e.len() != dim) {
        return Err(TreeError::InvalidInput(format!(
            "embedding dimension mismatch: expected {}, found {}",
            dim,
            bad.len()
        )));
    }

    Ok(embeddings.iter().map(|e| normalize(e)).collect())
}

/// Member with the highest cosine similarity to the centroid; ties go to
/// the lowest position.
fn representative_position(positions: &[usize], data: &[Vec<f32>], centroid: &[f32]) -> usize {
    let mut best = positions[0];
    let mut best_sim = f32::NEG_INFINITY;
    for &p in positions {
        let sim = cosine_similarity(&data[p], centroid);
        if sim > best_sim {
            best_sim = sim;
            best = p;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<Fragment> {
        (0..n)
            .map(|i| Fragment::new(format!("text {}", i), format!("kw{}", i)))
            .collect()
    }

    fn two_groups() -> Vec<Vec<f32>> {
        vec![
            vec![1.0, 0.05, 0.0],
            vec![1.0, 0.0, 0.05],
            vec![0.0, 1.0, 0.02],
            vec![0.05, 1.0, 0.0],
        ]
    }

    #[test]
    fn test_cosine_sim() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b) > 0.9);
        assert!(cosine_similarity(&a, &c) < 0.1);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_normalize() {
        let v = normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_kmeans_separates_groups() {
        let data: Vec<Vec<f32>> = two_groups().iter().map(|e| normalize(e)).collect();
        let fit = KMeans::new(2).with_seed(7).fit(&data).unwrap();
        assert_eq!(fit.labels[0], fit.labels[1]);
        assert_eq!(fit.labels[2], fit.labels[3]);
        assert_ne!(fit.labels[0], fit.labels[2]);
        assert!(fit.inertia < 0.01);
    }

    #[test]
    fn test_kmeans_rejects_bad_k() {
        let data = vec![vec![1.0, 0.0]];
        assert!(KMeans::new(0).fit(&data).is_err());
        assert!(KMeans::new(2).fit(&data).is_err());
        assert!(KMeans::new(1).fit(&[]).is_err());
    }

    #[test]
    fn test_kmeans_rejects_ragged_points() {
        let data = vec![vec![1.0, 0.0], vec![0.0, 1.0, 0.5], vec![1.0, 1.0]];
        assert!(matches!(
            KMeans::new(2).fit(&data),
            Err(TreeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_fit_returns_members_and_representatives() {
        let clusterer = Clusterer::default();
        let results = clusterer.fit(&items(4), &two_groups(), 2).unwrap();

        assert_eq!(results.len(), 2);
        let mut all: Vec<usize> = results.iter().flat_map(|r| r.members.clone()).collect();
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3]);

        for r in &results {
            assert!(r.members.contains(&r.representative));
            assert_eq!(r.content, format!("text {}", r.representative));
            assert_eq!(r.keyword, format!("kw{}", r.representative));
        }
    }

    #[test]
    fn test_fit_single_cluster_covers_everything() {
        let results = Clusterer::default().fit(&items(4), &two_groups(), 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].members, vec![0, 1, 2, 3]);
        assert_eq!(results[0].cluster_id, 0);
    }

    #[test]
    fn test_fit_caps_k_to_item_count() {
        let results = Clusterer::default().fit(&items(3), &two_groups()[..3], 10).unwrap();
        assert_eq!(results.len(), 3);
        for (i, r) in results.iter().enumerate() {
            assert_eq!(r.members, vec![i]);
            assert_eq!(r.representative, i);
        }
    }

    #[test]
    fn test_fit_failures() {
        let clusterer = Clusterer::default();
        assert!(matches!(
            clusterer.fit(&[], &[], 1),
            Err(TreeError::ClusteringFailure(_))
        ));
        assert!(matches!(
            clusterer.fit(&items(2), &[], 1),
            Err(TreeError::ClusteringFailure(_))
        ));
        assert!(matches!(
            clusterer.fit(&items(4), &two_groups(), 0),
            Err(TreeError::ClusteringFailure(_))
        ));
        assert!(matches!(
            clusterer.fit(&items(3), &two_groups(), 1),
            Err(TreeError::InvalidInput(_))
        ));
        let ragged = vec![vec![1.0, 0.0], vec![1.0]];
        assert!(matches!(
            clusterer.fit(&items(2), &ragged, 1),
            Err(TreeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_fit_is_deterministic() {
        let clusterer = Clusterer::new(ClustererConfig {
            seed: 11,
            ..Default::default()
        });
        let a = clusterer.fit(&items(4), &two_groups(), 2).unwrap();
        let b = clusterer.fit(&items(4), &two_groups(), 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_trial_cost_decreases_with_k() {
        let clusterer = Clusterer::default();
        let one = clusterer.trial_cost(&items(4), &two_groups(), 1).unwrap();
        let two = clusterer.trial_cost(&items(4), &two_groups(), 2).unwrap();
        let four = clusterer.trial_cost(&items(4), &two_groups(), 4).unwrap();
        assert!(one > two);
        assert!(two >= four);
        assert!(four.abs() < 1e-6);
        // Repeatable
        assert_eq!(two, clusterer.trial_cost(&items(4), &two_groups(), 2).unwrap());
    }
}
