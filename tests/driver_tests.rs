//! Tests de integración del motor de clustering
//!
//! Ejercitan el bucle completo (driver, selector, clusterer, árbol) con un
//! embedder en memoria:
//! - Colapso inmediato de fragmentos casi duplicados
//! - Dos rondas con grupos bien separados
//! - Límite de seguridad y cancelación cooperativa
//! - Fallos de clustering que conservan las hojas
//! - Invariantes estructurales del árbol resultante

use async_trait::async_trait;
use ontotree::raptor::{
    validate_snapshot, EngineConfig, Fragment, NodeRole, RoundDriver, Termination, TreeSnapshot,
};
use ontotree::Embedder;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Looks each text up in a fixed table.
struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    on_call: Option<CancellationToken>,
}

impl TableEmbedder {
    fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            table: entries
                .iter()
                .map(|(text, v)| (text.to_string(), v.clone()))
                .collect(),
            on_call: None,
        }
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if let Some(token) = &self.on_call {
            token.cancel();
        }
        texts
            .iter()
            .map(|t| {
                self.table
                    .get(t)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("no embedding for {}", t))
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.table.values().next().map_or(0, |v| v.len())
    }
}

/// Returns empty vectors, as a broken model might.
struct ZeroWidthEmbedder;

#[async_trait]
impl Embedder for ZeroWidthEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(vec![Vec::new(); texts.len()])
    }

    fn dimension(&self) -> usize {
        0
    }
}

fn fragments(entries: &[(&str, Vec<f32>)]) -> Vec<Fragment> {
    entries
        .iter()
        .map(|(text, _)| Fragment::new(*text, text.to_lowercase()))
        .collect()
}

/// Twelve texts in three tight groups along the coordinate axes.
fn three_groups() -> Vec<(&'static str, Vec<f32>)> {
    let names = [
        "a0", "a1", "a2", "a3", "b0", "b1", "b2", "b3", "c0", "c1", "c2", "c3",
    ];
    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let mut v = vec![0.0f32; 3];
            v[i / 4] = 1.0;
            v[(i / 4 + 1) % 3] = 0.02 * (i % 4) as f32;
            (*name, v)
        })
        .collect()
}

fn assert_partition(snapshot: &TreeSnapshot) {
    let leaves: BTreeSet<usize> = snapshot
        .nodes
        .iter()
        .filter(|n| n.round == 0)
        .map(|n| n.index)
        .collect();
    let mut covered = Vec::new();
    for root in snapshot.roots() {
        covered.extend_from_slice(&root.original_leaf_indices);
    }
    covered.sort_unstable();
    assert_eq!(covered, leaves.into_iter().collect::<Vec<_>>());
}

#[tokio::test]
async fn test_near_duplicates_form_single_root() {
    let entries = vec![
        ("A", vec![1.0, 0.10, 0.0]),
        ("B", vec![1.0, 0.12, 0.02]),
        ("C", vec![1.0, 0.08, 0.05]),
        ("D", vec![1.0, 0.11, 0.01]),
    ];
    let driver = RoundDriver::new(
        Arc::new(TableEmbedder::new(&entries)),
        &EngineConfig::default(),
    );
    let outcome = driver.build(&fragments(&entries)).await.unwrap();

    assert!(outcome.is_converged());
    let snapshot = &outcome.snapshot;
    assert_eq!(snapshot.len(), 5);
    for leaf in 0..4 {
        let node = snapshot.node(leaf).unwrap();
        assert_eq!(node.role, NodeRole::Leaf);
        assert_eq!(node.parent_index, Some(4));
    }
    let root = snapshot.node(4).unwrap();
    assert_eq!(root.role, NodeRole::Root);
    assert_eq!(root.children, vec![0, 1, 2, 3]);
    assert_eq!(root.original_leaf_indices, vec![0, 1, 2, 3]);
    assert!(validate_snapshot(snapshot).is_empty());
}

#[tokio::test]
async fn test_two_separated_groups_take_two_rounds() {
    let entries = vec![
        ("A1", vec![1.0, 0.05, 0.0, 0.0]),
        ("A2", vec![1.0, 0.0, 0.05, 0.0]),
        ("A3", vec![1.0, 0.03, 0.03, 0.0]),
        ("B1", vec![0.0, 0.0, 0.05, 1.0]),
        ("B2", vec![0.0, 0.05, 0.0, 1.0]),
        ("B3", vec![0.0, 0.03, 0.03, 1.0]),
    ];
    let driver = RoundDriver::new(
        Arc::new(TableEmbedder::new(&entries)),
        &EngineConfig::default(),
    );
    let outcome = driver.build(&fragments(&entries)).await.unwrap();

    assert!(outcome.is_converged());
    assert_eq!(outcome.rounds, 2);
    let snapshot = &outcome.snapshot;
    assert_eq!(snapshot.round_mapping[&1].len(), 2);

    let mut groups: Vec<Vec<usize>> = snapshot.round_mapping[&1]
        .iter()
        .map(|&i| {
            let node = snapshot.node(i).unwrap();
            assert_eq!(node.role, NodeRole::Internal);
            assert_eq!(node.children.len(), 3);
            node.original_leaf_indices.clone()
        })
        .collect();
    groups.sort();
    assert_eq!(groups, vec![vec![0, 1, 2], vec![3, 4, 5]]);

    let roots = snapshot.roots();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].role, NodeRole::Root);
    assert_eq!(roots[0].children, snapshot.round_mapping[&1]);
    assert_eq!(roots[0].original_leaf_indices, vec![0, 1, 2, 3, 4, 5]);
    assert!(validate_snapshot(snapshot).is_empty());
}

#[tokio::test]
async fn test_three_groups_converge() {
    let entries = three_groups();
    let driver = RoundDriver::new(
        Arc::new(TableEmbedder::new(&entries)),
        &EngineConfig::default(),
    );
    let outcome = driver.build(&fragments(&entries)).await.unwrap();

    assert!(outcome.is_converged());
    assert_eq!(outcome.snapshot.round_mapping[&1].len(), 3);
    assert_partition(&outcome.snapshot);
    assert!(validate_snapshot(&outcome.snapshot).is_empty());
}

#[tokio::test]
async fn test_safety_limit_returns_multi_root_tree() {
    let entries = three_groups();
    let mut config = EngineConfig::default();
    config.driver.max_rounds = 1;
    let driver = RoundDriver::new(Arc::new(TableEmbedder::new(&entries)), &config);
    let outcome = driver.build(&fragments(&entries)).await.unwrap();

    assert_eq!(outcome.termination, Termination::SafetyLimit { rounds: 1 });
    assert!(!outcome.is_converged());
    assert_eq!(outcome.rounds, 1);
    assert_eq!(outcome.snapshot.roots().len(), 3);
    assert_partition(&outcome.snapshot);
    assert!(validate_snapshot(&outcome.snapshot).is_empty());
}

#[tokio::test]
async fn test_cancellation_between_rounds() {
    let entries = three_groups();
    let token = CancellationToken::new();
    let mut embedder = TableEmbedder::new(&entries);
    embedder.on_call = Some(token.clone());

    let driver = RoundDriver::new(Arc::new(embedder), &EngineConfig::default())
        .with_cancellation(token);
    let outcome = driver.build(&fragments(&entries)).await.unwrap();

    assert_eq!(outcome.termination, Termination::Cancelled { round: 2 });
    assert_eq!(outcome.rounds, 1);
    assert_partition(&outcome.snapshot);
}

#[tokio::test]
async fn test_missing_embedding_stops_with_leaves_intact() {
    let entries = three_groups();
    let driver = RoundDriver::new(
        Arc::new(TableEmbedder::new(&entries[..6])),
        &EngineConfig::default(),
    );
    let outcome = driver.build(&fragments(&entries)).await.unwrap();

    assert!(matches!(
        outcome.termination,
        Termination::EmbeddingFailure { round: 1, .. }
    ));
    assert_eq!(outcome.snapshot.len(), 12);
    assert_eq!(outcome.snapshot.roots().len(), 12);
    assert!(validate_snapshot(&outcome.snapshot).is_empty());
}

#[tokio::test]
async fn test_clustering_failure_keeps_leaves() {
    let names = ["x", "y", "z"];
    let fragments: Vec<Fragment> = names.iter().map(|n| Fragment::new(*n, *n)).collect();
    let driver = RoundDriver::new(Arc::new(ZeroWidthEmbedder), &EngineConfig::default());
    let outcome = driver.build(&fragments).await.unwrap();

    assert!(matches!(
        outcome.termination,
        Termination::ClusteringFailure { round: 1, .. }
    ));
    assert_eq!(outcome.rounds, 0);
    assert_eq!(outcome.snapshot.len(), 3);
    assert_eq!(outcome.snapshot.roots().len(), 3);
    assert!(validate_snapshot(&outcome.snapshot).is_empty());
}

#[tokio::test]
async fn test_no_valid_k_keeps_leaves() {
    let fragments: Vec<Fragment> = (0..6)
        .map(|i| Fragment::new(format!("p{}", i), format!("k{}", i)))
        .collect();
    let driver = RoundDriver::new(Arc::new(ZeroWidthEmbedder), &EngineConfig::default());
    let outcome = driver.build(&fragments).await.unwrap();

    assert_eq!(outcome.termination, Termination::NoValidK { round: 1 });
    assert_eq!(outcome.rounds, 0);
    assert_eq!(outcome.snapshot.len(), 6);
    assert_partition(&outcome.snapshot);
    assert!(validate_snapshot(&outcome.snapshot).is_empty());
}

#[tokio::test]
async fn test_runs_are_reproducible() {
    let entries: Vec<(String, Vec<f32>)> = (0..30)
        .map(|i| {
            let a = i as f32 * 0.37;
            (format!("t{}", i), vec![a.cos(), a.sin(), (a * 0.5).cos()])
        })
        .collect();
    let borrowed: Vec<(&str, Vec<f32>)> = entries
        .iter()
        .map(|(t, v)| (t.as_str(), v.clone()))
        .collect();

    let mut snapshots = Vec::new();
    for _ in 0..2 {
        let driver = RoundDriver::new(
            Arc::new(TableEmbedder::new(&borrowed)),
            &EngineConfig::default(),
        );
        let outcome = driver.build(&fragments(&borrowed)).await.unwrap();
        assert!(outcome.rounds <= 20);
        assert!(!outcome.snapshot.is_empty());
        assert!(validate_snapshot(&outcome.snapshot).is_empty());
        assert_partition(&outcome.snapshot);
        snapshots.push(outcome.snapshot);
    }
    assert_eq!(snapshots[0], snapshots[1]);
}
