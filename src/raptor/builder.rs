//! Round driver: embeds the current representatives, picks k, clusters and
//! commits a new round until a single node remains.

use crate::embedding::Embedder;
use crate::raptor::clustering::{Clusterer, ClustererConfig};
use crate::raptor::error::{TreeError, TreeResult};
use crate::raptor::selector::{Selector, SelectorConfig};
use crate::raptor::tree::{ClusteringTree, Fragment, MemberPolicy, TreeSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

/// Progress information for a tree build
#[derive(Debug, Clone)]
pub struct BuildProgress {
    pub stage: String,
    pub current: usize,
    pub total: usize,
    pub detail: String,
}

/// Driver limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Safety ceiling on clustering rounds
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,

    #[serde(default)]
    pub member_policy: MemberPolicy,
}

fn default_max_rounds() -> usize {
    20
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            member_policy: MemberPolicy::default(),
        }
    }
}

/// Engine configuration: driver, selector and clusterer settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub clusterer: ClustererConfig,
}

/// Observable driver state between rounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Waiting for seed fragments
    Collecting,
    /// Round in progress (or about to start)
    Clustering { round: usize },
    Terminated,
}

/// Why the driver stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Termination {
    /// A single representative remains
    Converged,
    /// Round ceiling reached; the tree may have several roots
    SafetyLimit { rounds: usize },
    NoValidK { round: usize },
    ClusteringFailure { round: usize, reason: String },
    EmbeddingFailure { round: usize, reason: String },
    Cancelled { round: usize },
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged => write!(f, "converged to a single root"),
            Self::SafetyLimit { rounds } => write!(f, "stopped at the safety limit after {} rounds", rounds),
            Self::NoValidK { round } => write!(f, "no valid cluster count in round {}", round),
            Self::ClusteringFailure { round, reason } => {
                write!(f, "clustering failed in round {}: {}", round, reason)
            }
            Self::EmbeddingFailure { round, reason } => {
                write!(f, "embedding failed in round {}: {}", round, reason)
            }
            Self::Cancelled { round } => write!(f, "cancelled before round {}", round),
        }
    }
}

/// Result of a driver run. The snapshot is always returned, even when the
/// run stopped early.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub snapshot: TreeSnapshot,
    pub termination: Termination,
    /// Clustering rounds committed
    pub rounds: usize,
}

impl BuildOutcome {
    pub fn is_converged(&self) -> bool {
        self.termination == Termination::Converged
    }
}

/// A representative carried into the next round
#[derive(Debug, Clone)]
struct Representative {
    index: usize,
    fragment: Fragment,
}

/// Drives clustering rounds over a single tree
pub struct RoundDriver {
    embedder: Arc<dyn Embedder>,
    selector: Selector,
    clusterer: Clusterer,
    max_rounds: usize,
    tree: ClusteringTree,
    representatives: Vec<Representative>,
    state: DriverState,
    progress_tx: Option<Sender<BuildProgress>>,
    cancel: CancellationToken,
}

impl RoundDriver {
    pub fn new(embedder: Arc<dyn Embedder>, config: &EngineConfig) -> Self {
        let clusterer = Clusterer::new(config.clusterer.clone());
        Self {
            embedder,
            selector: Selector::new(config.selector.clone(), clusterer.clone()),
            clusterer,
            max_rounds: config.driver.max_rounds,
            tree: ClusteringTree::with_policy(config.driver.member_policy),
            representatives: Vec::new(),
            state: DriverState::Collecting,
            progress_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, tx: Sender<BuildProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn tree(&self) -> &ClusteringTree {
        &self.tree
    }

    /// Seed the tree with round-0 leaves; they become the first
    /// representatives.
    pub fn seed(&mut self, fragments: &[Fragment]) -> TreeResult<()> {
        if self.state != DriverState::Collecting {
            return Err(TreeError::InvalidInput(
                "driver is no longer collecting fragments".to_string(),
            ));
        }
        let indices = self.tree.seed_fragments(fragments)?;
        self.representatives = indices
            .into_iter()
            .zip(fragments.iter().cloned())
            .map(|(index, fragment)| Representative { index, fragment })
            .collect();
        Ok(())
    }

    /// Run rounds until convergence, the safety ceiling, cancellation or a
    /// failure. Failures stop deepening but keep what was committed.
    pub async fn run(&mut self) -> TreeResult<BuildOutcome> {
        match self.state {
            DriverState::Collecting if !self.tree.is_empty() => {}
            DriverState::Collecting => {
                return Err(TreeError::InvalidInput("driver has not been seeded".to_string()))
            }
            _ => return Err(TreeError::InvalidInput("driver has already run".to_string())),
        }

        let mut round = 1;
        let termination = loop {
            if self.representatives.len() <= 1 {
                break Termination::Converged;
            }
            if round > self.max_rounds {
                break Termination::SafetyLimit { rounds: round - 1 };
            }
            if self.cancel.is_cancelled() {
                break Termination::Cancelled { round };
            }

            self.state = DriverState::Clustering { round };
            if let Err(termination) = self.run_round(round).await {
                break termination;
            }
            round += 1;
        };

        self.state = DriverState::Terminated;
        let rounds = self.tree.max_round();
        match &termination {
            Termination::Converged => tracing::info!(
                "Tree converged after {} round(s), {} nodes",
                rounds,
                self.tree.len()
            ),
            other => tracing::warn!("Tree build stopped: {}", other),
        }
        self.report("Done", rounds, rounds, termination.to_string()).await;

        Ok(BuildOutcome {
            snapshot: self.tree.snapshot(),
            termination,
            rounds,
        })
    }

    /// Seed and run in one call.
    pub async fn build(mut self, fragments: &[Fragment]) -> TreeResult<BuildOutcome> {
        self.seed(fragments)?;
        self.run().await
    }

    async fn run_round(&mut self, round: usize) -> Result<(), Termination> {
        let n = self.representatives.len();
        self.report(
            "Embedding",
            round,
            self.max_rounds,
            format!("Round {}: {} representatives", round, n),
        )
        .await;

        let texts: Vec<String> = self
            .representatives
            .iter()
            .map(|r| r.fragment.content.clone())
            .collect();
        let embeddings = match self.embedder.embed_batch(&texts).await {
            Ok(e) if e.len() == n => e,
            Ok(e) => {
                return Err(Termination::EmbeddingFailure {
                    round,
                    reason: format!("expected {} embeddings, got {}", n, e.len()),
                })
            }
            Err(e) => {
                return Err(Termination::EmbeddingFailure {
                    round,
                    reason: format!("{:#}", e),
                })
            }
        };
        let width = self.embedder.dimension();
        if let Some(bad) = embeddings.iter().find(|e| e.len() != width) {
            return Err(Termination::EmbeddingFailure {
                round,
                reason: format!("expected {}-wide embeddings, got {}", width, bad.len()),
            });
        }

        let items: Vec<Fragment> = self
            .representatives
            .iter()
            .map(|r| r.fragment.clone())
            .collect();
        let k = self.selector.select(&items, &embeddings).map_err(|e| match e {
            TreeError::NoValidK { .. } => Termination::NoValidK { round },
            other => Termination::ClusteringFailure {
                round,
                reason: other.to_string(),
            },
        })?;

        self.report(
            "Clustering",
            round,
            self.max_rounds,
            format!("Round {}: k={} for {} items", round, k, n),
        )
        .await;

        let failure = |e: TreeError| Termination::ClusteringFailure {
            round,
            reason: e.to_string(),
        };
        let clusters = self.clusterer.fit(&items, &embeddings, k).map_err(failure)?;
        let input_indices: Vec<usize> = self.representatives.iter().map(|r| r.index).collect();
        let new_indices = self
            .tree
            .commit_round(&clusters, round, &input_indices)
            .map_err(failure)?;

        self.representatives = new_indices
            .into_iter()
            .zip(clusters)
            .map(|(index, cluster)| Representative {
                index,
                fragment: Fragment::new(cluster.content, cluster.keyword),
            })
            .collect();
        tracing::debug!(
            "Round {} left {} representatives",
            round,
            self.representatives.len()
        );
        Ok(())
    }

    async fn report(&self, stage: &str, current: usize, total: usize, detail: String) {
        if let Some(ref tx) = self.progress_tx {
            let _ = tx
                .send(BuildProgress {
                    stage: stage.to_string(),
                    current,
                    total,
                    detail,
                })
                .await;
        }
    }
}
