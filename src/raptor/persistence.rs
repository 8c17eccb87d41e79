use super::builder::Termination;
use super::tree::{NodeRole, RoundMapping, TreeNode, TreeSnapshot};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Summary written alongside an exported tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub total_nodes: usize,
    pub rounds: usize,
    pub created_at: DateTime<Utc>,
    /// Number of nodes in the newest round
    pub final_clusters: usize,
    #[serde(default)]
    pub termination: Option<Termination>,
}

/// JSON document written by [`export_json`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeExport {
    pub metadata: ExportMetadata,
    pub round_mapping: RoundMapping,
    pub tree: Vec<TreeNode>,
}

impl TreeExport {
    pub fn new(snapshot: &TreeSnapshot, termination: Option<&Termination>) -> Self {
        let rounds = snapshot.max_round();
        let final_clusters = snapshot
            .round_mapping
            .get(&rounds)
            .map(|indices| indices.len())
            .unwrap_or(0);
        Self {
            metadata: ExportMetadata {
                total_nodes: snapshot.len(),
                rounds,
                created_at: Utc::now(),
                final_clusters,
                termination: termination.cloned(),
            },
            round_mapping: snapshot.round_mapping.clone(),
            tree: snapshot.nodes.clone(),
        }
    }

    pub fn into_snapshot(self) -> TreeSnapshot {
        TreeSnapshot {
            nodes: self.tree,
            round_mapping: self.round_mapping,
        }
    }

    pub fn root_count(&self) -> usize {
        self.tree.iter().filter(|n| n.role == NodeRole::Root).count()
    }
}

/// Write the tree as pretty JSON, creating parent directories as needed.
pub fn export_json(
    snapshot: &TreeSnapshot,
    termination: Option<&Termination>,
    path: &Path,
) -> Result<TreeExport> {
    let export = TreeExport::new(snapshot, termination);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(&export)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Exported {} nodes to {}", export.metadata.total_nodes, path.display());
    Ok(export)
}

pub fn import_json(path: &Path) -> Result<TreeExport> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let export: TreeExport = serde_json::from_str(&data)
        .with_context(|| format!("Invalid tree export in {}", path.display()))?;
    Ok(export)
}

/// Compact binary snapshot
pub fn save_bincode(snapshot: &TreeSnapshot, path: &Path) -> Result<()> {
    let data = bincode::serialize(snapshot)?;
    std::fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn load_bincode(path: &Path) -> Result<TreeSnapshot> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let snapshot: TreeSnapshot = bincode::deserialize(&data)?;
    Ok(snapshot)
}

/// Cache file for the tree built from `input_path`
pub fn cache_path_for(input_path: &str) -> PathBuf {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    input_path.hash(&mut hasher);
    let hash = hasher.finish();

    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ontotree");
    cache_dir.join(format!("tree_{:x}.bin", hash))
}
