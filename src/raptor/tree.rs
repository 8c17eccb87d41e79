//! Arena-backed clustering tree.
//!
//! Nodes live in a flat, append-only `Vec` and refer to each other by index.
//! Round 0 holds the leaves (one per input fragment); every later round adds
//! one node per cluster produced in that round.

use super::clustering::ClusterResult;
use super::error::{TreeError, TreeResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

/// One unit of text entering a clustering round: its (summarized) content
/// and the short keyword that labels it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub content: String,
    pub keyword: String,
}

impl Fragment {
    pub fn new(content: impl Into<String>, keyword: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            keyword: keyword.into(),
        }
    }
}

/// Role of a node inside the finished tree
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Original fragment (round 0)
    Leaf,
    /// Cluster formed in a round that produced more than one cluster
    Internal,
    /// Cluster formed in a round that collapsed everything into one
    Root,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf => write!(f, "leaf"),
            Self::Internal => write!(f, "internal"),
            Self::Root => write!(f, "root"),
        }
    }
}

/// Node in the clustering tree
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub index: usize,
    pub parent_index: Option<usize>,
    pub content: String,
    pub keyword: String,
    pub role: NodeRole,
    pub round: usize,
    pub cluster_id: Option<usize>,
    pub children: Vec<usize>,
    /// Round-0 leaves summarized by this node, sorted ascending.
    /// A leaf lists only itself.
    pub original_leaf_indices: Vec<usize>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.role == NodeRole::Leaf
    }
}

/// Round number -> node indices created in that round, in creation order.
pub type RoundMapping = BTreeMap<usize, Vec<usize>>;

/// What to do with cluster members that cannot be attached to a new node
/// (position out of range, or child already owned by another parent).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberPolicy {
    /// Skip the member and log a warning
    #[default]
    Lenient,
    /// Reject the whole round without touching the tree
    Strict,
}

/// Per-round statistics of a tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeStats {
    pub total_nodes: usize,
    pub leaf_count: usize,
    pub max_round: usize,
    /// (round, nodes created in that round)
    pub nodes_per_round: Vec<(usize, usize)>,
    pub root_count: usize,
}

/// Read-only export of a tree, handed to ontology construction.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub nodes: Vec<TreeNode>,
    pub round_mapping: RoundMapping,
}

impl TreeSnapshot {
    pub fn node(&self, index: usize) -> Option<&TreeNode> {
        self.nodes.get(index).filter(|n| n.index == index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Highest round recorded in the round mapping (0 for an empty tree).
    pub fn max_round(&self) -> usize {
        self.round_mapping.keys().next_back().copied().unwrap_or(0)
    }

    pub fn leaf_count(&self) -> usize {
        self.round_mapping.get(&0).map(Vec::len).unwrap_or(0)
    }

    /// Nodes with role `root`. When none exist (the run stopped before a
    /// full collapse) the parentless nodes of the highest round are
    /// returned instead.
    pub fn roots(&self) -> Vec<&TreeNode> {
        let by_role: Vec<&TreeNode> = self
            .nodes
            .iter()
            .filter(|n| n.role == NodeRole::Root)
            .collect();
        if !by_role.is_empty() {
            return by_role;
        }

        let Some(top) = self.round_mapping.get(&self.max_round()) else {
            return Vec::new();
        };
        top.iter()
            .filter_map(|&idx| self.node(idx))
            .filter(|n| n.parent_index.is_none())
            .collect()
    }

    /// Children grouped under their parent index; parentless nodes are
    /// grouped under `None`. Lists keep creation order.
    pub fn children_by_parent(&self) -> BTreeMap<Option<usize>, Vec<usize>> {
        let mut groups: BTreeMap<Option<usize>, Vec<usize>> = BTreeMap::new();
        for node in &self.nodes {
            groups.entry(node.parent_index).or_default().push(node.index);
        }
        groups
    }

    pub fn stats(&self) -> TreeStats {
        TreeStats {
            total_nodes: self.nodes.len(),
            leaf_count: self.leaf_count(),
            max_round: self.max_round(),
            nodes_per_round: self
                .round_mapping
                .iter()
                .map(|(round, indices)| (*round, indices.len()))
                .collect(),
            root_count: self.roots().len(),
        }
    }

    /// Text outline of the tree, newest round first. Only the first five
    /// leaves are listed; children are listed for clusters with at most
    /// five of them.
    pub fn render_outline(&self, max_content_len: usize) -> String {
        let mut out = String::new();

        for (round, indices) in self.round_mapping.iter().rev() {
            if *round == 0 {
                let _ = writeln!(out, "Round 0 - source fragments ({}):", indices.len());
                for node in indices.iter().take(5).filter_map(|&i| self.node(i)) {
                    let _ = writeln!(
                        out,
                        "  [{}] {}",
                        node.index,
                        truncate_chars(&node.content, max_content_len)
                    );
                }
                if indices.len() > 5 {
                    let _ = writeln!(out, "      ... and {} more", indices.len() - 5);
                }
                continue;
            }

            let _ = writeln!(out, "Round {} - clusters ({}):", round, indices.len());
            for node in indices.iter().filter_map(|&i| self.node(i)) {
                let _ = writeln!(
                    out,
                    "  [{}] cluster {} {} ({} children) [{} leaves] {}",
                    node.index,
                    node.cluster_id.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
                    node.keyword,
                    node.children.len(),
                    node.original_leaf_indices.len(),
                    node.role
                );
                let _ = writeln!(
                    out,
                    "      \"{}\"",
                    truncate_chars(&node.content, max_content_len)
                );
                if !node.children.is_empty() && node.children.len() <= 5 {
                    for child in node.children.iter().filter_map(|&c| self.node(c)) {
                        let _ = writeln!(
                            out,
                            "        -> [{}] {}",
                            child.index,
                            truncate_chars(&child.content, 30)
                        );
                    }
                }
            }
        }

        out
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Tree builder for one processing run.
///
/// Owns the node arena and the round mapping. Nodes are appended, never
/// removed; the only mutation of an existing node is its parent link, set
/// by the round that creates the parent.
#[derive(Debug, Clone, Default)]
pub struct ClusteringTree {
    inner: TreeSnapshot,
    policy: MemberPolicy,
}

impl ClusteringTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: MemberPolicy) -> Self {
        Self {
            inner: TreeSnapshot::default(),
            policy,
        }
    }

    pub fn policy(&self) -> MemberPolicy {
        self.policy
    }

    /// Create one leaf per fragment, in input order, recorded as round 0.
    pub fn seed(&mut self, fragments: &[String], keywords: &[String]) -> TreeResult<Vec<usize>> {
        if fragments.len() != keywords.len() {
            return Err(TreeError::InvalidInput(format!(
                "{} fragments but {} keywords",
                fragments.len(),
                keywords.len()
            )));
        }
        let pairs: Vec<Fragment> = fragments
            .iter()
            .zip(keywords)
            .map(|(content, keyword)| Fragment::new(content.clone(), keyword.clone()))
            .collect();
        self.seed_fragments(&pairs)
    }

    /// Same as [`seed`](Self::seed) with already paired content/keyword.
    pub fn seed_fragments(&mut self, fragments: &[Fragment]) -> TreeResult<Vec<usize>> {
        if fragments.is_empty() {
            return Err(TreeError::InvalidInput("no fragments to seed".to_string()));
        }
        if !self.inner.is_empty() {
            return Err(TreeError::InvalidInput("tree is already seeded".to_string()));
        }

        let mut leaf_indices = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let index = self.inner.nodes.len();
            self.inner.nodes.push(TreeNode {
                index,
                parent_index: None,
                content: fragment.content.clone(),
                keyword: fragment.keyword.clone(),
                role: NodeRole::Leaf,
                round: 0,
                cluster_id: None,
                children: Vec::new(),
                original_leaf_indices: vec![index],
            });
            leaf_indices.push(index);
        }
        self.inner.round_mapping.insert(0, leaf_indices.clone());

        tracing::info!("Seeded tree with {} leaves", leaf_indices.len());
        Ok(leaf_indices)
    }

    /// Add one node per cluster result as round `round_number`.
    ///
    /// `input_indices[p]` is the tree index of the item that sat at position
    /// `p` of the list handed to the clusterer. Returns the new indices in
    /// cluster order. Under [`MemberPolicy::Strict`] any unresolvable member
    /// rejects the round and leaves the tree unchanged.
    pub fn commit_round(
        &mut self,
        clusters: &[ClusterResult],
        round_number: usize,
        input_indices: &[usize],
    ) -> TreeResult<Vec<usize>> {
        if clusters.is_empty() {
            return Err(TreeError::InvalidInput(format!(
                "round {} has no clusters",
                round_number
            )));
        }
        if self.inner.is_empty() {
            return Err(TreeError::InvalidInput("tree has not been seeded".to_string()));
        }
        if round_number <= self.inner.max_round() {
            return Err(TreeError::InvalidInput(format!(
                "round {} must come after round {}",
                round_number,
                self.inner.max_round()
            )));
        }
        if let Some(&missing) = input_indices.iter().find(|&&i| i >= self.inner.nodes.len()) {
            return Err(TreeError::UnknownNode(missing));
        }

        let children_per_cluster = self.resolve_members(clusters, input_indices)?;

        let role = if clusters.len() == 1 {
            NodeRole::Root
        } else {
            NodeRole::Internal
        };

        let mut new_indices = Vec::with_capacity(clusters.len());
        for (cluster, children) in clusters.iter().zip(children_per_cluster) {
            let index = self.inner.nodes.len();

            let mut leaves = Vec::new();
            for &child in &children {
                let child_node = &mut self.inner.nodes[child];
                child_node.parent_index = Some(index);
                leaves.extend_from_slice(&child_node.original_leaf_indices);
            }
            leaves.sort_unstable();

            self.inner.nodes.push(TreeNode {
                index,
                parent_index: None,
                content: cluster.content.clone(),
                keyword: cluster.keyword.clone(),
                role,
                round: round_number,
                cluster_id: Some(cluster.cluster_id),
                children,
                original_leaf_indices: leaves,
            });
            new_indices.push(index);
        }

        self.inner.round_mapping.insert(round_number, new_indices.clone());
        tracing::info!(
            "Round {}: added {} {} node(s)",
            round_number,
            new_indices.len(),
            role
        );
        Ok(new_indices)
    }

    /// Map cluster member positions to tree indices, applying the member
    /// policy. Does not mutate the tree.
    fn resolve_members(
        &self,
        clusters: &[ClusterResult],
        input_indices: &[usize],
    ) -> TreeResult<Vec<Vec<usize>>> {
        let first_new = self.inner.nodes.len();
        let mut claimed: HashMap<usize, usize> = HashMap::new();
        let mut resolved = Vec::with_capacity(clusters.len());

        for (offset, cluster) in clusters.iter().enumerate() {
            let planned_parent = first_new + offset;
            let mut children = Vec::with_capacity(cluster.members.len());

            for &position in &cluster.members {
                let Some(&child) = input_indices.get(position) else {
                    let err = TreeError::MemberOutOfRange {
                        position,
                        len: input_indices.len(),
                    };
                    self.reject_or_skip(err)?;
                    continue;
                };

                let existing = self.inner.nodes[child]
                    .parent_index
                    .or_else(|| claimed.get(&child).copied());
                if let Some(parent) = existing {
                    self.reject_or_skip(TreeError::AlreadyParented { child, parent })?;
                    continue;
                }

                claimed.insert(child, planned_parent);
                children.push(child);
            }
            resolved.push(children);
        }

        Ok(resolved)
    }

    fn reject_or_skip(&self, err: TreeError) -> TreeResult<()> {
        match self.policy {
            MemberPolicy::Strict => Err(err),
            MemberPolicy::Lenient => {
                tracing::warn!("Skipping cluster member: {}", err);
                Ok(())
            }
        }
    }

    pub fn roots(&self) -> Vec<&TreeNode> {
        self.inner.roots()
    }

    pub fn node(&self, index: usize) -> Option<&TreeNode> {
        self.inner.node(index)
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.inner.nodes
    }

    pub fn round_mapping(&self) -> &RoundMapping {
        &self.inner.round_mapping
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn max_round(&self) -> usize {
        self.inner.max_round()
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        self.inner.clone()
    }

    /// Hand the tree off, ending this builder's lifetime.
    pub fn into_snapshot(self) -> TreeSnapshot {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(id: usize, members: Vec<usize>, content: &str) -> ClusterResult {
        ClusterResult {
            cluster_id: id,
            representative: members.first().copied().unwrap_or(0),
            members,
            content: content.to_string(),
            keyword: content.to_lowercase(),
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_seed_creates_leaves_in_order() {
        let mut tree = ClusteringTree::new();
        let leaves = tree
            .seed(&strings(&["A", "B", "C"]), &strings(&["a", "b", "c"]))
            .unwrap();

        assert_eq!(leaves, vec![0, 1, 2]);
        assert_eq!(tree.round_mapping().get(&0), Some(&vec![0, 1, 2]));
        let b = tree.node(1).unwrap();
        assert_eq!(b.content, "B");
        assert_eq!(b.keyword, "b");
        assert_eq!(b.role, NodeRole::Leaf);
        assert_eq!(b.round, 0);
        assert_eq!(b.cluster_id, None);
        assert_eq!(b.original_leaf_indices, vec![1]);
    }

    #[test]
    fn test_seed_rejects_mismatched_lengths() {
        let mut tree = ClusteringTree::new();
        let err = tree
            .seed(&strings(&["A", "B"]), &strings(&["a"]))
            .unwrap_err();
        assert!(matches!(err, TreeError::InvalidInput(_)));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_seed_rejects_empty_and_reseed() {
        let mut tree = ClusteringTree::new();
        assert!(tree.seed(&[], &[]).is_err());
        tree.seed(&strings(&["A"]), &strings(&["a"])).unwrap();
        assert!(tree.seed(&strings(&["B"]), &strings(&["b"])).is_err());
    }

    #[test]
    fn test_seeding_is_reproducible() {
        let contents = strings(&["x", "y", "z"]);
        let keywords = strings(&["kx", "ky", "kz"]);
        let mut first = ClusteringTree::new();
        let mut second = ClusteringTree::new();
        first.seed(&contents, &keywords).unwrap();
        second.seed(&contents, &keywords).unwrap();
        assert_eq!(first.snapshot(), second.snapshot());
    }

    #[test]
    fn test_single_cluster_round_creates_root() {
        let mut tree = ClusteringTree::new();
        let leaves = tree
            .seed(&strings(&["A", "B", "C", "D"]), &strings(&["a", "b", "c", "d"]))
            .unwrap();

        let new = tree
            .commit_round(&[cluster(0, vec![0, 1, 2, 3], "A")], 1, &leaves)
            .unwrap();

        assert_eq!(new, vec![4]);
        assert_eq!(tree.len(), 5);
        let root = tree.node(4).unwrap();
        assert_eq!(root.role, NodeRole::Root);
        assert_eq!(root.children, vec![0, 1, 2, 3]);
        assert_eq!(root.original_leaf_indices, vec![0, 1, 2, 3]);
        assert_eq!(root.cluster_id, Some(0));
        for leaf in 0..4 {
            assert_eq!(tree.node(leaf).unwrap().parent_index, Some(4));
        }
        let roots = tree.roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].index, 4);
    }

    #[test]
    fn test_leaf_sets_propagate_across_rounds() {
        let mut tree = ClusteringTree::new();
        let leaves = tree
            .seed(
                &strings(&["a1", "a2", "b1", "b2", "b3"]),
                &strings(&["a", "a", "b", "b", "b"]),
            )
            .unwrap();

        // Positions are relative to the input list, not the tree.
        let round1 = tree
            .commit_round(
                &[cluster(0, vec![2, 4, 3], "b1"), cluster(1, vec![1, 0], "a2")],
                1,
                &leaves,
            )
            .unwrap();
        assert_eq!(round1, vec![5, 6]);
        assert_eq!(tree.node(5).unwrap().role, NodeRole::Internal);
        assert_eq!(tree.node(5).unwrap().children, vec![2, 4, 3]);
        assert_eq!(tree.node(5).unwrap().original_leaf_indices, vec![2, 3, 4]);
        assert_eq!(tree.node(6).unwrap().original_leaf_indices, vec![0, 1]);

        let round2 = tree
            .commit_round(&[cluster(0, vec![1, 0], "a2")], 2, &round1)
            .unwrap();
        let root = tree.node(round2[0]).unwrap();
        assert_eq!(root.children, vec![6, 5]);
        assert_eq!(root.original_leaf_indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(tree.max_round(), 2);
    }

    #[test]
    fn test_lenient_policy_skips_out_of_range_members() {
        let mut tree = ClusteringTree::new();
        let leaves = tree.seed(&strings(&["A", "B"]), &strings(&["a", "b"])).unwrap();

        let new = tree
            .commit_round(&[cluster(0, vec![0, 1, 7], "A")], 1, &leaves)
            .unwrap();
        assert_eq!(tree.node(new[0]).unwrap().children, vec![0, 1]);
    }

    #[test]
    fn test_strict_policy_rejects_round_without_mutation() {
        let mut tree = ClusteringTree::with_policy(MemberPolicy::Strict);
        let leaves = tree.seed(&strings(&["A", "B"]), &strings(&["a", "b"])).unwrap();
        let before = tree.snapshot();

        let err = tree
            .commit_round(&[cluster(0, vec![0, 1, 7], "A")], 1, &leaves)
            .unwrap_err();
        assert_eq!(err, TreeError::MemberOutOfRange { position: 7, len: 2 });
        assert_eq!(tree.snapshot(), before);
    }

    #[test]
    fn test_member_claimed_twice_in_one_round() {
        let mut strict = ClusteringTree::with_policy(MemberPolicy::Strict);
        let leaves = strict
            .seed(&strings(&["A", "B", "C"]), &strings(&["a", "b", "c"]))
            .unwrap();
        let clusters = [cluster(0, vec![0, 1], "A"), cluster(1, vec![1, 2], "C")];
        let err = strict.commit_round(&clusters, 1, &leaves).unwrap_err();
        assert_eq!(err, TreeError::AlreadyParented { child: 1, parent: 3 });

        let mut lenient = ClusteringTree::new();
        let leaves = lenient
            .seed(&strings(&["A", "B", "C"]), &strings(&["a", "b", "c"]))
            .unwrap();
        let new = lenient.commit_round(&clusters, 1, &leaves).unwrap();
        assert_eq!(lenient.node(new[1]).unwrap().children, vec![2]);
        assert_eq!(lenient.node(1).unwrap().parent_index, Some(new[0]));
    }

    #[test]
    fn test_commit_round_rejects_bad_rounds() {
        let mut tree = ClusteringTree::new();
        let leaves = tree.seed(&strings(&["A", "B"]), &strings(&["a", "b"])).unwrap();
        assert!(tree.commit_round(&[], 1, &leaves).is_err());
        assert!(tree
            .commit_round(&[cluster(0, vec![0, 1], "A")], 0, &leaves)
            .is_err());
        assert_eq!(
            tree.commit_round(&[cluster(0, vec![0], "A")], 1, &[42]),
            Err(TreeError::UnknownNode(42))
        );
    }

    #[test]
    fn test_roots_fallback_to_parentless_top_round() {
        let mut tree = ClusteringTree::new();
        let leaves = tree
            .seed(&strings(&["A", "B", "C", "D"]), &strings(&["a", "b", "c", "d"]))
            .unwrap();
        tree.commit_round(
            &[cluster(0, vec![0, 1], "A"), cluster(1, vec![2, 3], "C")],
            1,
            &leaves,
        )
        .unwrap();

        let roots: Vec<usize> = tree.roots().iter().map(|n| n.index).collect();
        assert_eq!(roots, vec![4, 5]);
    }

    #[test]
    fn test_single_leaf_is_its_own_root() {
        let mut tree = ClusteringTree::new();
        tree.seed(&strings(&["only"]), &strings(&["one"])).unwrap();
        let roots = tree.roots();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].original_leaf_indices, vec![0]);
    }

    #[test]
    fn test_children_by_parent_and_stats() {
        let mut tree = ClusteringTree::new();
        let leaves = tree
            .seed(&strings(&["A", "B", "C"]), &strings(&["a", "b", "c"]))
            .unwrap();
        tree.commit_round(&[cluster(0, vec![2, 0, 1], "C")], 1, &leaves)
            .unwrap();
        let snapshot = tree.snapshot();

        let groups = snapshot.children_by_parent();
        assert_eq!(groups.get(&Some(3)), Some(&vec![0, 1, 2]));
        assert_eq!(groups.get(&None), Some(&vec![3]));

        let stats = snapshot.stats();
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.leaf_count, 3);
        assert_eq!(stats.max_round, 1);
        assert_eq!(stats.nodes_per_round, vec![(0, 3), (1, 1)]);
        assert_eq!(stats.root_count, 1);
    }

    #[test]
    fn test_render_outline_truncates() {
        let mut tree = ClusteringTree::new();
        let long = "x".repeat(80);
        let leaves = tree
            .seed(&[long.clone(), "short".to_string()], &strings(&["k1", "k2"]))
            .unwrap();
        let mut top = cluster(0, vec![0, 1], &long);
        top.keyword = "topic".to_string();
        tree.commit_round(&[top], 1, &leaves).unwrap();

        let outline = tree.snapshot().render_outline(10);
        assert!(outline.starts_with("Round 1"));
        assert!(outline.contains("xxxxxxxxxx..."));
        assert!(outline.contains("Round 0 - source fragments (2):"));
        assert!(!outline.contains(&long));
    }
}
