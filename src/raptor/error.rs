use thiserror::Error;

/// Errors raised by the clustering engine and the tree builder.
///
/// Hitting the round ceiling is not an error; it is reported through
/// [`Termination::SafetyLimit`](crate::raptor::builder::Termination).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No valid cluster count could be evaluated for {n_items} items")]
    NoValidK { n_items: usize },

    #[error("Clustering failed: {0}")]
    ClusteringFailure(String),

    #[error("Cluster member position {position} is out of range for {len} inputs")]
    MemberOutOfRange { position: usize, len: usize },

    #[error("Node {child} already has parent {parent}")]
    AlreadyParented { child: usize, parent: usize },

    #[error("Unknown node index {0}")]
    UnknownNode(usize),
}

pub type TreeResult<T> = Result<T, TreeError>;
