//! Error types for graph mutation and propagation.

use thiserror::Error;

use crate::graph::NodeId;

/// Failure raised by a user-supplied calculation.
pub type CalcError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used across the crate.
pub type ChronoResult<T> = Result<T, ChronoError>;

/// Errors surfaced by the graph, the nodes, and the propagation engine.
///
/// Membership errors (`DuplicateNode`, `MissingNode`) are local to the call
/// that raised them. The remaining propagation errors end the pass they were
/// raised in and are returned as its terminal result.
#[derive(Debug, Error)]
pub enum ChronoError {
    /// The node is already a member of the graph.
    #[error("node {node} is already a member of graph {graph}")]
    DuplicateNode { graph: NodeId, node: NodeId },

    /// The node is not a member of the graph.
    #[error("node {node} is not a member of graph {graph}")]
    MissingNode { graph: NodeId, node: NodeId },

    /// The dependency graph contains a cycle. Reported before any
    /// calculation of the pass runs.
    #[error("dependency cycle detected between calculation nodes {nodes:?}")]
    CycleDetected { nodes: Vec<NodeId> },

    /// A calculation function failed.
    #[error("calculation {node} ({label}) failed with inputs {inputs}: {source}")]
    Calculation {
        node: NodeId,
        label: String,
        inputs: serde_json::Value,
        #[source]
        source: CalcError,
    },

    /// The effect resolver declined an effect requested by a calculation.
    #[error("effect `{kind}` requested by {node} was rejected: {reason}")]
    EffectRejected {
        node: NodeId,
        kind: String,
        reason: String,
    },

    /// A calculation kept requesting effects past the configured limit.
    #[error("calculation {node} requested more than {limit} effects in one pass")]
    EffectLimitExceeded { node: NodeId, limit: usize },

    /// The caller gave up on a pass before it finished.
    #[error("propagation pass abandoned")]
    PassAbandoned,

    /// The handle does not address a node of this graph.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// A membership operation targeted a node that is not a graph.
    #[error("node {0} is not a graph")]
    NotAGraph(NodeId),

    /// The node was run as a calculation but is not one.
    #[error("node {0} is not a calculation")]
    NotAMutation(NodeId),

    /// The node has no readable payload (calculation and graph nodes).
    #[error("node {0} is not readable")]
    NotReadable(NodeId),

    /// The node cannot be written (calculation and graph nodes).
    #[error("node {0} is not writable")]
    NotWritable(NodeId),

    /// The node keeps no history to read back from (atoms, graphs,
    /// calculations).
    #[error("node {0} is not versioned")]
    NotVersioned(NodeId),

    /// The node is immutable and already holds a value.
    #[error("node {0} is immutable")]
    ImmutableNode(NodeId),

    /// A freestanding immutable cell already holds a value.
    #[error("immutable value is already set")]
    AlreadySet,

    /// A freestanding cell without the writable capability was written.
    #[error("value cell is read-only")]
    ReadOnly,

    /// Configuration could not be parsed or failed validation.
    #[error("invalid propagation config: {0}")]
    InvalidConfig(String),
}

impl ChronoError {
    /// Whether this error aborted a propagation pass (as opposed to a local
    /// membership or addressing error).
    pub fn is_pass_failure(&self) -> bool {
        matches!(
            self,
            ChronoError::CycleDetected { .. }
                | ChronoError::Calculation { .. }
                | ChronoError::EffectRejected { .. }
                | ChronoError::EffectLimitExceeded { .. }
                | ChronoError::PassAbandoned
        )
    }
}
