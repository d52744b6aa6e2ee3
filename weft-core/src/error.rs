//! Error types for the observable graph.

use crate::graph::NodeId;

/// Boxed error returned by user computations.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Errors raised while propagating changes through the graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A derivation or consumer computation returned an error.
    ///
    /// The failing node stays dirty; the next read retries.
    #[error("computation failed in node {node:?}: {source}")]
    ComputationFailure {
        node: NodeId,
        #[source]
        source: BoxError,
    },

    /// An adapter was disposed while holding no live external subscription.
    #[error("node {0:?} was disposed twice")]
    DoubleDisposal(NodeId),

    /// The addressed node no longer has an arena slot.
    #[error("node {0:?} is not registered")]
    UnknownNode(NodeId),
}

impl GraphError {
    /// The node the error is attributed to.
    pub fn node(&self) -> NodeId {
        match self {
            GraphError::ComputationFailure { node, .. } => *node,
            GraphError::DoubleDisposal(node) | GraphError::UnknownNode(node) => *node,
        }
    }
}

pub type Result<T, E = GraphError> = std::result::Result<T, E>;
