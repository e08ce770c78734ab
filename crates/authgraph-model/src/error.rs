use thiserror::Error;

use crate::node::{NodeId, NodeKind};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
  #[error("node not found: {0}")]
  NodeNotFound(NodeId),

  #[error("step not found: {0}")]
  StepNotFound(String),

  #[error("unsupported node operation: cannot {operation} a {kind} node")]
  UnsupportedNodeOperation {
    operation: &'static str,
    kind: NodeKind,
  },
}
