//! Flow error types.

use authgraph_config::ConfigError;
use authgraph_model::{GraphError, NodeId};
use authgraph_script::ScriptError;

/// Errors that can occur while building or running an authentication flow.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
  /// The flow script failed to compile or raised an error.
  #[error(transparent)]
  Script(#[from] ScriptError),

  /// A graph mutation failed.
  #[error(transparent)]
  Graph(#[from] GraphError),

  /// The flow configuration is invalid.
  #[error(transparent)]
  Config(#[from] ConfigError),

  /// `executeStep` named a step that is not configured. The call was ignored.
  #[error("unresolved step reference: {step_id}")]
  UnresolvedStepReference { step_id: String },

  /// The graph has no start node to execute.
  #[error("authentication graph has no start node")]
  NoStartNode,

  /// Execution revisited a node without reaching a step or terminal.
  #[error("authentication graph loops at node {node}")]
  Cycle { node: NodeId },

  /// The session is not positioned on a step that can be resumed.
  #[error("session is not executing a step: {message}")]
  NotExecuting { message: String },
}

impl FlowError {
  pub fn not_executing(message: impl Into<String>) -> Self {
    Self::NotExecuting {
      message: message.into(),
    }
  }
}
