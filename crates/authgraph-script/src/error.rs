//! Script error types.

use authgraph_model::GraphError;

/// Errors raised while compiling or running a flow script.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
  /// The script did not compile. No graph can be built from it.
  #[error("failed to compile script '{name}': {message}")]
  Compile { name: String, message: String },

  /// The script, or a closure it captured, raised an error while running.
  #[error("script evaluation failed: {message}")]
  Evaluation { message: String },

  /// A script or closure handle is not known to the engine.
  #[error("unknown script handle: {handle}")]
  UnknownHandle { handle: u64 },

  /// The engine itself failed (state setup, limits).
  #[error("script engine error: {message}")]
  Engine { message: String },
}

impl ScriptError {
  pub fn compile(name: impl Into<String>, message: impl Into<String>) -> Self {
    Self::Compile {
      name: name.into(),
      message: message.into(),
    }
  }

  pub fn evaluation(message: impl Into<String>) -> Self {
    Self::Evaluation {
      message: message.into(),
    }
  }

  pub fn engine(message: impl Into<String>) -> Self {
    Self::Engine {
      message: message.into(),
    }
  }
}

/// Errors returned by a [`DirectiveSink`](crate::DirectiveSink). They abort
/// the running script.
#[derive(Debug, thiserror::Error)]
pub enum DirectiveError {
  #[error("graph error: {0}")]
  Graph(#[from] GraphError),

  #[error("invalid directive: {message}")]
  Invalid { message: String },
}

/// Errors returned by a native function.
#[derive(Debug, thiserror::Error)]
pub enum NativeError {
  #[error("invalid argument to '{function}': {message}")]
  InvalidArgument { function: String, message: String },

  #[error("native function failed: {message}")]
  Failed { message: String },
}

impl NativeError {
  pub fn invalid_argument(function: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidArgument {
      function: function.into(),
      message: message.into(),
    }
  }
}

impl From<DirectiveError> for ScriptError {
  fn from(err: DirectiveError) -> Self {
    Self::evaluation(err.to_string())
  }
}
