use std::fmt;

use serde::{Deserialize, Serialize};

/// Engine-issued handle for a script callable captured during graph
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClosureHandle(pub u64);

impl fmt::Display for ClosureHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "closure#{}", self.0)
  }
}

/// A script callable bound to a dynamic decision event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptClosure {
  pub handle: ClosureHandle,
  /// Human-readable description of where the callable came from.
  pub source: String,
}

/// Decides which outcome a decision node takes.
///
/// A static outcome resolves to its label directly. A script closure is
/// re-invoked when its event fires; the resulting steps are infused into the
/// graph at the executing node instead of producing a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionEvaluator {
  StaticOutcome(String),
  ScriptClosure(ScriptClosure),
}

impl DecisionEvaluator {
  pub fn outcome(label: impl Into<String>) -> Self {
    Self::StaticOutcome(label.into())
  }

  pub fn closure(handle: ClosureHandle, source: impl Into<String>) -> Self {
    Self::ScriptClosure(ScriptClosure {
      handle,
      source: source.into(),
    })
  }

  /// The closure handle, if this evaluator is script backed.
  pub fn handle(&self) -> Option<ClosureHandle> {
    match self {
      Self::StaticOutcome(_) => None,
      Self::ScriptClosure(closure) => Some(closure.handle),
    }
  }
}
