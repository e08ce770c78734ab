use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::evaluator::DecisionEvaluator;

/// Index of a node in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
  pub fn index(self) -> usize {
    self.0
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "n{}", self.0)
  }
}

/// Executes a configured authentication step, then continues to `next`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepNode {
  /// Key into the graph's step table.
  pub step_id: String,
  pub next: Option<NodeId>,
}

/// A labelled branch of a [`DecisionPointNode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
  pub label: String,
  pub destination: NodeId,
}

/// Branches on a statically known set of outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPointNode {
  pub outcomes: Vec<Outcome>,
  pub default_edge: Option<NodeId>,
}

impl DecisionPointNode {
  pub fn outcome(&self, label: &str) -> Option<NodeId> {
    self
      .outcomes
      .iter()
      .find(|o| o.label == label)
      .map(|o| o.destination)
  }
}

/// Branch set discovered from the `on` clauses of an `executeStep` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicDecisionNode {
  /// Event name (`success`, `fail`, ...) to evaluator.
  pub handlers: BTreeMap<String, DecisionEvaluator>,
  pub default_edge: Option<NodeId>,
}

/// Terminal node that ends the flow with an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailNode {
  pub show_error_page: bool,
  pub error_page_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthGraphNode {
  Step(StepNode),
  DecisionPoint(DecisionPointNode),
  DynamicDecision(DynamicDecisionNode),
  Fail(FailNode),
  End,
}

impl AuthGraphNode {
  pub fn step(step_id: impl Into<String>) -> Self {
    Self::Step(StepNode {
      step_id: step_id.into(),
      next: None,
    })
  }

  pub fn kind(&self) -> NodeKind {
    match self {
      Self::Step(_) => NodeKind::Step,
      Self::DecisionPoint(_) => NodeKind::DecisionPoint,
      Self::DynamicDecision(_) => NodeKind::DynamicDecision,
      Self::Fail(_) => NodeKind::Fail,
      Self::End => NodeKind::End,
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, Self::Fail(_) | Self::End)
  }

  /// Outgoing edges in a stable order: outcomes first, default edge last.
  pub fn successors(&self) -> Vec<NodeId> {
    match self {
      Self::Step(step) => step.next.into_iter().collect(),
      Self::DecisionPoint(decision) => decision
        .outcomes
        .iter()
        .map(|o| o.destination)
        .chain(decision.default_edge)
        .collect(),
      Self::DynamicDecision(dynamic) => dynamic.default_edge.into_iter().collect(),
      Self::Fail(_) | Self::End => Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
  Step,
  DecisionPoint,
  DynamicDecision,
  Fail,
  End,
}

impl fmt::Display for NodeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Step => "step",
      Self::DecisionPoint => "decision point",
      Self::DynamicDecision => "dynamic decision",
      Self::Fail => "fail",
      Self::End => "end",
    };
    f.write_str(name)
  }
}
