use std::collections::BTreeMap;

use authgraph_config::StepConfig;
use serde::Serialize;

use crate::error::GraphError;
use crate::evaluator::ClosureHandle;
use crate::node::{AuthGraphNode, DecisionPointNode, NodeId, Outcome};

/// Arena length recorded by [`AuthGraph::checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
  len: usize,
  start: Option<NodeId>,
}

/// An authentication graph for one login session.
///
/// Owns its nodes and the read-only step table used to resolve step ids,
/// including ids first seen during dynamic continuation. A graph is mutated
/// in place as the session progresses, so sessions that start from a shared
/// template must each work on their own clone.
#[derive(Debug, Clone, Serialize)]
pub struct AuthGraph {
  nodes: Vec<AuthGraphNode>,
  start: Option<NodeId>,
  steps: BTreeMap<String, StepConfig>,
}

impl AuthGraph {
  pub fn new(steps: BTreeMap<String, StepConfig>) -> Self {
    Self {
      nodes: Vec::new(),
      start: None,
      steps,
    }
  }

  pub fn start_node(&self) -> Option<NodeId> {
    self.start
  }

  pub fn set_start_node(&mut self, id: NodeId) -> Result<(), GraphError> {
    self.node(id)?;
    self.start = Some(id);
    Ok(())
  }

  pub fn node(&self, id: NodeId) -> Result<&AuthGraphNode, GraphError> {
    self.nodes.get(id.0).ok_or(GraphError::NodeNotFound(id))
  }

  pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut AuthGraphNode, GraphError> {
    self.nodes.get_mut(id.0).ok_or(GraphError::NodeNotFound(id))
  }

  /// Add a node to the arena without connecting it.
  pub fn add_node(&mut self, node: AuthGraphNode) -> NodeId {
    self.nodes.push(node);
    NodeId(self.nodes.len() - 1)
  }

  /// Wrap a configured step into a new, unconnected step node.
  pub fn add_step_node(&mut self, step_id: &str) -> Result<NodeId, GraphError> {
    if !self.steps.contains_key(step_id) {
      return Err(GraphError::StepNotFound(step_id.to_string()));
    }
    Ok(self.add_node(AuthGraphNode::step(step_id)))
  }

  /// Add a decision point branching to existing nodes by outcome label.
  pub fn add_decision_point<I, S>(
    &mut self,
    outcomes: I,
    default_edge: Option<NodeId>,
  ) -> Result<NodeId, GraphError>
  where
    I: IntoIterator<Item = (S, NodeId)>,
    S: Into<String>,
  {
    let mut decision = DecisionPointNode {
      outcomes: Vec::new(),
      default_edge,
    };
    for (label, destination) in outcomes {
      self.node(destination)?;
      decision.outcomes.push(Outcome {
        label: label.into(),
        destination,
      });
    }
    if let Some(default_edge) = default_edge {
      self.node(default_edge)?;
    }
    Ok(self.add_node(AuthGraphNode::DecisionPoint(decision)))
  }

  pub fn step(&self, step_id: &str) -> Option<&StepConfig> {
    self.steps.get(step_id)
  }

  pub fn steps(&self) -> &BTreeMap<String, StepConfig> {
    &self.steps
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &AuthGraphNode)> {
    self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
  }

  pub fn successors(&self, id: NodeId) -> Result<Vec<NodeId>, GraphError> {
    Ok(self.node(id)?.successors())
  }

  /// Record the arena state so nodes added afterwards can be discarded.
  pub fn checkpoint(&self) -> Checkpoint {
    Checkpoint {
      len: self.nodes.len(),
      start: self.start,
    }
  }

  /// Drop every node added since `checkpoint`.
  ///
  /// Only valid while no node older than the checkpoint has been pointed at a
  /// newer one.
  pub fn rollback(&mut self, checkpoint: Checkpoint) {
    if self.nodes.len() > checkpoint.len {
      tracing::debug!(
        discarded = self.nodes.len() - checkpoint.len,
        "rolling back graph nodes"
      );
    }
    self.nodes.truncate(checkpoint.len);
    self.start = checkpoint.start;
  }

  /// Every script closure referenced by a dynamic decision handler.
  pub fn closure_handles(&self) -> Vec<ClosureHandle> {
    self.closure_handles_since(Checkpoint {
      len: 0,
      start: None,
    })
  }

  /// Script closures referenced by nodes added after `checkpoint`.
  pub fn closure_handles_since(&self, checkpoint: Checkpoint) -> Vec<ClosureHandle> {
    self
      .nodes
      .iter()
      .skip(checkpoint.len)
      .filter_map(|node| match node {
        AuthGraphNode::DynamicDecision(dynamic) => Some(dynamic.handlers.values()),
        _ => None,
      })
      .flatten()
      .filter_map(|evaluator| evaluator.handle())
      .collect()
  }

  /// Follow the graph from the start node, asking `choose` which edge to take
  /// at each branching node, and return the visited nodes in order.
  ///
  /// Stops at a terminal, at an unset edge, or when a node repeats.
  pub fn walk<F>(&self, mut choose: F) -> Vec<NodeId>
  where
    F: FnMut(NodeId, &AuthGraphNode) -> Option<NodeId>,
  {
    let mut path = Vec::new();
    let mut current = self.start;
    while let Some(id) = current {
      if path.contains(&id) {
        break;
      }
      path.push(id);
      current = match self.nodes.get(id.0) {
        Some(AuthGraphNode::Step(step)) => step.next,
        Some(node @ AuthGraphNode::DecisionPoint(_)) => choose(id, node),
        Some(AuthGraphNode::DynamicDecision(dynamic)) => dynamic.default_edge,
        Some(AuthGraphNode::Fail(_)) | Some(AuthGraphNode::End) | None => None,
      };
    }
    path
  }

  pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(self)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::evaluator::DecisionEvaluator;
  use crate::node::{DynamicDecisionNode, NodeKind, StepNode};

  fn steps(ids: &[&str]) -> BTreeMap<String, StepConfig> {
    ids
      .iter()
      .map(|id| (id.to_string(), StepConfig::new(*id)))
      .collect()
  }

  #[test]
  fn test_add_step_node_resolves_step_table() {
    let mut graph = AuthGraph::new(steps(&["1"]));
    let id = graph.add_step_node("1").unwrap();
    assert_eq!(graph.node(id).unwrap().kind(), NodeKind::Step);

    let err = graph.add_step_node("9").unwrap_err();
    assert_eq!(err, GraphError::StepNotFound("9".to_string()));
    assert_eq!(graph.len(), 1);
  }

  #[test]
  fn test_set_start_node_requires_existing_node() {
    let mut graph = AuthGraph::new(steps(&[]));
    let err = graph.set_start_node(NodeId(3)).unwrap_err();
    assert_eq!(err, GraphError::NodeNotFound(NodeId(3)));
    assert!(graph.start_node().is_none());
  }

  #[test]
  fn test_rollback_discards_new_nodes() {
    let mut graph = AuthGraph::new(steps(&["1", "2"]));
    let first = graph.add_step_node("1").unwrap();
    graph.set_start_node(first).unwrap();

    let checkpoint = graph.checkpoint();
    graph.add_step_node("2").unwrap();
    graph.add_node(AuthGraphNode::End);
    assert_eq!(graph.len(), 3);

    graph.rollback(checkpoint);
    assert_eq!(graph.len(), 1);
    assert_eq!(graph.start_node(), Some(first));
  }

  #[test]
  fn test_add_decision_point_checks_destinations() {
    let mut graph = AuthGraph::new(steps(&["1", "2"]));
    let one = graph.add_step_node("1").unwrap();
    let two = graph.add_step_node("2").unwrap();

    let decision = graph
      .add_decision_point([("acr1", one), ("acr2", two)], Some(one))
      .unwrap();
    assert_eq!(graph.successors(decision).unwrap(), vec![one, two, one]);

    let err = graph
      .add_decision_point([("acr3", NodeId(42))], None)
      .unwrap_err();
    assert_eq!(err, GraphError::NodeNotFound(NodeId(42)));
    assert_eq!(graph.len(), 3);
  }

  #[test]
  fn test_closure_handles() {
    let mut graph = AuthGraph::new(steps(&[]));
    let mut dynamic = DynamicDecisionNode::default();
    dynamic
      .handlers
      .insert("success".into(), DecisionEvaluator::closure(ClosureHandle(7), "on.success"));
    dynamic
      .handlers
      .insert("fail".into(), DecisionEvaluator::outcome("fail"));
    graph.add_node(AuthGraphNode::DynamicDecision(dynamic));

    assert_eq!(graph.closure_handles(), vec![ClosureHandle(7)]);
  }

  #[test]
  fn test_walk_stops_at_terminal() {
    let mut graph = AuthGraph::new(steps(&["1"]));
    let end = graph.add_node(AuthGraphNode::End);
    let step = graph.add_node(AuthGraphNode::Step(StepNode {
      step_id: "1".into(),
      next: Some(end),
    }));
    graph.set_start_node(step).unwrap();

    assert_eq!(graph.walk(|_, _| None), vec![step, end]);
  }

  #[test]
  fn test_to_json_tags_node_types() {
    let mut graph = AuthGraph::new(steps(&["1"]));
    let step = graph.add_step_node("1").unwrap();
    graph.set_start_node(step).unwrap();

    let json = graph.to_json().unwrap();
    assert_eq!(json["nodes"][0]["type"], "step");
    assert_eq!(json["nodes"][0]["step_id"], "1");
    assert_eq!(json["start"], 0);
  }
}
