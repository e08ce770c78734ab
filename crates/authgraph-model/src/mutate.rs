//! Grafting operations on [`AuthGraph`].
//!
//! `attach_to_leaf` extends every open path below a node, `infuse` splices a
//! sub-graph directly after a node while keeping what used to follow it, and
//! `clone_node` copies a step so that each decision branch owns its own.

use std::collections::HashSet;

use tracing::trace;

use crate::error::GraphError;
use crate::graph::AuthGraph;
use crate::node::{AuthGraphNode, NodeId, NodeKind};

impl AuthGraph {
  /// Attach `node` at every open leaf reachable from `base`.
  ///
  /// Step nodes take `node` as their `next` when unset. Decision points take it
  /// as their default edge when unset, and the walk continues into every
  /// outcome. Dynamic decision nodes have their default edge replaced.
  /// Terminal nodes are left alone. Each node is visited once, and `node`
  /// itself is never entered, so reconverging branches cannot produce a cycle.
  pub fn attach_to_leaf(&mut self, base: NodeId, node: NodeId) -> Result<(), GraphError> {
    self.node(node)?;

    let mut pending = vec![base];
    let mut visited = HashSet::new();

    while let Some(current) = pending.pop() {
      if current == node || !visited.insert(current) {
        continue;
      }

      match self.node_mut(current)? {
        AuthGraphNode::Step(step) => match step.next {
          None => {
            trace!(at = %current, attached = %node, "attach to step");
            step.next = Some(node);
          }
          Some(next) => pending.push(next),
        },
        AuthGraphNode::DecisionPoint(decision) => {
          match decision.default_edge {
            None => decision.default_edge = Some(node),
            Some(default) => pending.push(default),
          }
          pending.extend(decision.outcomes.iter().rev().map(|o| o.destination));
        }
        AuthGraphNode::DynamicDecision(dynamic) => {
          trace!(at = %current, attached = %node, "replace dynamic default edge");
          dynamic.default_edge = Some(node);
        }
        AuthGraphNode::Fail(_) | AuthGraphNode::End => {}
      }
    }

    Ok(())
  }

  /// Splice `new_node` directly after `destination`.
  ///
  /// Whatever followed `destination` is attached to the leaves of `new_node`.
  /// A decision point receives one clone of `new_node` per outcome, each
  /// continuing with that outcome's previous destination. Terminal nodes
  /// cannot be infused and the graph is left unchanged.
  pub fn infuse(&mut self, destination: NodeId, new_node: NodeId) -> Result<(), GraphError> {
    self.node(new_node)?;

    let target = self.node(destination)?;
    match target {
      AuthGraphNode::Step(step) => {
        let previous = step.next;
        if let Some(previous) = previous {
          self.attach_to_leaf(new_node, previous)?;
        }
        if let AuthGraphNode::Step(step) = self.node_mut(destination)? {
          step.next = Some(new_node);
        }
      }
      AuthGraphNode::DecisionPoint(decision) => {
        let branches: Vec<NodeId> = decision.outcomes.iter().map(|o| o.destination).collect();
        let kind = self.node(new_node)?.kind();
        if !branches.is_empty() && kind != NodeKind::Step {
          return Err(GraphError::UnsupportedNodeOperation {
            operation: "clone",
            kind,
          });
        }

        let mut clones = Vec::with_capacity(branches.len());
        for previous in branches {
          let clone = self.clone_node(new_node)?;
          self.attach_to_leaf(clone, previous)?;
          clones.push(clone);
        }
        if let AuthGraphNode::DecisionPoint(decision) = self.node_mut(destination)? {
          for (outcome, clone) in decision.outcomes.iter_mut().zip(clones) {
            outcome.destination = clone;
          }
        }
      }
      AuthGraphNode::DynamicDecision(dynamic) => {
        let previous = dynamic.default_edge;
        if let Some(previous) = previous.filter(|p| *p != new_node) {
          self.attach_to_leaf(new_node, previous)?;
        }
        if let AuthGraphNode::DynamicDecision(dynamic) = self.node_mut(destination)? {
          dynamic.default_edge = Some(new_node);
        }
      }
      node @ (AuthGraphNode::Fail(_) | AuthGraphNode::End) => {
        return Err(GraphError::UnsupportedNodeOperation {
          operation: "infuse",
          kind: node.kind(),
        });
      }
    }

    Ok(())
  }

  /// Copy a step node. The copy refers to the same step and has no outgoing
  /// edge.
  pub fn clone_node(&mut self, id: NodeId) -> Result<NodeId, GraphError> {
    let original = self.node(id)?;
    match original {
      AuthGraphNode::Step(step) => {
        let copy = AuthGraphNode::step(step.step_id.clone());
        Ok(self.add_node(copy))
      }
      other => Err(GraphError::UnsupportedNodeOperation {
        operation: "clone",
        kind: other.kind(),
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use authgraph_config::StepConfig;

  use super::*;
  use crate::node::{DecisionPointNode, DynamicDecisionNode, FailNode, Outcome};

  fn graph(ids: &[&str]) -> AuthGraph {
    let steps: BTreeMap<String, StepConfig> = ids
      .iter()
      .map(|id| (id.to_string(), StepConfig::new(*id)))
      .collect();
    AuthGraph::new(steps)
  }

  fn next_of(graph: &AuthGraph, id: NodeId) -> Option<NodeId> {
    match graph.node(id).unwrap() {
      AuthGraphNode::Step(step) => step.next,
      other => panic!("expected step, got {}", other.kind()),
    }
  }

  fn step_id(graph: &AuthGraph, id: NodeId) -> String {
    match graph.node(id).unwrap() {
      AuthGraphNode::Step(step) => step.step_id.clone(),
      other => panic!("expected step, got {}", other.kind()),
    }
  }

  #[test]
  fn test_attach_follows_step_chain() {
    let mut g = graph(&["1", "2", "3"]);
    let a = g.add_step_node("1").unwrap();
    let b = g.add_step_node("2").unwrap();
    let c = g.add_step_node("3").unwrap();

    g.attach_to_leaf(a, b).unwrap();
    g.attach_to_leaf(a, c).unwrap();

    assert_eq!(next_of(&g, a), Some(b));
    assert_eq!(next_of(&g, b), Some(c));
    assert_eq!(next_of(&g, c), None);
  }

  #[test]
  fn test_attach_to_terminal_is_noop() {
    let mut g = graph(&["1"]);
    let step = g.add_step_node("1").unwrap();
    let fail = g.add_node(AuthGraphNode::Fail(FailNode::default()));
    let end = g.add_node(AuthGraphNode::End);
    let before = g.clone();

    g.attach_to_leaf(fail, step).unwrap();
    g.attach_to_leaf(end, step).unwrap();

    assert_eq!(g.node(fail).unwrap(), before.node(fail).unwrap());
    assert_eq!(g.node(end).unwrap(), before.node(end).unwrap());
    assert_eq!(next_of(&g, step), None);
  }

  #[test]
  fn test_attach_through_decision_point() {
    let mut g = graph(&["1", "2", "3"]);
    let left = g.add_step_node("1").unwrap();
    let right = g.add_step_node("2").unwrap();
    let decision = g.add_node(AuthGraphNode::DecisionPoint(DecisionPointNode {
      outcomes: vec![
        Outcome {
          label: "acr1".into(),
          destination: left,
        },
        Outcome {
          label: "acr2".into(),
          destination: right,
        },
      ],
      default_edge: None,
    }));
    let end = g.add_node(AuthGraphNode::End);

    g.attach_to_leaf(decision, end).unwrap();

    assert_eq!(next_of(&g, left), Some(end));
    assert_eq!(next_of(&g, right), Some(end));
    match g.node(decision).unwrap() {
      AuthGraphNode::DecisionPoint(d) => assert_eq!(d.default_edge, Some(end)),
      other => panic!("unexpected {}", other.kind()),
    }
  }

  #[test]
  fn test_attach_reconverging_branches_no_self_loop() {
    // Both outcomes lead to the same step; attaching must extend it once and
    // never point it at itself.
    let mut g = graph(&["1", "2"]);
    let shared = g.add_step_node("1").unwrap();
    let decision = g.add_node(AuthGraphNode::DecisionPoint(DecisionPointNode {
      outcomes: vec![
        Outcome {
          label: "a".into(),
          destination: shared,
        },
        Outcome {
          label: "b".into(),
          destination: shared,
        },
      ],
      default_edge: Some(shared),
    }));
    let tail = g.add_step_node("2").unwrap();

    g.attach_to_leaf(decision, tail).unwrap();
    g.attach_to_leaf(decision, tail).unwrap();

    assert_eq!(next_of(&g, shared), Some(tail));
    assert_eq!(next_of(&g, tail), None);
  }

  #[test]
  fn test_attach_overwrites_dynamic_default() {
    let mut g = graph(&["1"]);
    let end = g.add_node(AuthGraphNode::End);
    let dynamic = g.add_node(AuthGraphNode::DynamicDecision(DynamicDecisionNode {
      handlers: BTreeMap::new(),
      default_edge: Some(end),
    }));
    let step = g.add_step_node("1").unwrap();

    g.attach_to_leaf(dynamic, step).unwrap();

    match g.node(dynamic).unwrap() {
      AuthGraphNode::DynamicDecision(d) => assert_eq!(d.default_edge, Some(step)),
      other => panic!("unexpected {}", other.kind()),
    }
  }

  #[test]
  fn test_attach_unknown_node() {
    let mut g = graph(&["1"]);
    let step = g.add_step_node("1").unwrap();
    let err = g.attach_to_leaf(step, NodeId(42)).unwrap_err();
    assert_eq!(err, GraphError::NodeNotFound(NodeId(42)));
  }

  #[test]
  fn test_infuse_step_preserves_continuation() {
    let mut g = graph(&["1", "2", "3"]);
    let a = g.add_step_node("1").unwrap();
    let c = g.add_step_node("3").unwrap();
    g.attach_to_leaf(a, c).unwrap();
    let b = g.add_step_node("2").unwrap();

    g.infuse(a, b).unwrap();

    assert_eq!(next_of(&g, a), Some(b));
    assert_eq!(next_of(&g, b), Some(c));
  }

  #[test]
  fn test_infuse_decision_point_clones_per_branch() {
    let mut g = graph(&["1", "2", "3", "x"]);
    let b1 = g.add_step_node("1").unwrap();
    let b2 = g.add_step_node("2").unwrap();
    let b3 = g.add_step_node("3").unwrap();
    let decision = g.add_node(AuthGraphNode::DecisionPoint(DecisionPointNode {
      outcomes: ["a", "b", "c"]
        .iter()
        .zip([b1, b2, b3])
        .map(|(label, destination)| Outcome {
          label: label.to_string(),
          destination,
        })
        .collect(),
      default_edge: None,
    }));
    let x = g.add_step_node("x").unwrap();

    g.infuse(decision, x).unwrap();

    let AuthGraphNode::DecisionPoint(d) = g.node(decision).unwrap().clone() else {
      panic!("expected decision point");
    };
    let clones: Vec<NodeId> = d.outcomes.iter().map(|o| o.destination).collect();
    assert_eq!(clones.len(), 3);
    assert!(!clones.contains(&x));
    assert_ne!(clones[0], clones[1]);
    assert_ne!(clones[1], clones[2]);
    for (clone, previous) in clones.iter().zip([b1, b2, b3]) {
      assert_eq!(step_id(&g, *clone), "x");
      assert_eq!(next_of(&g, *clone), Some(previous));
    }
  }

  #[test]
  fn test_infuse_dynamic_keeps_previous_default() {
    let mut g = graph(&["1", "3"]);
    let end = g.add_node(AuthGraphNode::End);
    let dynamic = g.add_node(AuthGraphNode::DynamicDecision(DynamicDecisionNode {
      handlers: BTreeMap::new(),
      default_edge: Some(end),
    }));
    let b = g.add_step_node("3").unwrap();

    g.infuse(dynamic, b).unwrap();

    match g.node(dynamic).unwrap() {
      AuthGraphNode::DynamicDecision(d) => assert_eq!(d.default_edge, Some(b)),
      other => panic!("unexpected {}", other.kind()),
    }
    assert_eq!(next_of(&g, b), Some(end));
  }

  #[test]
  fn test_infuse_dynamic_twice_chains_extensions() {
    let mut g = graph(&["1", "2"]);
    let end = g.add_node(AuthGraphNode::End);
    let dynamic = g.add_node(AuthGraphNode::DynamicDecision(DynamicDecisionNode {
      handlers: BTreeMap::new(),
      default_edge: Some(end),
    }));
    let first = g.add_step_node("1").unwrap();
    g.infuse(dynamic, first).unwrap();
    let second = g.add_step_node("2").unwrap();
    g.infuse(dynamic, second).unwrap();

    assert_eq!(next_of(&g, second), Some(first));
    assert_eq!(next_of(&g, first), Some(end));
  }

  #[test]
  fn test_infuse_terminal_unsupported() {
    let mut g = graph(&["1"]);
    let end = g.add_node(AuthGraphNode::End);
    let step = g.add_step_node("1").unwrap();
    let before = g.clone();

    let err = g.infuse(end, step).unwrap_err();
    assert_eq!(
      err,
      GraphError::UnsupportedNodeOperation {
        operation: "infuse",
        kind: NodeKind::End,
      }
    );
    assert_eq!(g.len(), before.len());
    assert_eq!(next_of(&g, step), None);
  }

  #[test]
  fn test_clone_step_only() {
    let mut g = graph(&["1"]);
    let step = g.add_step_node("1").unwrap();
    let end = g.add_node(AuthGraphNode::End);
    g.attach_to_leaf(step, end).unwrap();

    let copy = g.clone_node(step).unwrap();
    assert_ne!(copy, step);
    assert_eq!(step_id(&g, copy), "1");
    assert_eq!(next_of(&g, copy), None);

    let err = g.clone_node(end).unwrap_err();
    assert_eq!(
      err,
      GraphError::UnsupportedNodeOperation {
        operation: "clone",
        kind: NodeKind::End,
      }
    );
  }
}
