//! Dynamic continuation.
//!
//! When a script closure bound to a dynamic decision fires, the closure's
//! `executeStep` and `sendError` calls build a detached sub-graph rooted at a
//! dynamic base. On success the base is infused at the node the session is
//! executing; otherwise every node added during the call is discarded.

use authgraph_model::{AuthGraph, Checkpoint, GraphError, NodeId, NodeKind};
use authgraph_script::{
  DirectiveError, DirectiveOutcome, DirectiveSink, ErrorDirective, ScriptEngine, StepDirective,
};
use tracing::{debug, warn};

use crate::builder::{dynamic_decision, fail_node};
use crate::error::FlowError;

/// Call-scoped receiver for directives issued by a re-invoked closure.
///
/// Holds the only mutable borrow of the session's graph for the duration of
/// one closure call. Dropping an uncommitted scope rolls the graph back to
/// the state it had when the scope was opened.
pub struct ContinuationScope<'g> {
  engine: &'g dyn ScriptEngine,
  graph: &'g mut AuthGraph,
  checkpoint: Checkpoint,
  base: Option<NodeId>,
  committed: bool,
}

impl<'g> ContinuationScope<'g> {
  pub fn open(engine: &'g dyn ScriptEngine, graph: &'g mut AuthGraph) -> Self {
    let checkpoint = graph.checkpoint();
    Self {
      engine,
      graph,
      checkpoint,
      base: None,
      committed: false,
    }
  }

  /// Root of the sub-graph built so far.
  pub fn base(&self) -> Option<NodeId> {
    self.base
  }

  pub fn graph(&self) -> &AuthGraph {
    self.graph
  }

  /// Infuse the sub-graph at `executing` and keep it.
  ///
  /// Returns `false`, discarding the sub-graph, when nothing was built or
  /// `executing` is not a dynamic decision node.
  pub fn commit(mut self, executing: Option<NodeId>) -> Result<bool, FlowError> {
    let Some(base) = self.base else {
      return Ok(false);
    };
    let Some(executing) = executing else {
      warn!("no executing node recorded, discarding dynamic sub-graph");
      return Ok(false);
    };

    let kind = self.graph.node(executing)?.kind();
    if kind != NodeKind::DynamicDecision {
      warn!(node = %executing, %kind, "executing node cannot take a dynamic sub-graph");
      return Ok(false);
    }

    self.graph.infuse(executing, base)?;
    self.committed = true;
    debug!(at = %executing, base = %base, "dynamic sub-graph infused");
    Ok(true)
  }

  fn place(&mut self, node: NodeId) -> Result<(), GraphError> {
    match self.base {
      None => self.base = Some(node),
      Some(base) => self.graph.attach_to_leaf(base, node)?,
    }
    Ok(())
  }
}

impl DirectiveSink for ContinuationScope<'_> {
  fn execute_step(&mut self, directive: StepDirective) -> Result<DirectiveOutcome, DirectiveError> {
    let step = match self.graph.add_step_node(&directive.id) {
      Ok(step) => step,
      Err(GraphError::StepNotFound(step_id)) => {
        warn!(step_id = %step_id, "dynamic executeStep references an unknown step, ignoring");
        return Ok(DirectiveOutcome::Ignored);
      }
      Err(e) => return Err(e.into()),
    };
    self.place(step)?;

    if let Some(decision) = dynamic_decision(directive.on) {
      let decision = self.graph.add_node(decision);
      self.graph.attach_to_leaf(step, decision)?;
    }
    Ok(DirectiveOutcome::Applied)
  }

  fn send_error(&mut self, directive: ErrorDirective) -> Result<DirectiveOutcome, DirectiveError> {
    let fail = self.graph.add_node(fail_node(directive));
    self.place(fail)?;
    Ok(DirectiveOutcome::Applied)
  }
}

impl Drop for ContinuationScope<'_> {
  fn drop(&mut self) {
    if self.committed {
      return;
    }
    for handle in self.graph.closure_handles_since(self.checkpoint) {
      self.engine.release_closure(handle);
    }
    self.graph.rollback(self.checkpoint);
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use authgraph_model::{AuthGraphNode, DynamicDecisionNode, StepNode};

  use super::*;
  use crate::testing::{FakeEngine, steps};

  /// Step(1) -> Dynamic -> End, with the dynamic node returned.
  fn flow(ids: &[&str]) -> (AuthGraph, NodeId) {
    let mut graph = AuthGraph::new(steps(ids));
    let step = graph.add_step_node("1").unwrap();
    graph.set_start_node(step).unwrap();
    let dynamic = graph.add_node(AuthGraphNode::DynamicDecision(DynamicDecisionNode {
      handlers: BTreeMap::new(),
      default_edge: None,
    }));
    graph.attach_to_leaf(step, dynamic).unwrap();
    let end = graph.add_node(AuthGraphNode::End);
    graph.attach_to_leaf(step, end).unwrap();
    (graph, dynamic)
  }

  #[test]
  fn test_first_step_seeds_base() {
    let engine = FakeEngine::new();
    let (mut graph, dynamic) = flow(&["1", "3", "4"]);
    let len = graph.len();

    let mut scope = ContinuationScope::open(&engine, &mut graph);
    scope.execute_step(StepDirective::new("3")).unwrap();
    scope.execute_step(StepDirective::new("4")).unwrap();
    let base = scope.base().unwrap();
    assert!(scope.commit(Some(dynamic)).unwrap());

    assert_eq!(graph.len(), len + 2);
    match graph.node(dynamic).unwrap() {
      AuthGraphNode::DynamicDecision(d) => assert_eq!(d.default_edge, Some(base)),
      other => panic!("unexpected {}", other.kind()),
    }
    let path = graph.walk(|_, _| None);
    let ids: Vec<String> = path
      .iter()
      .map(|id| match graph.node(*id).unwrap() {
        AuthGraphNode::Step(StepNode { step_id, .. }) => step_id.clone(),
        other => other.kind().to_string(),
      })
      .collect();
    assert_eq!(ids, vec!["1", "dynamic decision", "3", "4", "end"]);
  }

  #[test]
  fn test_uncommitted_scope_rolls_back() {
    let engine = FakeEngine::new();
    let (mut graph, _) = flow(&["1", "3"]);
    let before = graph.clone();

    {
      let mut scope = ContinuationScope::open(&engine, &mut graph);
      scope.execute_step(StepDirective::new("3")).unwrap();
      scope.send_error(ErrorDirective::default()).unwrap();
    }

    assert_eq!(graph.len(), before.len());
    assert_eq!(graph.to_json().unwrap(), before.to_json().unwrap());
  }

  #[test]
  fn test_rollback_releases_captured_closures() {
    let engine = FakeEngine::new();
    let (mut graph, _) = flow(&["1", "3"]);
    let step = graph.start_node().unwrap();
    let closure = engine.closure(|_, _| Ok(()));
    let handle = closure.handle().unwrap();

    let mut scope = ContinuationScope::open(&engine, &mut graph);
    scope
      .execute_step(StepDirective::new("3").on("success", closure))
      .unwrap();
    // A step node cannot take a dynamic sub-graph.
    assert!(!scope.commit(Some(step)).unwrap());

    assert_eq!(engine.released(), vec![handle]);
  }

  #[test]
  fn test_unknown_step_ignored() {
    let engine = FakeEngine::new();
    let (mut graph, dynamic) = flow(&["1"]);

    let mut scope = ContinuationScope::open(&engine, &mut graph);
    let outcome = scope.execute_step(StepDirective::new("9")).unwrap();
    assert_eq!(outcome, DirectiveOutcome::Ignored);
    assert!(scope.base().is_none());
    assert!(!scope.commit(Some(dynamic)).unwrap());
  }

  #[test]
  fn test_send_error_in_continuation() {
    let engine = FakeEngine::new();
    let (mut graph, dynamic) = flow(&["1"]);

    let mut scope = ContinuationScope::open(&engine, &mut graph);
    scope
      .send_error(ErrorDirective {
        show_error_page: Some(true),
        page_uri: None,
      })
      .unwrap();
    assert!(scope.commit(Some(dynamic)).unwrap());

    let path = graph.walk(|_, _| None);
    let last = *path.last().unwrap();
    assert_eq!(graph.node(last).unwrap().kind(), NodeKind::Fail);
  }
}
