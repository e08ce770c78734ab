//! Static construction pass.
//!
//! A [`GraphBuilder`] runs a flow script once. Every `executeStep` appends a
//! step at the builder's cursor, every `sendError` attaches a fail node, and
//! `on` clauses produce a dynamic decision node after their step. `build()`
//! closes the last open path with an end node.

use std::collections::BTreeMap;

use authgraph_model::{
  AuthGraph, AuthGraphNode, DecisionEvaluator, DynamicDecisionNode, FailNode, GraphError, NodeId,
  StepConfig,
};
use authgraph_script::{
  Bindings, CompiledScript, DirectiveError, DirectiveOutcome, DirectiveSink, ErrorDirective,
  NativeFunction, ScriptEngine, SessionContext, StepDirective,
};
use tracing::{debug, info, instrument, warn};

use crate::error::FlowError;

/// Builds the initial authentication graph from a flow script.
///
/// Single use: run one script with [`create_with`](Self::create_with), then
/// consume the builder with [`build`](Self::build).
pub struct GraphBuilder<'a> {
  engine: &'a dyn ScriptEngine,
  natives: Vec<(String, NativeFunction)>,
  graph: AuthGraph,
  cursor: Option<NodeId>,
  warnings: Vec<FlowError>,
}

impl<'a> GraphBuilder<'a> {
  pub fn new(
    engine: &'a dyn ScriptEngine,
    natives: Vec<(String, NativeFunction)>,
    steps: BTreeMap<String, StepConfig>,
  ) -> Self {
    Self {
      engine,
      natives,
      graph: AuthGraph::new(steps),
      cursor: None,
      warnings: Vec::new(),
    }
  }

  /// Run the script's top-level flow function against this builder.
  ///
  /// Compile and evaluation errors abort construction.
  #[instrument(
    name = "build_graph",
    skip_all,
    fields(script = %script.name, session = %session.session_id())
  )]
  pub fn create_with(
    mut self,
    script: &CompiledScript,
    session: &mut SessionContext,
  ) -> Result<Self, FlowError> {
    let engine = self.engine;
    let natives = std::mem::take(&mut self.natives);
    let result = engine.invoke(
      script,
      Bindings {
        directives: &mut self,
        natives: &natives,
      },
      session,
    );
    self.natives = natives;

    if let Err(e) = result {
      warn!(error = %e, "flow script failed, no graph built");
      self.release_closures();
      return Err(e.into());
    }

    info!(
      nodes = self.graph.len(),
      unresolved = self.warnings.len(),
      "flow script evaluated"
    );
    Ok(self)
  }

  /// Problems that did not abort construction, such as unresolved step ids.
  pub fn warnings(&self) -> &[FlowError] {
    &self.warnings
  }

  pub fn graph(&self) -> &AuthGraph {
    &self.graph
  }

  /// Close the open path with an end node and return the graph.
  pub fn build(mut self) -> Result<AuthGraph, FlowError> {
    if let Some(cursor) = self.cursor {
      if !matches!(self.graph.node(cursor)?, AuthGraphNode::End) {
        let end = self.graph.add_node(AuthGraphNode::End);
        self.graph.attach_to_leaf(cursor, end)?;
      }
    }
    debug!(nodes = self.graph.len(), "graph built");
    Ok(self.graph)
  }

  fn append(&mut self, node: NodeId) -> Result<(), GraphError> {
    match self.cursor {
      None => self.graph.set_start_node(node)?,
      Some(cursor) => self.graph.attach_to_leaf(cursor, node)?,
    }
    self.cursor = Some(node);
    Ok(())
  }

  fn release_closures(&self) {
    for handle in self.graph.closure_handles() {
      self.engine.release_closure(handle);
    }
  }
}

impl DirectiveSink for GraphBuilder<'_> {
  fn execute_step(&mut self, directive: StepDirective) -> Result<DirectiveOutcome, DirectiveError> {
    let step = match self.graph.add_step_node(&directive.id) {
      Ok(step) => step,
      Err(GraphError::StepNotFound(step_id)) => {
        warn!(step_id = %step_id, "executeStep references an unknown step, ignoring");
        self
          .warnings
          .push(FlowError::UnresolvedStepReference { step_id });
        return Ok(DirectiveOutcome::Ignored);
      }
      Err(e) => return Err(e.into()),
    };
    self.append(step)?;
    debug!(step_id = %directive.id, node = %step, "step added");

    if let Some(decision) = dynamic_decision(directive.on) {
      let decision = self.graph.add_node(decision);
      self.graph.attach_to_leaf(step, decision)?;
      self.cursor = Some(decision);
    }
    Ok(DirectiveOutcome::Applied)
  }

  fn send_error(&mut self, directive: ErrorDirective) -> Result<DirectiveOutcome, DirectiveError> {
    let fail = self.graph.add_node(fail_node(directive));
    match self.cursor {
      None => self.graph.set_start_node(fail)?,
      Some(cursor) => self.graph.attach_to_leaf(cursor, fail)?,
    }
    debug!(node = %fail, "fail node added");
    Ok(DirectiveOutcome::Applied)
  }
}

/// Dynamic decision node for the `on` clauses of a step, if there are any.
pub(crate) fn dynamic_decision(on: Vec<(String, DecisionEvaluator)>) -> Option<AuthGraphNode> {
  if on.is_empty() {
    return None;
  }
  Some(AuthGraphNode::DynamicDecision(DynamicDecisionNode {
    handlers: on.into_iter().collect(),
    default_edge: None,
  }))
}

pub(crate) fn fail_node(directive: ErrorDirective) -> AuthGraphNode {
  let defaults = FailNode::default();
  AuthGraphNode::Fail(FailNode {
    show_error_page: directive
      .show_error_page
      .unwrap_or(defaults.show_error_page),
    error_page_uri: directive.page_uri.or(defaults.error_page_uri),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{FakeEngine, steps};

  fn evaluate<'e>(engine: &'e FakeEngine, source: &str, ids: &[&str]) -> GraphBuilder<'e> {
    let script = engine.compile("test", source).unwrap();
    let mut session = SessionContext::new("app");
    GraphBuilder::new(engine, Vec::new(), steps(ids))
      .create_with(&script, &mut session)
      .unwrap()
  }

  fn kinds(graph: &AuthGraph) -> Vec<String> {
    graph
      .walk(|_, _| None)
      .into_iter()
      .map(|id| match graph.node(id).unwrap() {
        AuthGraphNode::Step(step) => format!("step:{}", step.step_id),
        other => other.kind().to_string(),
      })
      .collect()
  }

  #[test]
  fn test_single_step_gets_end() {
    let engine = FakeEngine::new();
    engine.script("one", |sink, _| {
      sink.execute_step(StepDirective::new("X"))?;
      Ok(())
    });

    let graph = evaluate(&engine, "one", &["X"]).build().unwrap();
    assert_eq!(kinds(&graph), vec!["step:X", "end"]);
  }

  #[test]
  fn test_steps_chain_in_order() {
    let engine = FakeEngine::new();
    engine.script("chain", |sink, _| {
      sink.execute_step(StepDirective::new("1"))?;
      sink.execute_step(StepDirective::new("2"))?;
      sink.execute_step(StepDirective::new("3"))?;
      Ok(())
    });

    let graph = evaluate(&engine, "chain", &["1", "2", "3"]).build().unwrap();
    assert_eq!(kinds(&graph), vec!["step:1", "step:2", "step:3", "end"]);
  }

  #[test]
  fn test_unresolved_step_ignored() {
    let engine = FakeEngine::new();
    engine.script("missing", |sink, _| {
      sink.execute_step(StepDirective::new("1"))?;
      let outcome = sink.execute_step(StepDirective::new("nope"))?;
      assert_eq!(outcome, DirectiveOutcome::Ignored);
      sink.execute_step(StepDirective::new("2"))?;
      Ok(())
    });

    let builder = evaluate(&engine, "missing", &["1", "2"]);
    assert_eq!(builder.warnings().len(), 1);
    assert!(matches!(
      &builder.warnings()[0],
      FlowError::UnresolvedStepReference { step_id } if step_id == "nope"
    ));
    let graph = builder.build().unwrap();
    assert_eq!(kinds(&graph), vec!["step:1", "step:2", "end"]);
  }

  #[test]
  fn test_on_clause_adds_dynamic_decision() {
    let engine = FakeEngine::new();
    let success = engine.closure(|sink, _| {
      sink.execute_step(StepDirective::new("3"))?;
      Ok(())
    });
    engine.script("on", move |sink, _| {
      sink.execute_step(StepDirective::new("1").on("success", success.clone()))?;
      Ok(())
    });

    let graph = evaluate(&engine, "on", &["1", "3"]).build().unwrap();
    assert_eq!(kinds(&graph), vec!["step:1", "dynamic decision", "end"]);
    assert_eq!(graph.closure_handles().len(), 1);
  }

  #[test]
  fn test_send_error_attaches_fail() {
    let engine = FakeEngine::new();
    engine.script("deny", |sink, _| {
      sink.execute_step(StepDirective::new("1"))?;
      sink.send_error(ErrorDirective {
        show_error_page: Some(true),
        page_uri: Some("/denied".into()),
      })?;
      Ok(())
    });

    let graph = evaluate(&engine, "deny", &["1"]).build().unwrap();
    assert_eq!(kinds(&graph), vec!["step:1", "fail"]);
    let path = graph.walk(|_, _| None);
    match graph.node(path[1]).unwrap() {
      AuthGraphNode::Fail(fail) => {
        assert!(fail.show_error_page);
        assert_eq!(fail.error_page_uri.as_deref(), Some("/denied"));
      }
      other => panic!("unexpected {}", other.kind()),
    }
  }

  #[test]
  fn test_send_error_first_becomes_start() {
    let engine = FakeEngine::new();
    engine.script("deny", |sink, _| {
      sink.send_error(ErrorDirective::default())?;
      Ok(())
    });

    let graph = evaluate(&engine, "deny", &[]).build().unwrap();
    assert_eq!(kinds(&graph), vec!["fail"]);
    assert_eq!(graph.len(), 1);
  }

  #[test]
  fn test_empty_script_builds_empty_graph() {
    let engine = FakeEngine::new();
    engine.script("noop", |_, _| Ok(()));

    let graph = evaluate(&engine, "noop", &["1"]).build().unwrap();
    assert!(graph.start_node().is_none());
    assert!(graph.is_empty());
  }

  #[test]
  fn test_script_error_aborts_and_releases_closures() {
    let engine = FakeEngine::new();
    let success = engine.closure(|_, _| Ok(()));
    engine.script("boom", move |sink, _| {
      sink.execute_step(StepDirective::new("1").on("success", success.clone()))?;
      Err(authgraph_script::ScriptError::evaluation("boom"))
    });

    let script = engine.compile("test", "boom").unwrap();
    let mut session = SessionContext::new("app");
    let err = GraphBuilder::new(&engine, Vec::new(), steps(&["1"]))
      .create_with(&script, &mut session)
      .err()
      .unwrap();
    assert!(matches!(err, FlowError::Script(_)));
    assert_eq!(engine.released().len(), 1);
  }

  #[test]
  fn test_compile_error() {
    let engine = FakeEngine::new();
    let err = engine.compile("test", "unknown").unwrap_err();
    assert!(matches!(err, authgraph_script::ScriptError::Compile { .. }));
  }
}
