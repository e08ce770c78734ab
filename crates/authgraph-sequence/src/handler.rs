//! Live execution of an authentication graph.
//!
//! The handler walks a session's graph from one step to the next. It stops at
//! every step node so the caller can run the step's authenticators, and is
//! resumed with the event the step finished with. Decision points pick a
//! branch by requested ACR; dynamic decisions fire the handler registered for
//! the event, which may extend the graph before the walk continues.

use std::collections::HashSet;

use authgraph_model::{AuthGraph, AuthGraphNode, GraphError, NodeId, StepConfig};
use authgraph_script::{NativeFunction, ScriptEngine, SessionContext};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::acr::select_acr;
use crate::error::FlowError;
use crate::evaluate::evaluate_decision;

/// The step completed successfully.
pub const SUCCESS: &str = "success";
/// The step failed.
pub const FAIL: &str = "fail";
/// The step asked for an alternative path.
pub const FALLBACK: &str = "fallback";

/// Where a session's flow stands after the handler ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlowStatus {
  /// Run this step, then resume with its event.
  ExecuteStep { node: NodeId, step: StepConfig },
  /// The user is authenticated.
  Completed,
  /// The flow ended with an error.
  Failed {
    show_error_page: bool,
    error_page_uri: Option<String>,
  },
}

/// Drives one session through its authentication graph.
pub struct SequenceHandler<'a> {
  engine: &'a dyn ScriptEngine,
  natives: Vec<(String, NativeFunction)>,
}

impl<'a> SequenceHandler<'a> {
  pub fn new(engine: &'a dyn ScriptEngine, natives: Vec<(String, NativeFunction)>) -> Self {
    Self { engine, natives }
  }

  /// Walk from the start node to the first step or terminal.
  #[instrument(name = "start_flow", skip_all, fields(session = %session.session_id()))]
  pub fn start(
    &self,
    graph: &mut AuthGraph,
    session: &mut SessionContext,
  ) -> Result<FlowStatus, FlowError> {
    let start = graph.start_node().ok_or(FlowError::NoStartNode)?;
    session.set_current_node(None);
    self.advance(graph, session, Some(start), None)
  }

  /// Complete the step the session is executing with `event` and walk on.
  #[instrument(name = "resume_flow", skip_all, fields(session = %session.session_id(), event = %event))]
  pub fn resume(
    &self,
    graph: &mut AuthGraph,
    session: &mut SessionContext,
    event: &str,
  ) -> Result<FlowStatus, FlowError> {
    let current = session
      .current_node()
      .ok_or_else(|| FlowError::not_executing("flow has not been started"))?;
    let (step_id, next) = match graph.node(current)? {
      AuthGraphNode::Step(step) => (step.step_id.clone(), step.next),
      other => {
        return Err(FlowError::not_executing(format!(
          "current node {current} is a {} node",
          other.kind()
        )));
      }
    };

    session.record_step(&step_id, event);
    info!(step_id = %step_id, event, "step completed");

    if event == FAIL && !handles(graph, next, FAIL) {
      warn!(step_id = %step_id, "step failed with no fail handler");
      return Ok(FlowStatus::Failed {
        show_error_page: true,
        error_page_uri: None,
      });
    }
    self.advance(graph, session, next, Some(event))
  }

  /// Follow edges from `next`. The event is consumed by the first dynamic
  /// decision reached.
  fn advance(
    &self,
    graph: &mut AuthGraph,
    session: &mut SessionContext,
    mut next: Option<NodeId>,
    mut event: Option<&str>,
  ) -> Result<FlowStatus, FlowError> {
    let mut visited = HashSet::new();

    while let Some(id) = next {
      if !visited.insert(id) {
        return Err(FlowError::Cycle { node: id });
      }

      match graph.node(id)? {
        AuthGraphNode::Step(step) => {
          let config = graph
            .step(&step.step_id)
            .cloned()
            .ok_or_else(|| GraphError::StepNotFound(step.step_id.clone()))?;
          session.set_current_node(Some(id));
          debug!(node = %id, step_id = %config.id, "executing step");
          return Ok(FlowStatus::ExecuteStep { node: id, step: config });
        }
        AuthGraphNode::End => {
          session.set_current_node(Some(id));
          info!("authentication flow completed");
          return Ok(FlowStatus::Completed);
        }
        AuthGraphNode::Fail(fail) => {
          session.set_current_node(Some(id));
          info!(show_error_page = fail.show_error_page, "authentication flow failed");
          return Ok(FlowStatus::Failed {
            show_error_page: fail.show_error_page,
            error_page_uri: fail.error_page_uri.clone(),
          });
        }
        AuthGraphNode::DecisionPoint(decision) => {
          let labels: Vec<&str> = decision.outcomes.iter().map(|o| o.label.as_str()).collect();
          next = match select_acr(session.requested_acr(), &labels) {
            Some(label) => {
              debug!(node = %id, outcome = %label, "decision by requested acr");
              decision.outcome(&label)
            }
            None => decision.default_edge,
          };
        }
        AuthGraphNode::DynamicDecision(dynamic) => {
          let handler = event
            .take()
            .and_then(|event| dynamic.handlers.get(event))
            .cloned();
          session.set_current_node(Some(id));

          if let Some(evaluator) = handler {
            if let Some(label) =
              evaluate_decision(self.engine, &self.natives, graph, &evaluator, session)?
            {
              debug!(node = %id, outcome = %label, "static outcome, following default edge");
            }
          }

          next = match graph.node(id)? {
            AuthGraphNode::DynamicDecision(dynamic) => dynamic.default_edge,
            _ => None,
          };
        }
      }
    }

    info!("graph exhausted, treating flow as completed");
    Ok(FlowStatus::Completed)
  }
}

/// Whether `node` is a dynamic decision with a handler for `event`.
fn handles(graph: &AuthGraph, node: Option<NodeId>, event: &str) -> bool {
  let Some(node) = node else {
    return false;
  };
  matches!(
    graph.node(node),
    Ok(AuthGraphNode::DynamicDecision(dynamic)) if dynamic.handlers.contains_key(event)
  )
}
