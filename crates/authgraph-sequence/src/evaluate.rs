//! Decision evaluation.

use authgraph_model::{AuthGraph, DecisionEvaluator};
use authgraph_script::{Bindings, NativeFunction, ScriptEngine, SessionContext};
use tracing::{debug, error, instrument};

use crate::continuation::ContinuationScope;
use crate::error::FlowError;

/// Evaluate a decision for the session's executing node.
///
/// A static outcome resolves to its label. A script closure is re-invoked
/// inside a [`ContinuationScope`]; the steps it issues are infused at the
/// executing node and `None` is returned, meaning the caller should follow the
/// node's (possibly new) default edge. If the closure fails the graph is left
/// as it was.
#[instrument(name = "evaluate_decision", skip_all, fields(session = %session.session_id()))]
pub fn evaluate_decision(
  engine: &dyn ScriptEngine,
  natives: &[(String, NativeFunction)],
  graph: &mut AuthGraph,
  evaluator: &DecisionEvaluator,
  session: &mut SessionContext,
) -> Result<Option<String>, FlowError> {
  let closure = match evaluator {
    DecisionEvaluator::StaticOutcome(label) => {
      debug!(outcome = %label, "static outcome");
      return Ok(Some(label.clone()));
    }
    DecisionEvaluator::ScriptClosure(closure) => closure,
  };

  let mut scope = ContinuationScope::open(engine, graph);
  let result = engine.invoke_closure(
    closure,
    Bindings {
      directives: &mut scope,
      natives,
    },
    session,
  );
  if let Err(e) = result {
    error!(closure = %closure.handle, error = %e, "dynamic decision failed, graph unchanged");
    return Err(e.into());
  }

  let infused = scope.commit(session.current_node())?;
  debug!(closure = %closure.handle, infused, "dynamic decision evaluated");
  Ok(None)
}
