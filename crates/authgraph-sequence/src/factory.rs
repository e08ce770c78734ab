use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use authgraph_config::FlowDef;
use authgraph_model::{AuthGraph, DecisionEvaluator, StepConfig};
use authgraph_script::{
  FunctionRegistry, NativeFunction, ScriptCache, ScriptEngine, SessionContext, Subsystem,
};
use tracing::{debug, instrument};

use crate::acr::register_builtin_functions;
use crate::builder::GraphBuilder;
use crate::error::FlowError;
use crate::evaluate::evaluate_decision;
use crate::handler::SequenceHandler;

type Natives = Vec<(String, NativeFunction)>;

/// Entry point for building and running flows.
///
/// Owns the script engine, the native function registry and the compiled
/// script cache, and hands out builders and handlers wired to them.
pub struct GraphBuilderFactory {
  engine: Arc<dyn ScriptEngine>,
  registry: FunctionRegistry,
  cache: ScriptCache,
  /// Bindings resolved at a registry version.
  natives: RwLock<Option<(u64, Natives)>>,
}

impl GraphBuilderFactory {
  /// Create a factory. The built-in natives are registered into `registry`.
  pub fn new(engine: Arc<dyn ScriptEngine>, registry: FunctionRegistry) -> Self {
    Self::with_cache(engine, registry, ScriptCache::new())
  }

  pub fn with_cache(
    engine: Arc<dyn ScriptEngine>,
    registry: FunctionRegistry,
    cache: ScriptCache,
  ) -> Self {
    register_builtin_functions(&registry);
    Self {
      engine,
      registry,
      cache,
      natives: RwLock::new(None),
    }
  }

  pub fn engine(&self) -> &dyn ScriptEngine {
    self.engine.as_ref()
  }

  pub fn registry(&self) -> &FunctionRegistry {
    &self.registry
  }

  pub fn cache(&self) -> &ScriptCache {
    &self.cache
  }

  /// Native functions bound into flow scripts, re-resolved whenever the
  /// registry changes.
  pub fn natives(&self) -> Natives {
    let version = self.registry.version();
    {
      let natives = self.natives.read().unwrap();
      if let Some((resolved, bound)) = natives.as_ref() {
        if *resolved == version {
          return bound.clone();
        }
      }
    }

    let bound = self.registry.bindings(Subsystem::SequenceHandler);
    debug!(version, functions = bound.len(), "resolved native bindings");
    *self.natives.write().unwrap() = Some((version, bound.clone()));
    bound
  }

  pub fn builder(&self, steps: BTreeMap<String, StepConfig>) -> GraphBuilder<'_> {
    GraphBuilder::new(self.engine(), self.natives(), steps)
  }

  /// Build the authentication graph of `flow` for one session.
  #[instrument(name = "build_flow", skip_all, fields(application = %flow.application))]
  pub fn build_graph(
    &self,
    flow: &FlowDef,
    session: &mut SessionContext,
  ) -> Result<AuthGraph, FlowError> {
    let steps = flow.step_table()?;
    let script = self
      .cache
      .get_or_compile(self.engine(), &flow.application, &flow.script)?;
    self.builder(steps).create_with(&script, session)?.build()
  }

  pub fn handler(&self) -> SequenceHandler<'_> {
    SequenceHandler::new(self.engine(), self.natives())
  }

  /// Evaluate a decision against a session's graph.
  pub fn evaluate(
    &self,
    graph: &mut AuthGraph,
    evaluator: &DecisionEvaluator,
    session: &mut SessionContext,
  ) -> Result<Option<String>, FlowError> {
    evaluate_decision(
      self.engine(),
      &self.natives(),
      graph,
      evaluator,
      session,
    )
  }

  /// Release the script closures a finished session's graph holds.
  pub fn release_graph(&self, graph: &AuthGraph) {
    let handles = graph.closure_handles();
    debug!(closures = handles.len(), "releasing graph closures");
    for handle in handles {
      self.engine.release_closure(handle);
    }
  }
}
