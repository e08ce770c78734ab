//! Scripted engine double for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use authgraph_model::{ClosureHandle, DecisionEvaluator, ScriptClosure, StepConfig};
use authgraph_script::{
  Bindings, CompiledScript, DirectiveSink, ScriptEngine, ScriptError, ScriptHandle, SessionContext,
};

type Program =
  Arc<dyn Fn(&mut dyn DirectiveSink, &mut SessionContext) -> Result<(), ScriptError> + Send + Sync>;

/// Engine whose "scripts" are Rust closures registered by source name.
#[derive(Default)]
pub(crate) struct FakeEngine {
  scripts: Mutex<HashMap<String, Program>>,
  closures: Mutex<HashMap<u64, Program>>,
  released: Mutex<Vec<ClosureHandle>>,
  next: AtomicU64,
}

impl FakeEngine {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn script<F>(&self, source: &str, program: F)
  where
    F: Fn(&mut dyn DirectiveSink, &mut SessionContext) -> Result<(), ScriptError>
      + Send
      + Sync
      + 'static,
  {
    self
      .scripts
      .lock()
      .unwrap()
      .insert(source.to_string(), Arc::new(program));
  }

  pub(crate) fn closure<F>(&self, program: F) -> DecisionEvaluator
  where
    F: Fn(&mut dyn DirectiveSink, &mut SessionContext) -> Result<(), ScriptError>
      + Send
      + Sync
      + 'static,
  {
    let handle = self.next.fetch_add(1, Ordering::SeqCst);
    self
      .closures
      .lock()
      .unwrap()
      .insert(handle, Arc::new(program));
    DecisionEvaluator::closure(ClosureHandle(handle), format!("fake closure {handle}"))
  }

  pub(crate) fn released(&self) -> Vec<ClosureHandle> {
    self.released.lock().unwrap().clone()
  }
}

impl ScriptEngine for FakeEngine {
  fn compile(&self, name: &str, source: &str) -> Result<CompiledScript, ScriptError> {
    if !self.scripts.lock().unwrap().contains_key(source) {
      return Err(ScriptError::compile(name, format!("no program named '{source}'")));
    }
    Ok(CompiledScript {
      name: name.to_string(),
      source: source.to_string(),
      handle: ScriptHandle(self.next.fetch_add(1, Ordering::SeqCst)),
    })
  }

  fn invoke(
    &self,
    script: &CompiledScript,
    bindings: Bindings<'_>,
    session: &mut SessionContext,
  ) -> Result<(), ScriptError> {
    let program = self
      .scripts
      .lock()
      .unwrap()
      .get(&script.source)
      .cloned()
      .ok_or(ScriptError::UnknownHandle {
        handle: script.handle.0,
      })?;
    program(bindings.directives, session)
  }

  fn invoke_closure(
    &self,
    closure: &ScriptClosure,
    bindings: Bindings<'_>,
    session: &mut SessionContext,
  ) -> Result<(), ScriptError> {
    let program = self
      .closures
      .lock()
      .unwrap()
      .get(&closure.handle.0)
      .cloned()
      .ok_or(ScriptError::UnknownHandle {
        handle: closure.handle.0,
      })?;
    program(bindings.directives, session)
  }

  fn release_closure(&self, handle: ClosureHandle) {
    self.closures.lock().unwrap().remove(&handle.0);
    self.released.lock().unwrap().push(handle);
  }
}

pub(crate) fn steps(ids: &[&str]) -> BTreeMap<String, StepConfig> {
  ids
    .iter()
    .map(|id| (id.to_string(), StepConfig::new(*id)))
    .collect()
}
