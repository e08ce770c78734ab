//! Native functions exposed to scripts, grouped by subsystem.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::SessionContext;
use crate::engine::NativeFunction;
use crate::error::NativeError;

/// The part of the server a native function is bound into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
  /// Functions available to authentication flow scripts.
  SequenceHandler,
}

#[derive(Default)]
struct RegistryState {
  functions: HashMap<Subsystem, HashMap<String, NativeFunction>>,
  version: u64,
}

/// Thread-safe registry of native functions.
///
/// Clones share the same underlying registry.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
  state: Arc<RwLock<RegistryState>>,
}

impl FunctionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a function, replacing any function already registered under the
  /// same name.
  pub fn register<F>(&self, subsystem: Subsystem, name: impl Into<String>, function: F)
  where
    F: Fn(&mut SessionContext, &[serde_json::Value]) -> Result<serde_json::Value, NativeError>
      + Send
      + Sync
      + 'static,
  {
    self.register_function(subsystem, name, Arc::new(function));
  }

  pub fn register_function(
    &self,
    subsystem: Subsystem,
    name: impl Into<String>,
    function: NativeFunction,
  ) {
    let name = name.into();
    let mut state = self.state.write().unwrap();
    let replaced = state
      .functions
      .entry(subsystem)
      .or_default()
      .insert(name.clone(), function)
      .is_some();
    state.version += 1;
    debug!(?subsystem, function = %name, replaced, "registered native function");
  }

  /// Remove a function. Returns whether it was registered.
  pub fn deregister(&self, subsystem: Subsystem, name: &str) -> bool {
    let mut state = self.state.write().unwrap();
    let removed = state
      .functions
      .get_mut(&subsystem)
      .is_some_and(|functions| functions.remove(name).is_some());
    if removed {
      state.version += 1;
      debug!(?subsystem, function = %name, "deregistered native function");
    }
    removed
  }

  pub fn get(&self, subsystem: Subsystem, name: &str) -> Option<NativeFunction> {
    let state = self.state.read().unwrap();
    state
      .functions
      .get(&subsystem)
      .and_then(|functions| functions.get(name))
      .cloned()
  }

  /// Visit every function of a subsystem. Order is unspecified.
  ///
  /// The visitor runs on a snapshot, so it may itself use the registry.
  pub fn for_each<F>(&self, subsystem: Subsystem, mut visitor: F)
  where
    F: FnMut(&str, &NativeFunction),
  {
    let snapshot: Vec<(String, NativeFunction)> = {
      let state = self.state.read().unwrap();
      state
        .functions
        .get(&subsystem)
        .map(|functions| {
          functions
            .iter()
            .map(|(name, function)| (name.clone(), function.clone()))
            .collect()
        })
        .unwrap_or_default()
    };
    for (name, function) in &snapshot {
      visitor(name, function);
    }
  }

  /// Snapshot of a subsystem's functions sorted by name, ready to bind.
  pub fn bindings(&self, subsystem: Subsystem) -> Vec<(String, NativeFunction)> {
    let mut bindings = Vec::new();
    self.for_each(subsystem, |name, function| {
      bindings.push((name.to_string(), function.clone()));
    });
    bindings.sort_by(|a, b| a.0.cmp(&b.0));
    bindings
  }

  pub fn len(&self, subsystem: Subsystem) -> usize {
    let state = self.state.read().unwrap();
    state.functions.get(&subsystem).map_or(0, HashMap::len)
  }

  /// Incremented by every register and deregister.
  pub fn version(&self) -> u64 {
    self.state.read().unwrap().version
  }
}

impl fmt::Debug for FunctionRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.read().unwrap();
    let mut names: Vec<(&Subsystem, &String)> = state
      .functions
      .iter()
      .flat_map(|(subsystem, functions)| functions.keys().map(move |name| (subsystem, name)))
      .collect();
    names.sort();
    f.debug_struct("FunctionRegistry")
      .field("functions", &names)
      .field("version", &state.version)
      .finish()
  }
}
