//! Compiled script caching.
//!
//! Flow scripts are compiled once per application and reused for every login.
//! An entry is recompiled when the application's script source changes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::engine::{CompiledScript, ScriptEngine};
use crate::error::ScriptError;

/// Caches compiled flow scripts keyed by application.
#[derive(Debug, Clone)]
pub struct ScriptCache {
  cache: Arc<RwLock<HashMap<String, CompiledScript>>>,
}

impl ScriptCache {
  pub fn new() -> Self {
    Self {
      cache: Arc::new(RwLock::new(HashMap::new())),
    }
  }

  pub fn get(&self, application: &str) -> Option<CompiledScript> {
    let cache = self.cache.read().unwrap();
    cache.get(application).cloned()
  }

  /// Get the compiled script for an application, or compile and cache it.
  pub fn get_or_compile(
    &self,
    engine: &dyn ScriptEngine,
    application: &str,
    source: &str,
  ) -> Result<CompiledScript, ScriptError> {
    // Try read lock first
    {
      let cache = self.cache.read().unwrap();
      if let Some(script) = cache.get(application) {
        if script.source == source {
          return Ok(script.clone());
        }
      }
    }

    let script = engine.compile(application, source)?;
    debug!(application, handle = script.handle.0, "compiled flow script");

    let stale = {
      let mut cache = self.cache.write().unwrap();
      cache.insert(application.to_string(), script.clone())
    };
    if let Some(stale) = stale {
      engine.release_script(&stale);
    }

    Ok(script)
  }

  /// Drop the cached script of one application.
  pub fn invalidate(&self, engine: &dyn ScriptEngine, application: &str) {
    let removed = {
      let mut cache = self.cache.write().unwrap();
      cache.remove(application)
    };
    if let Some(script) = removed {
      engine.release_script(&script);
    }
  }

  pub fn len(&self) -> usize {
    self.cache.read().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Clear the cache.
  pub fn clear(&self) {
    let mut cache = self.cache.write().unwrap();
    cache.clear();
  }
}

impl Default for ScriptCache {
  fn default() -> Self {
    Self::new()
  }
}
