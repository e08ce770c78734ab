use std::fmt;
use std::sync::Arc;

use authgraph_model::{ClosureHandle, ScriptClosure};

use crate::context::SessionContext;
use crate::directive::DirectiveSink;
use crate::error::{NativeError, ScriptError};

/// A host function callable from scripts.
///
/// Receives the session of the running script and the call arguments as JSON
/// values.
pub type NativeFunction = Arc<
  dyn Fn(&mut SessionContext, &[serde_json::Value]) -> Result<serde_json::Value, NativeError>
    + Send
    + Sync,
>;

/// Engine-issued handle for a compiled script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptHandle(pub u64);

/// A compiled flow script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledScript {
  pub name: String,
  /// Source the script was compiled from, used to detect stale cache entries.
  pub source: String,
  pub handle: ScriptHandle,
}

/// Everything bound into one script invocation.
pub struct Bindings<'a> {
  /// Receives `executeStep` and `sendError`.
  pub directives: &'a mut dyn DirectiveSink,
  /// Native functions bound by name.
  pub natives: &'a [(String, NativeFunction)],
}

impl fmt::Debug for Bindings<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let names: Vec<&str> = self.natives.iter().map(|(name, _)| name.as_str()).collect();
    f.debug_struct("Bindings").field("natives", &names).finish()
  }
}

/// A script runtime able to run flow scripts.
///
/// Invocations are synchronous. Bindings are valid for the duration of a
/// single call only; an engine must not retain them.
pub trait ScriptEngine: Send + Sync {
  /// Compile a flow script.
  fn compile(&self, name: &str, source: &str) -> Result<CompiledScript, ScriptError>;

  /// Run the script's top-level flow function once.
  fn invoke(
    &self,
    script: &CompiledScript,
    bindings: Bindings<'_>,
    session: &mut SessionContext,
  ) -> Result<(), ScriptError>;

  /// Re-invoke a closure captured from an `on` clause.
  fn invoke_closure(
    &self,
    closure: &ScriptClosure,
    bindings: Bindings<'_>,
    session: &mut SessionContext,
  ) -> Result<(), ScriptError>;

  /// Forget a captured closure. Unknown handles are ignored.
  fn release_closure(&self, handle: ClosureHandle);

  /// Forget a compiled script. Unknown handles are ignored.
  fn release_script(&self, _script: &CompiledScript) {}
}
