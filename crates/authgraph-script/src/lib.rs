//! Authgraph Script
//!
//! Engine-agnostic scripting surface for authgraph flows.
//!
//! - [`ScriptEngine`] compiles flow scripts and invokes them, or closures they
//!   captured earlier, with a set of [`Bindings`].
//! - [`DirectiveSink`] receives the `executeStep` and `sendError` calls a
//!   script makes. The graph builder and the dynamic continuation scope are
//!   the two sinks.
//! - [`FunctionRegistry`] holds the native functions exposed to scripts.
//! - [`SessionContext`] is the per-login state a script can read and write.
//! - [`ScriptCache`] keeps compiled scripts per application.

mod cache;
mod context;
mod directive;
mod engine;
mod error;
mod registry;

pub use cache::ScriptCache;
pub use context::{SessionContext, StepHistory};
pub use directive::{DirectiveOutcome, DirectiveSink, ErrorDirective, StepDirective};
pub use engine::{Bindings, CompiledScript, NativeFunction, ScriptEngine, ScriptHandle};
pub use error::{DirectiveError, NativeError, ScriptError};
pub use registry::{FunctionRegistry, Subsystem};
