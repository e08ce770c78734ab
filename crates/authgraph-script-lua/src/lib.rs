//! Lua script engine for authgraph.
//!
//! Flow scripts are Lua 5.4. A script is either an expression evaluating to
//! the flow function, or a chunk that returns it or defines a global
//! `onLoginRequest`:
//!
//! ```lua
//! function(context)
//!   executeStep({ id = "1", on = {
//!     success = function(context) executeStep({ id = "3" }) end,
//!   }})
//! end
//! ```
//!
//! Every compiled script gets its own global environment over a read-only
//! base of the safe builtins, `string`, `table`, `math`, `utf8` and `Log`.
//! Each invocation binds `executeStep`, `sendError` and the registered native
//! functions into that environment for the duration of that call only. Callables found in `on`
//! tables are kept in the Lua registry and handed to the graph as closure
//! handles, to be re-invoked when their event fires.

mod convert;
mod engine;
mod log;
mod sandbox;

pub use engine::{FLOW_ENTRY, LuaEngineConfig, LuaScriptEngine};
