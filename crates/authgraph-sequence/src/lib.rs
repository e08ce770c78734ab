//! Authgraph Sequence
//!
//! Builds authentication graphs from flow scripts and runs them.
//!
//! ```text
//!   FlowDef ──► GraphBuilderFactory::build_graph ──► AuthGraph (per session)
//!                   │  compile (ScriptCache)
//!                   └─ GraphBuilder: executeStep / sendError
//!
//!   SequenceHandler::start / resume(event)
//!                   │
//!                   └─ DynamicDecision fires a closure
//!                        └─ ContinuationScope: infuse sub-graph or roll back
//! ```

mod acr;
mod builder;
mod continuation;
mod error;
mod evaluate;
mod factory;
mod handler;

#[cfg(test)]
mod testing;

pub use acr::{SELECT_ACR_FROM, register_builtin_functions, select_acr};
pub use builder::GraphBuilder;
pub use continuation::ContinuationScope;
pub use error::FlowError;
pub use evaluate::evaluate_decision;
pub use factory::GraphBuilderFactory;
pub use handler::{FAIL, FALLBACK, FlowStatus, SUCCESS, SequenceHandler};
