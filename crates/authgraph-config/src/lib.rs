//! Authgraph Config
//!
//! This crate contains the serializable flow configuration types for authgraph.
//! A flow definition names the application it belongs to, carries the flow
//! script that drives step selection, and declares the authentication steps the
//! script may refer to by identifier.
//!
//! Configuration can be loaded from:
//! - JSON files (via CLI with `authgraph graph flow.json`)
//! - Any JSON string (e.g. a blob read from a service-provider registry)
//!
//! The sequence builder takes these types, compiles the script, and resolves
//! `executeStep` calls against the step table.

mod error;
mod flow;
mod step;

pub use error::ConfigError;
pub use flow::FlowDef;
pub use step::StepConfig;
