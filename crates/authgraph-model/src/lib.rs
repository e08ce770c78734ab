//! Authgraph Model
//!
//! This crate provides the authentication graph built from a flow script and
//! the algorithms that mutate it while a login is in progress.
//!
//! Nodes live in an arena owned by [`AuthGraph`] and are addressed by
//! [`NodeId`]. Edges are `Option<NodeId>`, so a node with an unset edge is an
//! open leaf that later construction can attach to.
//!
//! ```text
//!   Step(1) ──► DynamicDecision{success} ──► End
//!                        │
//!                        └─ success fires: infuse Step(3)
//!
//!   Step(1) ──► DynamicDecision ──► Step(3) ──► End
//! ```
//!
//! Mutation operations (see [`AuthGraph::attach_to_leaf`],
//! [`AuthGraph::infuse`], [`AuthGraph::clone_node`]) keep a step node from
//! ever being shared between two decision branches.

mod dot;
mod error;
mod evaluator;
mod graph;
mod mutate;
mod node;

pub use error::GraphError;
pub use evaluator::{ClosureHandle, DecisionEvaluator, ScriptClosure};
pub use graph::{AuthGraph, Checkpoint};
pub use node::{
  AuthGraphNode, DecisionPointNode, DynamicDecisionNode, FailNode, NodeId, NodeKind, Outcome,
  StepNode,
};

pub use authgraph_config::StepConfig;
