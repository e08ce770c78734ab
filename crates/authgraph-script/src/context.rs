use std::collections::HashMap;

use authgraph_model::NodeId;
use serde::{Deserialize, Serialize};

/// A completed step and the event it finished with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepHistory {
  pub step_id: String,
  pub event: String,
}

/// Per-login state shared between the flow engine and scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
  session_id: String,
  application: String,
  properties: HashMap<String, serde_json::Value>,
  /// Node the flow engine is executing. Dynamic continuation infuses here.
  current_node: Option<NodeId>,
  requested_acr: Vec<String>,
  history: Vec<StepHistory>,
}

impl SessionContext {
  pub fn new(application: impl Into<String>) -> Self {
    Self {
      session_id: uuid::Uuid::new_v4().to_string(),
      application: application.into(),
      properties: HashMap::new(),
      current_node: None,
      requested_acr: Vec::new(),
      history: Vec::new(),
    }
  }

  pub fn with_requested_acr<I, S>(mut self, acr: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.requested_acr = acr.into_iter().map(Into::into).collect();
    self
  }

  pub fn session_id(&self) -> &str {
    &self.session_id
  }

  pub fn application(&self) -> &str {
    &self.application
  }

  pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
    self.properties.get(key)
  }

  pub fn set_property(&mut self, key: impl Into<String>, value: serde_json::Value) {
    self.properties.insert(key.into(), value);
  }

  pub fn current_node(&self) -> Option<NodeId> {
    self.current_node
  }

  pub fn set_current_node(&mut self, node: Option<NodeId>) {
    self.current_node = node;
  }

  /// Requested ACR values in order of preference.
  pub fn requested_acr(&self) -> &[String] {
    &self.requested_acr
  }

  pub fn record_step(&mut self, step_id: impl Into<String>, event: impl Into<String>) {
    self.history.push(StepHistory {
      step_id: step_id.into(),
      event: event.into(),
    });
  }

  pub fn history(&self) -> &[StepHistory] {
    &self.history
  }
}
