use serde::{Deserialize, Serialize};

/// A configured authentication step that a flow script can execute by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
  /// Identifier used by `executeStep({ id = ... })`.
  pub id: String,
  /// Authenticators offered to the user when this step runs.
  #[serde(default)]
  pub authenticators: Vec<String>,
  /// Whether the user identified in this step becomes the session subject.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub subject_step: bool,
  /// Whether user attributes are taken from this step.
  #[serde(default, skip_serializing_if = "std::ops::Not::not")]
  pub attribute_step: bool,
}

impl StepConfig {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      authenticators: Vec::new(),
      subject_step: false,
      attribute_step: false,
    }
  }

  pub fn with_authenticator(mut self, name: impl Into<String>) -> Self {
    self.authenticators.push(name.into());
    self
  }
}
