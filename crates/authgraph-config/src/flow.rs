use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::step::StepConfig;

/// Authentication flow definition for a single application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDef {
  /// Application (service provider) the flow belongs to. Compiled scripts are
  /// cached under this name.
  pub application: String,
  /// Flow script source.
  pub script: String,
  /// Steps the script may execute.
  #[serde(default)]
  pub steps: Vec<StepConfig>,
  /// Requested ACR values used when the CLI simulates a login.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub requested_acr: Vec<String>,
}

impl FlowDef {
  /// Parse a flow definition from a JSON string.
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    let flow: FlowDef = serde_json::from_str(json)?;
    flow.validate()?;
    Ok(flow)
  }

  /// Load a flow definition from a JSON file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.display().to_string(),
      source,
    })?;
    Self::from_json_str(&json)
  }

  /// Build the step lookup table keyed by step id.
  pub fn step_table(&self) -> Result<BTreeMap<String, StepConfig>, ConfigError> {
    let mut table = BTreeMap::new();
    for step in &self.steps {
      if table.insert(step.id.clone(), step.clone()).is_some() {
        return Err(ConfigError::DuplicateStep(step.id.clone()));
      }
    }
    Ok(table)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.script.trim().is_empty() {
      return Err(ConfigError::EmptyScript(self.application.clone()));
    }
    self.step_table().map(|_| ())
  }
}
