use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read flow config '{path}': {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid flow config: {0}")]
  Parse(#[from] serde_json::Error),

  #[error("duplicate step id: {0}")]
  DuplicateStep(String),

  #[error("flow for application '{0}' has an empty script")]
  EmptyScript(String),
}
