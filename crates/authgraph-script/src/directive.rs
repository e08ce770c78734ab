use authgraph_model::DecisionEvaluator;

use crate::error::DirectiveError;

/// Arguments of an `executeStep` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDirective {
  pub id: String,
  /// `on` clauses in the order the engine read them.
  pub on: Vec<(String, DecisionEvaluator)>,
}

impl StepDirective {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      on: Vec::new(),
    }
  }

  pub fn on(mut self, event: impl Into<String>, evaluator: DecisionEvaluator) -> Self {
    self.on.push((event.into(), evaluator));
    self
  }
}

/// Arguments of a `sendError` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDirective {
  pub show_error_page: Option<bool>,
  pub page_uri: Option<String>,
}

/// Whether a sink placed a directive in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveOutcome {
  Applied,
  /// The directive was dropped. Closures captured for it are no longer
  /// referenced and may be released by the engine.
  Ignored,
}

/// Receiver of the graph-building calls a script makes.
pub trait DirectiveSink {
  fn execute_step(&mut self, directive: StepDirective) -> Result<DirectiveOutcome, DirectiveError>;

  fn send_error(&mut self, directive: ErrorDirective) -> Result<DirectiveOutcome, DirectiveError>;
}
