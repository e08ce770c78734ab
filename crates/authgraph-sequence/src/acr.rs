//! Outcome selection by requested authentication context class.

use authgraph_script::{FunctionRegistry, NativeError, SessionContext, Subsystem};
use serde_json::Value;

/// Name under which [`select_acr`] is exposed to flow scripts.
pub const SELECT_ACR_FROM: &str = "selectAcrFrom";

/// Return the first requested ACR, in request order, that is also possible.
pub fn select_acr<R, P>(requested: &[R], possible: &[P]) -> Option<String>
where
  R: AsRef<str>,
  P: AsRef<str>,
{
  requested
    .iter()
    .map(AsRef::as_ref)
    .find(|acr| possible.iter().any(|p| p.as_ref() == *acr))
    .map(str::to_string)
}

/// `selectAcrFrom(context, outcomes)`: pick from `outcomes` using the
/// session's requested ACRs. Outcomes may be passed as one array or as
/// separate string arguments.
fn select_acr_from(session: &mut SessionContext, args: &[Value]) -> Result<Value, NativeError> {
  let values: Vec<&Value> = match args {
    [Value::Array(items)] => items.iter().collect(),
    _ => args.iter().collect(),
  };

  let mut possible = Vec::with_capacity(values.len());
  for value in values {
    match value {
      Value::String(s) => possible.push(s.as_str()),
      other => {
        return Err(NativeError::invalid_argument(
          SELECT_ACR_FROM,
          format!("expected string outcomes, got {other}"),
        ));
      }
    }
  }

  Ok(
    select_acr(session.requested_acr(), &possible)
      .map(Value::String)
      .unwrap_or(Value::Null),
  )
}

/// Register the native functions every flow script can use.
pub fn register_builtin_functions(registry: &FunctionRegistry) {
  registry.register(Subsystem::SequenceHandler, SELECT_ACR_FROM, select_acr_from);
}
