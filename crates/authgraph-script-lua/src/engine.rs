use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use authgraph_model::{ClosureHandle, DecisionEvaluator, ScriptClosure};
use authgraph_script::{
  Bindings, CompiledScript, DirectiveOutcome, DirectiveSink, ErrorDirective, NativeFunction,
  ScriptEngine, ScriptError, ScriptHandle, SessionContext, StepDirective,
};
use mlua::{
  Function, Lua, LuaOptions, MultiValue, RegistryKey, StdLib, Table, Value, Variadic,
};
use tracing::{debug, instrument};

use crate::convert::{display, json_to_lua, lua_to_json};
use crate::sandbox;

/// Global a chunk may define instead of returning its flow function.
pub const FLOW_ENTRY: &str = "onLoginRequest";

/// Field marking the context table, so natives called as `fn(context, ...)`
/// receive only the remaining arguments.
const CONTEXT_MARKER: &str = "__authgraph_context";

/// Registry name of the table holding the session accessors of the running
/// call. Context tables forward to it, so one captured by a closure keeps
/// working in later calls.
const ACTIVE_CALL: &str = "authgraph.active_call";

type SessionCell<'a> = RefCell<&'a mut SessionContext>;
type SinkCell<'a> = RefCell<&'a mut dyn DirectiveSink>;

/// Configuration for the Lua engine.
#[derive(Debug, Clone)]
pub struct LuaEngineConfig {
  /// Maximum memory the Lua state may allocate, in bytes.
  pub memory_limit: Option<usize>,
}

impl Default for LuaEngineConfig {
  fn default() -> Self {
    Self {
      memory_limit: Some(16 * 1024 * 1024),
    }
  }
}

/// A registry value together with the environment of the script it came from.
struct Scoped {
  value: RegistryKey,
  env: RegistryKey,
}

/// [`ScriptEngine`] backed by a single sandboxed Lua 5.4 state.
///
/// Only the `table`, `string`, `math` and `utf8` libraries are loaded. Every
/// compiled script runs with its own global environment.
pub struct LuaScriptEngine {
  lua: Mutex<Lua>,
  scripts: Mutex<HashMap<u64, Scoped>>,
  closures: Mutex<HashMap<u64, Scoped>>,
  next_handle: AtomicU64,
}

impl LuaScriptEngine {
  pub fn new() -> Result<Self, ScriptError> {
    Self::with_config(LuaEngineConfig::default())
  }

  pub fn with_config(config: LuaEngineConfig) -> Result<Self, ScriptError> {
    let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8;
    let lua = Lua::new_with(libs, LuaOptions::default())
      .map_err(|e| ScriptError::engine(format!("failed to create lua state: {e}")))?;

    if let Some(limit) = config.memory_limit {
      lua
        .set_memory_limit(limit)
        .map_err(|e| ScriptError::engine(format!("failed to set memory limit: {e}")))?;
    }
    crate::log::install(&lua)
      .map_err(|e| ScriptError::engine(format!("failed to install Log: {e}")))?;
    sandbox::install(&lua)
      .map_err(|e| ScriptError::engine(format!("failed to build sandbox: {e}")))?;
    lua
      .create_table()
      .and_then(|active| lua.set_named_registry_value(ACTIVE_CALL, active))
      .map_err(|e| ScriptError::engine(e.to_string()))?;

    Ok(Self {
      lua: Mutex::new(lua),
      scripts: Mutex::new(HashMap::new()),
      closures: Mutex::new(HashMap::new()),
      next_handle: AtomicU64::new(1),
    })
  }

  /// Number of captured closures still held.
  pub fn closure_count(&self) -> usize {
    self.closures.lock().unwrap().len()
  }

  fn next_handle(&self) -> u64 {
    self.next_handle.fetch_add(1, Ordering::Relaxed)
  }

  fn capture(&self, lua: &Lua, env: &Table<'_>, function: Function<'_>) -> mlua::Result<ClosureHandle> {
    let entry = Scoped {
      value: lua.create_registry_value(function)?,
      env: lua.create_registry_value(env.clone())?,
    };
    let handle = self.next_handle();
    self.closures.lock().unwrap().insert(handle, entry);
    Ok(ClosureHandle(handle))
  }

  fn forget(&self, handles: &[ClosureHandle]) {
    if handles.is_empty() {
      return;
    }
    let mut closures = self.closures.lock().unwrap();
    for handle in handles {
      closures.remove(&handle.0);
    }
  }

  /// Resolve a stored function and its environment.
  fn lookup<'lua>(
    lua: &'lua Lua,
    entries: &Mutex<HashMap<u64, Scoped>>,
    handle: u64,
  ) -> Result<(Function<'lua>, Table<'lua>), ScriptError> {
    let entries = entries.lock().unwrap();
    let entry = entries
      .get(&handle)
      .ok_or(ScriptError::UnknownHandle { handle })?;
    let function = lua
      .registry_value(&entry.value)
      .map_err(|e| ScriptError::engine(e.to_string()))?;
    let env = lua
      .registry_value(&entry.env)
      .map_err(|e| ScriptError::engine(e.to_string()))?;
    Ok((function, env))
  }

  fn step_directive(&self, lua: &Lua, env: &Table<'_>, params: Value<'_>) -> mlua::Result<StepDirective> {
    let params = match params {
      Value::Table(table) => table,
      id @ (Value::String(_) | Value::Integer(_) | Value::Number(_)) => {
        return Ok(StepDirective::new(display(&id)));
      }
      other => {
        return Err(mlua::Error::runtime(format!(
          "executeStep expects a table, got {}",
          other.type_name()
        )));
      }
    };

    let id: Option<String> = params.get("id")?;
    let id = id.ok_or_else(|| mlua::Error::runtime("executeStep: missing step 'id'"))?;
    let mut directive = StepDirective::new(id);

    let Some(on) = params.get::<_, Option<Table>>("on")? else {
      return Ok(directive);
    };

    let mut captured = Vec::new();
    let result = (|| -> mlua::Result<()> {
      for pair in on.pairs::<String, Value>() {
        let (event, value) = pair?;
        let evaluator = match value {
          Value::Function(function) => {
            let handle = self.capture(lua, env, function)?;
            captured.push(handle);
            DecisionEvaluator::closure(handle, format!("step {} on.{event}", directive.id))
          }
          other => DecisionEvaluator::outcome(display(&other)),
        };
        directive.on.push((event, evaluator));
      }
      Ok(())
    })();

    if let Err(e) = result {
      self.forget(&captured);
      return Err(e);
    }
    directive.on.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(directive)
  }

  fn execute_step(
    &self,
    lua: &Lua,
    env: &Table<'_>,
    sink: &SinkCell<'_>,
    params: Value<'_>,
  ) -> mlua::Result<()> {
    let directive = self.step_directive(lua, env, params)?;
    let captured: Vec<ClosureHandle> = directive
      .on
      .iter()
      .filter_map(|(_, evaluator)| evaluator.handle())
      .collect();

    let outcome = sink.borrow_mut().execute_step(directive);
    match outcome {
      Ok(DirectiveOutcome::Applied) => Ok(()),
      Ok(DirectiveOutcome::Ignored) => {
        self.forget(&captured);
        Ok(())
      }
      Err(e) => {
        self.forget(&captured);
        Err(mlua::Error::external(e))
      }
    }
  }

  fn send_error(sink: &SinkCell<'_>, params: Option<Table<'_>>) -> mlua::Result<()> {
    let directive = match params {
      Some(params) => ErrorDirective {
        show_error_page: params.get("showErrorPage")?,
        page_uri: params.get("pageUri")?,
      },
      None => ErrorDirective::default(),
    };
    sink
      .borrow_mut()
      .send_error(directive)
      .map_err(mlua::Error::external)?;
    Ok(())
  }

  /// Bind directives, natives and a `context` table into `env` for one call
  /// to `body`, restoring whatever the script held under those names after.
  fn run_scoped<'lua, F>(
    &self,
    lua: &'lua Lua,
    env: Table<'lua>,
    bindings: Bindings<'_>,
    session: &mut SessionContext,
    body: F,
  ) -> Result<(), ScriptError>
  where
    F: FnOnce(Table<'lua>) -> mlua::Result<()>,
  {
    let Bindings {
      directives,
      natives,
    } = bindings;
    let sink: SinkCell<'_> = RefCell::new(directives);
    let session: SessionCell<'_> = RefCell::new(session);

    let names: Vec<&str> = ["executeStep", "sendError", "context"]
      .into_iter()
      .chain(natives.iter().map(|(name, _)| name.as_str()))
      .collect();
    let saved = names
      .iter()
      .map(|name| env.raw_get::<_, Value>(*name))
      .collect::<mlua::Result<Vec<_>>>()
      .map_err(evaluation_error)?;
    let active: Table = lua
      .named_registry_value(ACTIVE_CALL)
      .map_err(evaluation_error)?;

    let result = lua.scope(|scope| {
      env.raw_set(
        "executeStep",
        scope.create_function(|lua, params: Value| self.execute_step(lua, &env, &sink, params))?,
      )?;
      env.raw_set(
        "sendError",
        scope.create_function(|_, params: Option<Table>| Self::send_error(&sink, params))?,
      )?;

      for (name, native) in natives {
        let session = &session;
        let function = scope.create_function(move |lua, args: Variadic<Value>| {
          call_native(lua, name, native, session, args)
        })?;
        env.raw_set(name.as_str(), function)?;
      }

      active.raw_set(
        "getProperty",
        scope.create_function(|lua, args: Variadic<Value>| {
          let args = strip_context(args);
          let key: String = match args.first() {
            Some(key) => display(key),
            None => return Err(mlua::Error::runtime("getProperty: missing key")),
          };
          let value = session.borrow().property(&key).cloned();
          match value {
            Some(value) => json_to_lua(lua, &value),
            None => Ok(Value::Nil),
          }
        })?,
      )?;
      active.raw_set(
        "setProperty",
        scope.create_function(|_, args: Variadic<Value>| {
          let mut args = strip_context(args).into_iter();
          let key = match args.next() {
            Some(key) => display(&key),
            None => return Err(mlua::Error::runtime("setProperty: missing key")),
          };
          let value = lua_to_json(args.next().unwrap_or(Value::Nil))?;
          session.borrow_mut().set_property(key, value);
          Ok(())
        })?,
      )?;

      let context = context_table(lua, &session.borrow())?;
      env.raw_set("context", context.clone())?;

      body(context)
    });

    for (name, value) in names.into_iter().zip(saved) {
      let _ = env.raw_set(name, value);
    }
    let _ = active.raw_set("getProperty", Value::Nil);
    let _ = active.raw_set("setProperty", Value::Nil);
    lua.expire_registry_values();

    result.map_err(evaluation_error)
  }
}

/// Build the `context` table handed to flow functions and closures.
fn context_table<'lua>(lua: &'lua Lua, session: &SessionContext) -> mlua::Result<Table<'lua>> {
  let context = lua.create_table()?;
  context.raw_set(CONTEXT_MARKER, true)?;
  context.raw_set("application", session.application())?;
  context.raw_set("sessionId", session.session_id())?;
  context.raw_set(
    "requestedAcr",
    lua.create_sequence_from(session.requested_acr().iter().map(String::as_str))?,
  )?;
  for method in ["getProperty", "setProperty"] {
    context.raw_set(
      method,
      lua.create_function(move |lua, args: Variadic<Value>| forward_to_active(lua, method, args))?,
    )?;
  }
  Ok(context)
}

fn forward_to_active<'lua>(
  lua: &'lua Lua,
  method: &str,
  args: Variadic<Value<'lua>>,
) -> mlua::Result<MultiValue<'lua>> {
  let active: Table = lua.named_registry_value(ACTIVE_CALL)?;
  match active.raw_get::<_, Option<Function>>(method)? {
    Some(function) => function.call(args),
    None => Err(mlua::Error::runtime(format!(
      "context.{method} called outside of a flow invocation"
    ))),
  }
}

fn call_native<'lua>(
  lua: &'lua Lua,
  name: &str,
  native: &NativeFunction,
  session: &SessionCell<'_>,
  args: Variadic<Value<'lua>>,
) -> mlua::Result<Value<'lua>> {
  let args = strip_context(args)
    .into_iter()
    .map(lua_to_json)
    .collect::<mlua::Result<Vec<_>>>()?;
  let result = {
    let mut session = session
      .try_borrow_mut()
      .map_err(|_| mlua::Error::runtime(format!("{name}: session is busy")))?;
    native(&mut **session, &args)
  };
  match result {
    Ok(value) => json_to_lua(lua, &value),
    Err(e) => Err(mlua::Error::external(e)),
  }
}

/// Drop a leading context table from a call's arguments.
fn strip_context(args: Variadic<Value<'_>>) -> Vec<Value<'_>> {
  let mut args: Vec<Value> = args.into_iter().collect();
  let is_context = match args.first() {
    Some(Value::Table(table)) => table
      .raw_get::<_, Option<bool>>(CONTEXT_MARKER)
      .ok()
      .flatten()
      .unwrap_or(false),
    _ => false,
  };
  if is_context {
    args.remove(0);
  }
  args
}

fn evaluation_error(err: mlua::Error) -> ScriptError {
  match err {
    mlua::Error::MemoryError(message) => ScriptError::engine(message),
    other => ScriptError::evaluation(other.to_string()),
  }
}

impl ScriptEngine for LuaScriptEngine {
  #[instrument(name = "lua_compile", skip(self, source))]
  fn compile(&self, name: &str, source: &str) -> Result<CompiledScript, ScriptError> {
    let lua = self.lua.lock().unwrap();
    let env = sandbox::new_env(&lua).map_err(|e| ScriptError::engine(e.to_string()))?;

    let chunk = match lua
      .load(format!("return {source}"))
      .set_name(name)
      .set_environment(env.clone())
      .into_function()
    {
      Ok(chunk) => chunk,
      Err(_) => lua
        .load(source)
        .set_name(name)
        .set_environment(env.clone())
        .into_function()
        .map_err(|e| ScriptError::compile(name, e.to_string()))?,
    };

    let entry = lua
      .create_registry_value(chunk)
      .and_then(|value| {
        Ok(Scoped {
          value,
          env: lua.create_registry_value(env)?,
        })
      })
      .map_err(|e| ScriptError::engine(e.to_string()))?;
    let handle = self.next_handle();
    self.scripts.lock().unwrap().insert(handle, entry);
    debug!(handle, "compiled lua flow script");

    Ok(CompiledScript {
      name: name.to_string(),
      source: source.to_string(),
      handle: ScriptHandle(handle),
    })
  }

  #[instrument(name = "lua_invoke", skip_all, fields(script = %script.name))]
  fn invoke(
    &self,
    script: &CompiledScript,
    bindings: Bindings<'_>,
    session: &mut SessionContext,
  ) -> Result<(), ScriptError> {
    let lua = self.lua.lock().unwrap();
    let (chunk, env) = Self::lookup(&lua, &self.scripts, script.handle.0)?;

    self.run_scoped(&lua, env.clone(), bindings, session, |context| {
      env.raw_set(FLOW_ENTRY, Value::Nil)?;

      let returned: Value = chunk.call(context.clone())?;
      let flow = match returned {
        Value::Function(flow) => Some(flow),
        _ => env.raw_get::<_, Option<Function>>(FLOW_ENTRY)?,
      };
      // Without a flow function the chunk body itself was the flow.
      if let Some(flow) = flow {
        flow.call::<_, ()>(context)?;
      }
      Ok(())
    })
  }

  #[instrument(name = "lua_invoke_closure", skip_all, fields(closure = %closure.handle, source = %closure.source))]
  fn invoke_closure(
    &self,
    closure: &ScriptClosure,
    bindings: Bindings<'_>,
    session: &mut SessionContext,
  ) -> Result<(), ScriptError> {
    let lua = self.lua.lock().unwrap();
    let (function, env) = Self::lookup(&lua, &self.closures, closure.handle.0)?;

    self.run_scoped(&lua, env, bindings, session, |context| {
      function.call::<_, ()>(context)
    })
  }

  fn release_closure(&self, handle: ClosureHandle) {
    if self.closures.lock().unwrap().remove(&handle.0).is_some() {
      debug!(%handle, "released closure");
    }
  }

  fn release_script(&self, script: &CompiledScript) {
    self.scripts.lock().unwrap().remove(&script.handle.0);
  }
}
