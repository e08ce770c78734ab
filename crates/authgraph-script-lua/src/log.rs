use mlua::{Lua, Value, Variadic};
use tracing::{debug, error, info, warn};

use crate::convert::display;

fn message(args: &Variadic<Value<'_>>) -> String {
  args.iter().map(display).collect::<Vec<_>>().join(" ")
}

/// Install the global `Log` table and route `print` to it.
pub(crate) fn install(lua: &Lua) -> mlua::Result<()> {
  let log = lua.create_table()?;

  let info_fn = lua.create_function(|_, args: Variadic<Value>| {
    info!(target: "authgraph::script", "{}", message(&args));
    Ok(())
  })?;
  log.set("info", info_fn.clone())?;
  log.set(
    "debug",
    lua.create_function(|_, args: Variadic<Value>| {
      debug!(target: "authgraph::script", "{}", message(&args));
      Ok(())
    })?,
  )?;
  log.set(
    "warn",
    lua.create_function(|_, args: Variadic<Value>| {
      warn!(target: "authgraph::script", "{}", message(&args));
      Ok(())
    })?,
  )?;
  log.set(
    "error",
    lua.create_function(|_, args: Variadic<Value>| {
      error!(target: "authgraph::script", "{}", message(&args));
      Ok(())
    })?,
  )?;

  let globals = lua.globals();
  globals.set("Log", log)?;
  globals.set("print", info_fn)?;
  Ok(())
}
