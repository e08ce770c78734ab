//! Per-script global environments.
//!
//! The state's own globals are never visible to flow scripts. Each compiled
//! script gets a fresh environment table used as its `_ENV`, falling back to a
//! shared base that only holds the safe builtins and read-only library tables.

use mlua::{Lua, Table, Value};

use crate::convert::display;

/// Registry name of the shared base environment.
const BASE_ENV: &str = "authgraph.base_env";

/// Builtins copied into the base environment as they are.
const BUILTINS: &[&str] = &[
  "assert",
  "error",
  "getmetatable",
  "ipairs",
  "next",
  "pairs",
  "pcall",
  "print",
  "rawequal",
  "rawget",
  "rawlen",
  "select",
  "setmetatable",
  "tonumber",
  "tostring",
  "type",
  "xpcall",
  "_VERSION",
];

/// Library tables exposed through read-only proxies.
const LIBRARIES: &[&str] = &["string", "table", "math", "utf8", "Log"];

/// Base library functions that reach the host or load arbitrary code.
const REMOVED: &[&str] = &["dofile", "loadfile", "load", "collectgarbage"];

/// Strip the unsafe base functions from the state and build the shared base
/// environment. Must run after the `Log` table is installed.
pub(crate) fn install(lua: &Lua) -> mlua::Result<()> {
  let globals = lua.globals();
  for name in REMOVED {
    globals.raw_set(*name, Value::Nil)?;
  }

  let base = lua.create_table()?;
  for name in BUILTINS {
    base.raw_set(*name, globals.raw_get::<_, Value>(*name)?)?;
  }
  for name in LIBRARIES {
    let library: Table = globals.raw_get(*name)?;
    base.raw_set(*name, read_only(lua, library)?)?;
  }
  // Strings share one metatable whose __index is the real string library.
  lua
    .load("getmetatable('').__metatable = false")
    .set_name("sandbox")
    .exec()?;

  lua.set_named_registry_value(BASE_ENV, base)
}

/// Create an empty environment for one script.
pub(crate) fn new_env(lua: &Lua) -> mlua::Result<Table<'_>> {
  let base: Table = lua.named_registry_value(BASE_ENV)?;
  let env = lua.create_table()?;
  let meta = lua.create_table()?;
  meta.raw_set("__index", base)?;
  meta.raw_set("__metatable", false)?;
  env.set_metatable(Some(meta));
  Ok(env)
}

fn read_only<'lua>(lua: &'lua Lua, table: Table<'lua>) -> mlua::Result<Table<'lua>> {
  let proxy = lua.create_table()?;
  let meta = lua.create_table()?;
  meta.raw_set("__index", table)?;
  meta.raw_set(
    "__newindex",
    lua.create_function(|_, (_, key, _): (Value, Value, Value)| -> mlua::Result<()> {
      Err(mlua::Error::runtime(format!(
        "attempt to modify read-only field '{}'",
        display(&key)
      )))
    })?,
  )?;
  meta.raw_set("__metatable", false)?;
  proxy.set_metatable(Some(meta));
  Ok(proxy)
}
