//! Conversion between Lua values and JSON values passed to native functions.

use mlua::{Lua, Table, Value};

/// Maximum table nesting converted to JSON.
const MAX_DEPTH: usize = 32;

pub(crate) fn lua_to_json(value: Value<'_>) -> mlua::Result<serde_json::Value> {
  to_json(value, 0)
}

fn to_json(value: Value<'_>, depth: usize) -> mlua::Result<serde_json::Value> {
  if depth > MAX_DEPTH {
    return Err(mlua::Error::runtime("table nesting too deep"));
  }

  Ok(match value {
    Value::Nil => serde_json::Value::Null,
    Value::Boolean(b) => serde_json::Value::Bool(b),
    Value::Integer(i) => serde_json::Value::from(i),
    Value::Number(n) => serde_json::Number::from_f64(n)
      .map(serde_json::Value::Number)
      .unwrap_or(serde_json::Value::Null),
    Value::String(s) => serde_json::Value::String(s.to_str()?.to_string()),
    Value::Table(table) => table_to_json(table, depth)?,
    other => {
      return Err(mlua::Error::runtime(format!(
        "cannot pass a {} to a native function",
        other.type_name()
      )));
    }
  })
}

fn table_to_json(table: Table<'_>, depth: usize) -> mlua::Result<serde_json::Value> {
  let len = table.raw_len();
  let mut entries = 0;
  let mut object = serde_json::Map::new();

  for pair in table.clone().pairs::<Value, Value>() {
    let (key, value) = pair?;
    entries += 1;
    let key = match key {
      Value::String(s) => s.to_str()?.to_string(),
      Value::Integer(i) => i.to_string(),
      other => {
        return Err(mlua::Error::runtime(format!(
          "unsupported table key type: {}",
          other.type_name()
        )));
      }
    };
    object.insert(key, to_json(value, depth + 1)?);
  }

  // A table whose only keys are 1..=len is a sequence.
  if len > 0 && entries == len {
    let mut array = Vec::with_capacity(len);
    for value in table.sequence_values::<Value>() {
      array.push(to_json(value?, depth + 1)?);
    }
    return Ok(serde_json::Value::Array(array));
  }

  Ok(serde_json::Value::Object(object))
}

pub(crate) fn json_to_lua<'lua>(
  lua: &'lua Lua,
  value: &serde_json::Value,
) -> mlua::Result<Value<'lua>> {
  Ok(match value {
    serde_json::Value::Null => Value::Nil,
    serde_json::Value::Bool(b) => Value::Boolean(*b),
    serde_json::Value::Number(n) => match n.as_i64() {
      Some(i) => Value::Integer(i),
      None => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
    },
    serde_json::Value::String(s) => Value::String(lua.create_string(s)?),
    serde_json::Value::Array(items) => {
      let table = lua.create_table()?;
      for (i, item) in items.iter().enumerate() {
        table.raw_set(i + 1, json_to_lua(lua, item)?)?;
      }
      Value::Table(table)
    }
    serde_json::Value::Object(map) => {
      let table = lua.create_table()?;
      for (key, item) in map {
        table.raw_set(key.as_str(), json_to_lua(lua, item)?)?;
      }
      Value::Table(table)
    }
  })
}

/// Render a value the way the `Log` functions print it.
pub(crate) fn display(value: &Value<'_>) -> String {
  match value {
    Value::String(s) => s.to_string_lossy().into_owned(),
    other => other
      .to_string()
      .unwrap_or_else(|_| other.type_name().to_string()),
  }
}
