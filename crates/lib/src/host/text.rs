//! Pure text utilities exposed to definitions: regex capture and JSON decoding.

use mlua::prelude::*;
use regex::Regex;
use serde_json::Value;

/// Capture groups `1..n` of the first match of `pattern` in `text`.
///
/// Groups that did not participate are empty strings. A pattern without
/// groups yields the whole match. No match yields an empty list.
pub fn regex_match(text: &str, pattern: &str) -> Result<Vec<String>, regex::Error> {
  let regex = Regex::new(pattern)?;
  let Some(captures) = regex.captures(text) else {
    return Ok(Vec::new());
  };

  if captures.len() == 1 {
    return Ok(vec![captures[0].to_string()]);
  }
  Ok(
    captures
      .iter()
      .skip(1)
      .map(|group| group.map(|m| m.as_str().to_string()).unwrap_or_default())
      .collect(),
  )
}

/// Converts a decoded JSON document into Lua values.
///
/// Objects become tables, arrays become sequences and `null` becomes the
/// `json_null` sentinel so it survives inside tables.
pub fn json_to_lua(lua: &Lua, value: &Value) -> LuaResult<LuaValue> {
  Ok(match value {
    Value::Null => LuaValue::NULL,
    Value::Bool(b) => LuaValue::Boolean(*b),
    Value::Number(n) => match n.as_i64() {
      Some(i) => LuaValue::Integer(i),
      None => LuaValue::Number(n.as_f64().unwrap_or(f64::NAN)),
    },
    Value::String(s) => LuaValue::String(lua.create_string(s)?),
    Value::Array(items) => {
      let table = lua.create_table_with_capacity(items.len(), 0)?;
      for (i, item) in items.iter().enumerate() {
        table.raw_set(i + 1, json_to_lua(lua, item)?)?;
      }
      LuaValue::Table(table)
    }
    Value::Object(map) => {
      let table = lua.create_table_with_capacity(0, map.len())?;
      for (key, item) in map {
        table.raw_set(key.as_str(), json_to_lua(lua, item)?)?;
      }
      LuaValue::Table(table)
    }
  })
}
