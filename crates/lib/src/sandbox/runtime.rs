//! Construction of the restricted Lua state.
//!
//! Only the `base` (minus `dofile`/`loadfile`), `table`, `string`, `math`,
//! `utf8` and `coroutine` libraries are opened. The global table gets a
//! metatable that serves host bindings and context globals, and refuses reads
//! of names nobody declared.

use std::rc::Rc;

use mlua::prelude::*;
use mlua::{HookTriggers, StdLib, VmState};

use super::SandboxConfig;
use crate::consts::CONTEXT_GLOBALS;
use crate::host::{self, HostError, HostState};
use crate::interrupt::Interrupt;

const REMOVED_BASE_FUNCTIONS: &[&str] = &["dofile", "loadfile"];

/// `load` restricted to text chunks. An explicit `env` argument is forwarded
/// only when given, since `load(s, n, m, nil)` would clear `_ENV`.
const TEXT_ONLY_LOAD: &str = r##"
local raw_load = load
return function(chunk, name, _, ...)
  if select("#", ...) > 0 then
    return raw_load(chunk, name, "t", ...)
  end
  return raw_load(chunk, name, "t")
end
"##;

/// `pcall`/`xpcall` that re-raise once the build is interrupted, so a
/// protected call cannot swallow a timeout or cancellation.
const INTERRUPT_AWARE_PCALL: &str = r#"
local raw_pcall, raw_xpcall, check = pcall, xpcall, ...
local function pass(...)
  check()
  return ...
end
return function(...) return pass(raw_pcall(...)) end,
  function(...) return pass(raw_xpcall(...)) end
"#;

/// A fresh state plus the table that holds its context globals.
pub(crate) struct Runtime {
  pub lua: Lua,
  pub context: LuaTable,
}

pub(crate) fn create_runtime(config: &SandboxConfig, host: &Rc<HostState>, interrupt: &Interrupt) -> LuaResult<Runtime> {
  let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8 | StdLib::COROUTINE;
  let lua = Lua::new_with(libs, LuaOptions::new())?;
  if let Some(limit) = config.memory_limit {
    lua.set_memory_limit(limit)?;
  }

  let globals = lua.globals();
  for name in REMOVED_BASE_FUNCTIONS {
    globals.raw_set(*name, LuaValue::Nil)?;
  }
  let load: LuaFunction = lua.load(TEXT_ONLY_LOAD).set_name("=load").eval()?;
  globals.raw_set("load", load)?;
  globals.raw_set("print", host::create_print(&lua, host)?)?;
  install_protected_calls(&lua, &globals, interrupt.clone())?;

  let bindings = lua.create_table()?;
  host::register_host_api(&lua, &bindings, host)?;
  let context = lua.create_table()?;

  install_global_guard(&lua, &globals, bindings, context.clone())?;
  install_interrupt_hook(&lua, config.instruction_interval, interrupt.clone())?;

  Ok(Runtime { lua, context })
}

fn capability(message: String) -> LuaError {
  LuaError::external(HostError::Capability(message))
}

fn key_name(key: &LuaValue) -> String {
  match key {
    LuaValue::String(s) => s.to_string_lossy().to_string(),
    other => format!("<{}>", other.type_name()),
  }
}

fn is_context_name(key: &LuaValue) -> bool {
  match key {
    LuaValue::String(s) => CONTEXT_GLOBALS.iter().any(|name| &*s.as_bytes() == name.as_bytes()),
    _ => false,
  }
}

fn install_global_guard(lua: &Lua, globals: &LuaTable, bindings: LuaTable, context: LuaTable) -> LuaResult<()> {
  // Names the script assigned at least once, even to nil.
  let declared = lua.create_table()?;
  let metatable = lua.create_table()?;

  {
    let (bindings, context, declared) = (bindings.clone(), context.clone(), declared.clone());
    metatable.raw_set(
      "__index",
      lua.create_function(move |_, (_, key): (LuaTable, LuaValue)| {
        let value: LuaValue = context.raw_get(key.clone())?;
        if !value.is_nil() {
          return Ok(value);
        }
        let value: LuaValue = bindings.raw_get(key.clone())?;
        if !value.is_nil() {
          return Ok(value);
        }
        if is_context_name(&key) || declared.raw_get::<bool>(key.clone())? {
          return Ok(LuaValue::Nil);
        }
        Err(capability(format!("access to undeclared global '{}'", key_name(&key))))
      })?,
    )?;
  }

  metatable.raw_set(
    "__newindex",
    lua.create_function(move |_, (globals, key, value): (LuaTable, LuaValue, LuaValue)| {
      if is_context_name(&key) || !bindings.raw_get::<LuaValue>(key.clone())?.is_nil() {
        return Err(capability(format!("global '{}' is read-only", key_name(&key))));
      }
      declared.raw_set(key.clone(), true)?;
      globals.raw_set(key, value)
    })?,
  )?;

  metatable.raw_set("__metatable", false)?;
  globals.set_metatable(Some(metatable))?;
  Ok(())
}

fn install_protected_calls(lua: &Lua, globals: &LuaTable, interrupt: Interrupt) -> LuaResult<()> {
  let check = lua.create_function(move |_, ()| match interrupt.reason() {
    Some(reason) => Err(LuaError::external(HostError::Interrupted(reason))),
    None => Ok(()),
  })?;
  let (pcall, xpcall): (LuaFunction, LuaFunction) = lua
    .load(INTERRUPT_AWARE_PCALL)
    .set_name("=pcall")
    .call(check)?;
  globals.raw_set("pcall", pcall)?;
  globals.raw_set("xpcall", xpcall)
}

fn install_interrupt_hook(lua: &Lua, every_nth: u32, interrupt: Interrupt) -> LuaResult<()> {
  let triggers = HookTriggers::new().every_nth_instruction(every_nth.max(1));
  lua.set_hook(triggers, move |_, _| match interrupt.reason() {
    Some(reason) => Err(LuaError::external(HostError::Interrupted(reason))),
    None => Ok(VmState::Continue),
  })
}
