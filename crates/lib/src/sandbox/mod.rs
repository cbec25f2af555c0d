//! Script sandbox: loads one definition into a fresh restricted Lua state and
//! invokes its lifecycle hooks.
//!
//! Host failures travel through Lua as external errors and are classified
//! back into [`ErrorKind`]s here, at the hook boundary.

mod runtime;

use std::collections::BTreeMap;
use std::rc::Rc;

use mlua::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::build::{BuildContext, Phase};
use crate::consts::{ARCH_GLOBAL, INFO_GLOBAL, PKG_DIR_GLOBAL, PKG_VERSION_GLOBAL, SRC_DIR_GLOBAL};
use crate::definition::{DefinitionError, DefinitionSource, PackageDefinition, is_valid_version, parse_info};
use crate::error::ErrorKind;
use crate::host::{HostError, HostServices, HostState};
use crate::interrupt::{Interrupt, InterruptReason};

#[derive(Debug, Clone)]
pub struct SandboxConfig {
  /// Instructions between interrupt polls.
  pub instruction_interval: u32,
  /// Traceback lines kept in runtime error reports.
  pub traceback_lines: usize,
  /// Per-state Lua heap limit in bytes.
  pub memory_limit: Option<usize>,
}

impl Default for SandboxConfig {
  fn default() -> Self {
    Self {
      instruction_interval: 10_000,
      traceback_lines: 12,
      memory_limit: Some(512 * 1024 * 1024),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
  #[error("syntax error: {message}")]
  Parse { message: String },

  #[error("invalid definition: {0}")]
  Definition(#[from] DefinitionError),

  #[error("{message}")]
  Runtime { message: String, traceback: Option<String> },

  #[error("{message}")]
  Host { kind: ErrorKind, message: String },

  #[error("execution exceeded its time budget")]
  Timeout,

  #[error("execution was cancelled")]
  Cancelled,

  #[error("failed to initialise Lua state: {0}")]
  Init(String),
}

impl SandboxError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Parse { .. } => ErrorKind::Parse,
      Self::Definition(_) => ErrorKind::Definition,
      Self::Runtime { .. } | Self::Init(_) => ErrorKind::Runtime,
      Self::Host { kind, .. } => *kind,
      Self::Timeout => ErrorKind::Timeout,
      Self::Cancelled => ErrorKind::Cancelled,
    }
  }
}

impl From<InterruptReason> for SandboxError {
  fn from(reason: InterruptReason) -> Self {
    match reason {
      InterruptReason::Cancelled => Self::Cancelled,
      InterruptReason::TimedOut => Self::Timeout,
    }
  }
}

/// Outcome of one hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookResult {
  /// The definition has no hook for the phase.
  Absent,
  Completed,
  /// `VERSION` returned a version string.
  Version(String),
}

/// The lifecycle hooks a definition declared.
#[derive(Debug, Clone, Default)]
pub struct HookSet {
  hooks: BTreeMap<Phase, LuaFunction>,
}

impl HookSet {
  fn from_globals(globals: &LuaTable) -> Result<Self, SandboxError> {
    let mut hooks = BTreeMap::new();
    for phase in Phase::ALL {
      let value: LuaValue = globals
        .raw_get(phase.hook_name())
        .map_err(|e| SandboxError::Init(e.to_string()))?;
      match value {
        LuaValue::Nil => {}
        LuaValue::Function(func) => {
          hooks.insert(phase, func);
        }
        other => {
          return Err(
            DefinitionError::HookNotFunction {
              hook: phase.hook_name(),
              found: other.type_name().to_string(),
            }
            .into(),
          );
        }
      }
    }
    Ok(Self { hooks })
  }

  pub fn contains(&self, phase: Phase) -> bool {
    self.hooks.contains_key(&phase)
  }

  pub fn phases(&self) -> Vec<Phase> {
    self.hooks.keys().copied().collect()
  }
}

/// Creates sandboxes for one build. Each [`Sandbox::load`] starts from a fresh Lua state.
pub struct Sandbox {
  config: SandboxConfig,
  services: HostServices,
  interrupt: Interrupt,
}

impl Sandbox {
  pub fn new(config: SandboxConfig, services: HostServices, interrupt: Interrupt) -> Self {
    Self {
      config,
      services,
      interrupt,
    }
  }

  /// Executes the definition's top-level code and extracts `INFO` and hooks.
  pub fn load(&self, source: &DefinitionSource) -> Result<LoadedDefinition, SandboxError> {
    let host = Rc::new(HostState::new(self.services.clone(), self.interrupt.clone()));
    let runtime::Runtime { lua, context } =
      runtime::create_runtime(&self.config, &host, &self.interrupt).map_err(|e| SandboxError::Init(e.to_string()))?;

    lua
      .load(source.text())
      .set_name(format!("@{}", source.origin()))
      .exec()
      .map_err(|e| classify(&e, &self.interrupt, self.config.traceback_lines))?;

    let globals = lua.globals();
    let info: LuaValue = globals
      .raw_get(INFO_GLOBAL)
      .map_err(|e| SandboxError::Init(e.to_string()))?;
    let definition = parse_info(info)?;
    let hooks = HookSet::from_globals(&globals)?;
    if definition.version.is_some() && hooks.contains(Phase::Version) {
      return Err(DefinitionError::VersionConflict.into());
    }

    host.set_package(&definition.name);
    debug!(package = %definition.name, hooks = ?hooks.phases(), "definition loaded");

    Ok(LoadedDefinition {
      lua,
      host,
      context,
      definition,
      hooks,
      interrupt: self.interrupt.clone(),
      traceback_lines: self.config.traceback_lines,
    })
  }
}

/// A definition loaded into its own Lua state.
pub struct LoadedDefinition {
  lua: Lua,
  host: Rc<HostState>,
  context: LuaTable,
  definition: PackageDefinition,
  hooks: HookSet,
  interrupt: Interrupt,
  traceback_lines: usize,
}

impl LoadedDefinition {
  pub fn definition(&self) -> &PackageDefinition {
    &self.definition
  }

  pub fn hooks(&self) -> &HookSet {
    &self.hooks
  }

  /// Runs the hook for `phase` with `ctx` bound. Absent hooks do nothing.
  pub fn invoke(&self, phase: Phase, ctx: &BuildContext) -> Result<HookResult, SandboxError> {
    let Some(hook) = self.hooks.hooks.get(&phase) else {
      return Ok(HookResult::Absent);
    };
    if let Some(reason) = self.interrupt.reason() {
      return Err(reason.into());
    }

    self.bind_context(ctx).map_err(|e| self.classify(&e))?;
    self.host.activate(ctx);
    let result = hook.call::<LuaValue>(());
    self.host.deactivate();
    let value = result.map_err(|e| self.classify(&e))?;
    if let Err(e) = self.lua.gc_collect() {
      debug!(phase = %phase, error = %e, "garbage collection after hook failed");
    }

    if phase == Phase::Version {
      return version_result(value);
    }
    Ok(HookResult::Completed)
  }

  fn bind_context(&self, ctx: &BuildContext) -> LuaResult<()> {
    self.context.raw_set(ARCH_GLOBAL, ctx.arch().as_str())?;
    self
      .context
      .raw_set(SRC_DIR_GLOBAL, ctx.src_dir().to_string_lossy().into_owned())?;
    self
      .context
      .raw_set(PKG_DIR_GLOBAL, ctx.pkg_dir().to_string_lossy().into_owned())?;
    self.context.raw_set(PKG_VERSION_GLOBAL, ctx.version())?;
    Ok(())
  }

  fn classify(&self, err: &LuaError) -> SandboxError {
    classify(err, &self.interrupt, self.traceback_lines)
  }

  #[cfg(test)]
  pub(crate) fn eval<T: FromLuaMulti>(&self, chunk: &str) -> LuaResult<T> {
    self.lua.load(chunk).eval()
  }
}

fn version_result(value: LuaValue) -> Result<HookResult, SandboxError> {
  let runtime = |message: String| SandboxError::Runtime {
    message,
    traceback: None,
  };
  let version = match value {
    LuaValue::Nil => return Ok(HookResult::Completed),
    LuaValue::String(s) => s.to_string_lossy().trim().to_string(),
    LuaValue::Integer(i) => i.to_string(),
    LuaValue::Number(n) => n.to_string(),
    other => {
      return Err(runtime(format!(
        "VERSION must return a string, got {}",
        other.type_name()
      )));
    }
  };
  if version.is_empty() {
    return Err(runtime("VERSION returned an empty string".to_string()));
  }
  if !is_valid_version(&version) {
    return Err(runtime(format!("VERSION returned '{version}', which is not a valid version")));
  }
  Ok(HookResult::Version(version))
}

/// Maps a Lua error onto the taxonomy. A tripped interrupt wins over whatever
/// error the script saw while unwinding.
fn classify(err: &LuaError, interrupt: &Interrupt, traceback_lines: usize) -> SandboxError {
  if let Some(reason) = interrupt.reason() {
    return reason.into();
  }
  if let Some(host) = find_host_error(err) {
    return SandboxError::Host {
      kind: host.kind(),
      message: host.to_string(),
    };
  }
  match err {
    LuaError::SyntaxError { message, .. } => SandboxError::Parse {
      message: message.clone(),
    },
    LuaError::MemoryError(message) => SandboxError::Runtime {
      message: format!("memory limit exceeded: {message}"),
      traceback: None,
    },
    other => {
      let (message, traceback) = split_traceback(&other.to_string(), traceback_lines);
      SandboxError::Runtime { message, traceback }
    }
  }
}

fn find_host_error(err: &LuaError) -> Option<&HostError> {
  match err {
    LuaError::ExternalError(inner) => inner.downcast_ref::<HostError>(),
    LuaError::CallbackError { cause, .. } => find_host_error(cause),
    LuaError::WithContext { cause, .. } => find_host_error(cause),
    _ => None,
  }
}

const TRACEBACK_MARKER: &str = "stack traceback:";

/// Splits Lua's "message\nstack traceback:\n..." text and keeps at most
/// `max_lines` traceback lines.
fn split_traceback(text: &str, max_lines: usize) -> (String, Option<String>) {
  let Some(index) = text.find(TRACEBACK_MARKER) else {
    return (text.trim_end().to_string(), None);
  };
  let message = text[..index].trim_end().to_string();
  let frames: Vec<&str> = text[index + TRACEBACK_MARKER.len()..]
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .collect();
  if frames.is_empty() {
    return (message, None);
  }
  let mut traceback = frames.iter().take(max_lines).copied().collect::<Vec<_>>().join("\n");
  if frames.len() > max_lines {
    traceback.push_str(&format!("\n... {} more", frames.len() - max_lines));
  }
  (message, Some(traceback))
}
