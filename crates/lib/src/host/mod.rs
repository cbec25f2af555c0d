//! Host API surface: the only way a definition can reach the outside world.
//!
//! Every binding is a Rust closure over the build's [`HostState`]. Filesystem
//! arguments go through [`Confinement`] before any component sees them, and
//! every call first checks the build's interrupt.

pub mod error;
pub mod exec;
mod git;
pub mod text;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use mlua::prelude::*;
use tokio::runtime::Handle;
use tracing::info;

pub use error::HostError;
pub use exec::{ExecConfig, ExecError};

use crate::build::BuildContext;
use crate::consts::{ARCH_GLOBAL, PKG_DIR_GLOBAL, PKG_VERSION_GLOBAL, SRC_DIR_GLOBAL};
use crate::fetch::{Fetcher, url_to_filename};
use crate::interrupt::Interrupt;
use crate::stage::{self, Anchor, Confinement, LinkPolicy};
use crate::unpack;
use crate::util::hash::hash_bytes;
use crate::verify;

/// Engine-side services shared by every build's bindings.
#[derive(Debug, Clone)]
pub struct HostServices {
  /// Runtime that drives async work (downloads, subprocesses).
  pub runtime: Handle,
  pub fetcher: Arc<Fetcher>,
  pub exec: ExecConfig,
  pub link_policy: LinkPolicy,
}

/// Per-sandbox state behind the bindings.
pub(crate) struct HostState {
  services: HostServices,
  interrupt: Interrupt,
  package: RefCell<String>,
  active: RefCell<Option<BuildContext>>,
}

/// Raises a host failure into Lua.
pub(crate) fn raise(err: impl Into<HostError>) -> LuaError {
  LuaError::external(err.into())
}

fn path_string(path: &Path) -> String {
  path.to_string_lossy().into_owned()
}

impl HostState {
  pub(crate) fn new(services: HostServices, interrupt: Interrupt) -> Self {
    Self {
      services,
      interrupt,
      package: RefCell::new(String::new()),
      active: RefCell::new(None),
    }
  }

  pub(crate) fn set_package(&self, name: &str) {
    *self.package.borrow_mut() = name.to_string();
  }

  pub(crate) fn package(&self) -> String {
    self.package.borrow().clone()
  }

  /// Makes `ctx` the target of filesystem calls until [`HostState::deactivate`].
  pub(crate) fn activate(&self, ctx: &BuildContext) {
    *self.active.borrow_mut() = Some(ctx.clone());
  }

  pub(crate) fn deactivate(&self) {
    *self.active.borrow_mut() = None;
  }

  fn context(&self) -> Result<BuildContext, HostError> {
    self
      .active
      .borrow()
      .clone()
      .ok_or_else(|| HostError::Capability("filesystem and network access require an active build phase".to_string()))
  }

  fn confinement(&self) -> Result<Confinement, HostError> {
    Ok(self.context()?.confinement())
  }

  fn check_interrupt(&self) -> Result<(), HostError> {
    match self.interrupt.reason() {
      Some(reason) => Err(HostError::Interrupted(reason)),
      None => Ok(()),
    }
  }

  fn download(&self, url: &str, dest: &str, sha256: Option<&str>) -> Result<PathBuf, HostError> {
    let confine = self.confinement()?;
    let mut target = confine.resolve(dest, Anchor::Source)?;
    if dest.ends_with('/') || target.is_dir() {
      target = target.join(url_to_filename(url));
      confine.check_existing(&target, dest)?;
    }
    let fetcher = &self.services.fetcher;
    let path = self
      .services
      .runtime
      .block_on(fetcher.download(url, &target, sha256, &self.interrupt))?;
    Ok(path)
  }

  fn unpack(&self, archive: &str, dest: &str) -> Result<PathBuf, HostError> {
    let confine = self.confinement()?;
    let archive = confine.resolve(archive, Anchor::Source)?;
    let dest = confine.resolve(dest, Anchor::Source)?;
    unpack::unpack(&archive, &dest, Some(&self.interrupt))?;
    Ok(dest)
  }

  fn exec(&self, cmd: &str, opts: Option<LuaTable>) -> LuaResult<String> {
    let ctx = self.context().map_err(raise)?;
    let confine = ctx.confinement();

    let mut env = BTreeMap::from([
      (ARCH_GLOBAL.to_string(), ctx.arch().to_string()),
      (SRC_DIR_GLOBAL.to_string(), path_string(ctx.src_dir())),
      (PKG_DIR_GLOBAL.to_string(), path_string(ctx.pkg_dir())),
    ]);
    if let Some(version) = ctx.version() {
      env.insert(PKG_VERSION_GLOBAL.to_string(), version.to_string());
    }

    let mut cwd = ctx.src_dir().to_path_buf();
    if let Some(opts) = opts {
      if let Some(dir) = opts.get::<Option<String>>("cwd")? {
        cwd = confine.resolve(&dir, Anchor::Source).map_err(raise)?;
      }
      if let Some(extra) = opts.get::<Option<LuaTable>>("env")? {
        for pair in extra.pairs::<String, String>() {
          let (key, value) = pair?;
          env.insert(key, value);
        }
      }
    }

    let tmp_dir = ctx.src_dir().join(".tmp");
    let output = self.services.runtime.block_on(exec::run(
      &self.services.exec,
      cmd,
      &cwd,
      &tmp_dir,
      &env,
      &self.interrupt,
    ));
    output.map_err(raise)
  }
}

/// Registers `name` in `table` as a host function over `state`.
fn add_fn<A, R, F>(lua: &Lua, table: &LuaTable, name: &str, state: &Rc<HostState>, f: F) -> LuaResult<()>
where
  A: FromLuaMulti,
  R: IntoLuaMulti,
  F: Fn(&Lua, &HostState, A) -> LuaResult<R> + 'static,
{
  let state = state.clone();
  let func = lua.create_function(move |lua, args: A| {
    state.check_interrupt().map_err(raise)?;
    f(lua, &state, args)
  })?;
  table.raw_set(name, func)
}

/// Registers every host binding into `bindings`.
pub(crate) fn register_host_api(lua: &Lua, bindings: &LuaTable, state: &Rc<HostState>) -> LuaResult<()> {
  add_fn(
    lua,
    bindings,
    "download",
    state,
    |_, st, (url, dest, sha256): (String, String, Option<String>)| {
      let path = st.download(&url, &dest, sha256.as_deref()).map_err(raise)?;
      Ok(path_string(&path))
    },
  )?;

  add_fn(lua, bindings, "file_load", state, |_, st, path: String| {
    let confine = st.confinement().map_err(raise)?;
    stage::load_file(&confine, &path).map_err(raise)
  })?;

  add_fn(
    lua,
    bindings,
    "file_save",
    state,
    |_, st, (path, contents): (String, LuaString)| {
      let confine = st.confinement().map_err(raise)?;
      let saved = stage::save_file(&confine, &path, &contents.as_bytes()).map_err(raise)?;
      Ok(path_string(&saved))
    },
  )?;

  add_fn(
    lua,
    bindings,
    "regex_match",
    state,
    |_, _, (text, pattern): (String, String)| text::regex_match(&text, &pattern).map_err(raise),
  )?;

  add_fn(lua, bindings, "json_decode", state, |lua, _, input: String| {
    let value: serde_json::Value = serde_json::from_str(&input).map_err(raise)?;
    text::json_to_lua(lua, &value)
  })?;

  add_fn(lua, bindings, "sha256sum_file", state, |_, st, path: String| {
    let confine = st.confinement().map_err(raise)?;
    let path = confine.resolve(&path, Anchor::Source).map_err(raise)?;
    Ok(verify::digest_file(&path).map_err(raise)?.0)
  })?;

  add_fn(lua, bindings, "sha256sum_string", state, |_, _, input: LuaString| {
    Ok(hash_bytes(&input.as_bytes()).0)
  })?;

  add_fn(
    lua,
    bindings,
    "verify_sha256",
    state,
    |_, st, (path, expected): (String, String)| {
      let confine = st.confinement().map_err(raise)?;
      let path = confine.resolve(&path, Anchor::Source).map_err(raise)?;
      verify::verify_file(&path, &expected).map_err(raise)?;
      Ok(true)
    },
  )?;

  add_fn(
    lua,
    bindings,
    "unpack_tarball",
    state,
    |_, st, (archive, dest): (String, String)| {
      let dest = st.unpack(&archive, &dest).map_err(raise)?;
      Ok(path_string(&dest))
    },
  )?;

  add_fn(lua, bindings, "copy", state, |_, st, (source, dest): (String, String)| {
    let confine = st.confinement().map_err(raise)?;
    let copied = stage::copy(&confine, &source, &dest).map_err(raise)?;
    Ok(path_string(&copied))
  })?;

  add_fn(
    lua,
    bindings,
    "link",
    state,
    |_, st, (target, link_path): (String, String)| {
      let confine = st.confinement().map_err(raise)?;
      let link = stage::link(&confine, &target, &link_path, st.services.link_policy).map_err(raise)?;
      Ok(path_string(&link))
    },
  )?;

  add_fn(
    lua,
    bindings,
    "exec",
    state,
    |_, st, (cmd, opts): (String, Option<LuaTable>)| st.exec(&cmd, opts),
  )?;

  bindings.raw_set("git", git::create_git_table(lua, state)?)?;
  bindings.raw_set("json_null", LuaValue::NULL)?;

  Ok(())
}

/// `print` replacement that logs through `tracing`.
pub(crate) fn create_print(lua: &Lua, state: &Rc<HostState>) -> LuaResult<LuaFunction> {
  let state = state.clone();
  lua.create_function(move |_, args: LuaMultiValue| {
    let line = args.iter().map(display_value).collect::<Vec<_>>().join("\t");
    info!(package = %state.package(), "{line}");
    Ok(())
  })
}

fn display_value(value: &LuaValue) -> String {
  match value {
    LuaValue::Nil => "nil".to_string(),
    LuaValue::Boolean(b) => b.to_string(),
    LuaValue::Integer(i) => i.to_string(),
    LuaValue::Number(n) => n.to_string(),
    LuaValue::String(s) => s.to_string_lossy().to_string(),
    other if other.is_null() => "null".to_string(),
    other => other.type_name().to_string(),
  }
}
