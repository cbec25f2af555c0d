//! `git.clone` / `git.load` bindings and the repository handle userdata.

use std::rc::Rc;

use mlua::prelude::*;

use super::{HostState, add_fn, raise};
use crate::fetch::RepoHandle;
use crate::fetch::git::repo_dir_name;
use crate::stage::Anchor;

impl LuaUserData for RepoHandle {
  fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
    fields.add_field_method_get("path", |_, this| Ok(this.path().to_string_lossy().into_owned()));
  }

  fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
    methods.add_method("get_tags", |_, this, ()| this.tags().map_err(raise));
    methods.add_method("get_revision", |_, this, tag: String| this.revision(&tag).map_err(raise));
    methods.add_method("commits_since", |_, this, rev: String| {
      this.commits_since(&rev).map_err(raise)
    });
  }
}

pub(super) fn create_git_table(lua: &Lua, state: &Rc<HostState>) -> LuaResult<LuaTable> {
  let git = lua.create_table()?;

  add_fn(lua, &git, "clone", state, |_, st, (url, dest): (String, Option<String>)| {
    let confine = st.confinement().map_err(raise)?;
    let dest = match dest {
      Some(dest) => confine.resolve(&dest, Anchor::Source).map_err(raise)?,
      None => confine.src_dir().join(repo_dir_name(&url)),
    };
    RepoHandle::clone_from(&url, &dest, &st.interrupt).map_err(raise)
  })?;

  add_fn(lua, &git, "load", state, |_, st, path: String| {
    let confine = st.confinement().map_err(raise)?;
    let path = confine.resolve(&path, Anchor::Source).map_err(raise)?;
    RepoHandle::open(&path).map_err(raise)
  })?;

  Ok(git)
}
