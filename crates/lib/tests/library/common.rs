//! Shared fixtures for the library integration tests.

use std::fs;
use std::path::Path;
use std::time::Duration;

use buildpkg_lib::build::{ArchSelection, BuildOutcome, BuildReport, BuildRequest, Engine, EngineConfig};
use buildpkg_lib::definition::DefinitionSource;
use buildpkg_lib::fetch::FetchConfig;

/// Engine config rooted entirely inside `root`.
pub fn engine_config(root: &Path) -> EngineConfig {
  EngineConfig {
    parallelism: 4,
    work_root: root.join("work"),
    cache_dir: Some(root.join("cache")),
    phase_timeout: Some(Duration::from_secs(30)),
    fetch: FetchConfig {
      retries: 1,
      backoff: Duration::from_millis(10),
      timeout: Duration::from_secs(10),
      ..FetchConfig::default()
    },
    ..EngineConfig::default()
  }
}

pub fn engine(root: &Path) -> Engine {
  Engine::new(engine_config(root)).unwrap()
}

pub fn source(text: &str) -> DefinitionSource {
  DefinitionSource::from_text("buildpkg.lua", text)
}

pub fn request(text: &str, arch: ArchSelection) -> BuildRequest {
  BuildRequest::new(source(text)).arch(arch)
}

pub fn single(report: BuildReport) -> BuildOutcome {
  assert_eq!(report.outcomes.len(), 1, "{report:?}");
  report.outcomes.into_iter().next().unwrap()
}

/// Number of workspaces left under the work root.
pub fn workspaces(root: &Path) -> usize {
  match fs::read_dir(root.join("work")) {
    Ok(entries) => entries.count(),
    Err(_) => 0,
  }
}

/// A plain tarball with one entry per `(path, contents)`. Paths are written
/// verbatim, including `..` components.
pub fn tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
  let mut builder = tar::Builder::new(Vec::new());
  for (path, data) in entries {
    let mut header = tar::Header::new_gnu();
    let name = &mut header.as_old_mut().name;
    name[..path.len()].copy_from_slice(path.as_bytes());
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    builder.append(&header, *data).unwrap();
  }
  builder.into_inner().unwrap()
}

pub fn sha256_hex(data: &[u8]) -> String {
  use sha2::{Digest, Sha256};
  hex::encode(Sha256::digest(data))
}

/// Lua string literal holding `data` byte for byte.
pub fn lua_bytes(data: &[u8]) -> String {
  let mut literal = String::with_capacity(data.len() * 4 + 2);
  literal.push('"');
  for byte in data {
    literal.push_str(&format!("\\{byte}"));
  }
  literal.push('"');
  literal
}
