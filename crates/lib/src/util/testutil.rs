//! Test helpers: tarball writers and git fixture repositories.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

/// One entry of a test tarball. Paths are written raw, so `..` survives.
pub struct TarEntry {
  path: String,
  kind: TarKind,
  mode: u32,
}

enum TarKind {
  File(Vec<u8>),
  Symlink(String),
}

impl TarEntry {
  pub fn file(path: &str, data: &[u8]) -> Self {
    Self {
      path: path.to_string(),
      kind: TarKind::File(data.to_vec()),
      mode: 0o644,
    }
  }

  pub fn symlink(path: &str, target: &str) -> Self {
    Self {
      path: path.to_string(),
      kind: TarKind::Symlink(target.to_string()),
      mode: 0o777,
    }
  }

  pub fn mode(mut self, mode: u32) -> Self {
    self.mode = mode;
    self
  }
}

fn append_entries<W: Write>(builder: &mut tar::Builder<W>, entries: &[TarEntry]) {
  for entry in entries {
    let mut header = tar::Header::new_gnu();
    let name = entry.path.as_bytes();
    header.as_old_mut().name[..name.len()].copy_from_slice(name);
    header.set_mode(entry.mode);
    header.set_mtime(1_700_000_000);
    match &entry.kind {
      TarKind::File(data) => {
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append(&header, data.as_slice()).unwrap();
      }
      TarKind::Symlink(target) => {
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        let target = target.as_bytes();
        header.as_old_mut().linkname[..target.len()].copy_from_slice(target);
        header.set_cksum();
        builder.append(&header, std::io::empty()).unwrap();
      }
    }
  }
}

pub fn write_tar(path: &Path, entries: &[TarEntry]) {
  let mut builder = tar::Builder::new(File::create(path).unwrap());
  append_entries(&mut builder, entries);
  builder.finish().unwrap();
}

pub fn write_tar_gz(path: &Path, entries: &[TarEntry]) {
  let encoder = flate2::write::GzEncoder::new(File::create(path).unwrap(), flate2::Compression::default());
  let mut builder = tar::Builder::new(encoder);
  append_entries(&mut builder, entries);
  builder.into_inner().unwrap().finish().unwrap();
}

pub fn has_git() -> bool {
  Command::new("git")
    .arg("--version")
    .output()
    .map(|out| out.status.success())
    .unwrap_or(false)
}

/// A throwaway repository driven through the `git` binary.
pub struct GitFixture {
  dir: PathBuf,
}

impl GitFixture {
  pub fn init(dir: &Path) -> Self {
    std::fs::create_dir_all(dir).unwrap();
    let fixture = Self { dir: dir.to_path_buf() };
    fixture.git(&["init", "-q", "-b", "main"]);
    fixture
  }

  fn git(&self, args: &[&str]) -> String {
    let out = Command::new("git")
      .args(args)
      .current_dir(&self.dir)
      .env("GIT_AUTHOR_NAME", "buildpkg")
      .env("GIT_AUTHOR_EMAIL", "buildpkg@example.invalid")
      .env("GIT_COMMITTER_NAME", "buildpkg")
      .env("GIT_COMMITTER_EMAIL", "buildpkg@example.invalid")
      .env("GIT_CONFIG_NOSYSTEM", "1")
      .env("HOME", &self.dir)
      .output()
      .unwrap();
    assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
    String::from_utf8_lossy(&out.stdout).trim().to_string()
  }

  pub fn write(&self, name: &str, contents: &str) {
    std::fs::write(self.dir.join(name), contents).unwrap();
  }

  /// Commits everything (allowing empty commits) and returns the commit id.
  pub fn commit(&self, message: &str) -> String {
    self.git(&["add", "-A"]);
    self.git(&["commit", "-q", "--allow-empty", "-m", message]);
    self.git(&["rev-parse", "HEAD"])
  }

  pub fn switch_new(&self, branch: &str) {
    self.git(&["checkout", "-q", "-b", branch]);
  }

  pub fn switch(&self, branch: &str) {
    self.git(&["checkout", "-q", branch]);
  }

  /// Non-fast-forward merge, so a merge commit is always created.
  pub fn merge(&self, branch: &str) -> String {
    self.git(&["merge", "-q", "--no-ff", "-m", &format!("merge {branch}"), branch]);
    self.git(&["rev-parse", "HEAD"])
  }

  pub fn tag(&self, name: &str) {
    self.git(&["tag", name]);
  }

  pub fn tag_annotated(&self, name: &str) {
    self.git(&["tag", "-a", name, "-m", name]);
  }
}
