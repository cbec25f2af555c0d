//! Host functions cannot touch anything outside the build's directories.

use std::fs;

use buildpkg_lib::arch::Arch;
use buildpkg_lib::build::{ArchSelection, BuildOutcome, Phase};
use buildpkg_lib::error::ErrorKind;
use tempfile::TempDir;

use super::common::{engine, lua_bytes, request, single, tarball};

/// Runs `body` as the BUILD hook and returns the failure kind, if any.
async fn build_with(temp: &TempDir, body: &str) -> Option<(Phase, ErrorKind, String)> {
  let text = format!(
    "INFO = {{ name = 'confined', arch = {{ 'x86_64' }} }}\n\
     function BUILD()\n{body}\nend\n\
     function PACKAGE() file_save('marker', 'x') copy('marker', '/marker') end\n"
  );
  let report = engine(temp.path())
    .build(request(&text, ArchSelection::Arch(Arch::X86_64)))
    .await
    .unwrap();
  match single(report) {
    BuildOutcome::Failed(failure) => Some((failure.phase?, failure.kind, failure.message)),
    _ => None,
  }
}

async fn assert_capability(body: &str) {
  let temp = TempDir::new().unwrap();
  let (phase, kind, message) = build_with(&temp, body).await.expect(body);
  assert_eq!(phase, Phase::Build, "{body}: {message}");
  assert_eq!(kind, ErrorKind::Capability, "{body}: {message}");
}

mod escapes {
  use super::*;

  #[tokio::test(flavor = "multi_thread")]
  async fn file_save() {
    assert_capability("file_save('../escape.txt', 'x')").await;
    assert_capability("file_save('/tmp/buildpkg-escape.txt', 'x')").await;
    assert!(!std::path::Path::new("/tmp/buildpkg-escape.txt").exists());
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn file_load() {
    assert_capability("file_load('../../../../etc/passwd')").await;
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn download_destination() {
    assert_capability("download('http://127.0.0.1:9/x.tar', '../x.tar')").await;
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn copy_destination() {
    assert_capability("file_save('a', 'x') copy('a', '../../escape')").await;
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn link_path_and_target() {
    assert_capability("link('/bin/sh', '../escape')").await;
    assert_capability("link('../../../etc/passwd', 'usr/bin/x')").await;
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn unpack_destination() {
    assert_capability("file_save('a.tar', '') unpack_tarball('a.tar', '../out')").await;
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn exec_cwd() {
    assert_capability("exec('true', { cwd = '../..' })").await;
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn symlink_inside_package_cannot_redirect_writes() {
    let outside = TempDir::new().unwrap();
    let target = dunce::canonicalize(outside.path()).unwrap();
    let body = format!(
      "link('{}', '/etc')\nfile_save('passwd', 'owned')\ncopy('passwd', '/etc/passwd')",
      target.display()
    );
    assert_capability(&body).await;
    assert!(!target.join("passwd").exists());
  }
}

mod archives {
  use super::*;

  #[tokio::test(flavor = "multi_thread")]
  async fn parent_dir_entry_is_archive_error() {
    let temp = TempDir::new().unwrap();
    let archive = tarball(&[("ok.txt", &b"fine"[..]), ("../evil.txt", &b"evil"[..])]);
    let body = format!("file_save('evil.tar', {})\nunpack_tarball('evil.tar', 'out')", lua_bytes(&archive));
    let (phase, kind, _) = build_with(&temp, &body).await.unwrap();
    assert_eq!(phase, Phase::Build);
    assert_eq!(kind, ErrorKind::Archive);
    let leaked = fs::read_dir(temp.path().join("work"))
      .map(|entries| entries.count())
      .unwrap_or(0);
    assert_eq!(leaked, 0);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn well_formed_archive_unpacks() {
    let temp = TempDir::new().unwrap();
    let archive = tarball(&[("bin/tool", &b"#!/bin/sh\n"[..])]);
    let body = format!(
      "file_save('tool.tar', {})\nunpack_tarball('tool.tar', 'out')\nassert(file_load('out/bin/tool') == '#!/bin/sh\\n')",
      lua_bytes(&archive)
    );
    assert_eq!(build_with(&temp, &body).await, None);
  }
}
