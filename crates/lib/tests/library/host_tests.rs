//! Host API behaviour observed through whole builds.

use std::fs;

use buildpkg_lib::arch::Arch;
use buildpkg_lib::build::{ArchSelection, BuildOutcome, Engine, Phase};
use buildpkg_lib::error::ErrorKind;
use tempfile::TempDir;

use super::common::{engine, engine_config, request, sha256_hex, single, tarball};

const X86: ArchSelection = ArchSelection::Arch(Arch::X86_64);

fn definition(prepare: &str) -> String {
  format!(
    "INFO = {{ name = 'fetched', arch = {{ 'x86_64' }} }}\n\
     function PREPARE()\n{prepare}\nend\n\
     function PACKAGE() copy('out', '/opt/fetched') end\n"
  )
}

mod download {
  use super::*;

  #[tokio::test(flavor = "multi_thread")]
  async fn verified_download_unpacks_and_is_cached() {
    let mut server = mockito::Server::new_async().await;
    let archive = tarball(&[("tool/README", &b"docs"[..])]);
    let digest = sha256_hex(&archive);
    let mock = server
      .mock("GET", "/tool-1.0.tar")
      .with_body(archive)
      .expect(1)
      .create_async()
      .await;

    let temp = TempDir::new().unwrap();
    let prepare = format!(
      "local path = download('{}/tool-1.0.tar', 'dl/', '{digest}')\n\
       assert(path == SRC_DIR .. '/dl/tool-1.0.tar', path)\n\
       unpack_tarball('dl/tool-1.0.tar', 'out')",
      server.url()
    );
    let report = engine(temp.path()).build(request(&definition(&prepare), X86)).await.unwrap();
    let BuildOutcome::Packaged(record) = single(report) else {
      panic!("expected a package");
    };
    assert_eq!(
      fs::read_to_string(record.pkg_dir.join("opt/fetched/tool/README")).unwrap(),
      "docs"
    );
    assert!(temp.path().join("cache/sha256").join(&digest).exists());

    // The second build is served from the cache.
    let report = engine(temp.path()).build(request(&definition(&prepare), X86)).await.unwrap();
    assert!(report.is_success());
    mock.assert_async().await;
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn checksum_mismatch_fails_prepare_with_empty_package() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/src.tar")
      .with_body("not what you expected")
      .create_async()
      .await;

    let temp = TempDir::new().unwrap();
    let mut config = engine_config(temp.path());
    config.preserve_failed = true;
    let prepare = format!(
      "download('{}/src.tar', 'src.tar', '{}')",
      server.url(),
      "0".repeat(64)
    );
    let report = Engine::new(config)
      .unwrap()
      .build(request(&definition(&prepare), X86))
      .await
      .unwrap();
    let BuildOutcome::Failed(failure) = single(report) else {
      panic!("expected a failure");
    };
    assert_eq!(failure.phase, Some(Phase::Prepare));
    assert_eq!(failure.kind, ErrorKind::Io);

    let workspace = failure.workspace.unwrap();
    assert_eq!(fs::read_dir(workspace.join("pkg")).unwrap().count(), 0);
    assert!(!workspace.join("src/src.tar").exists());
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn http_error_is_network_error() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/missing.tar")
      .with_status(404)
      .create_async()
      .await;

    let temp = TempDir::new().unwrap();
    let prepare = format!("download('{}/missing.tar', 'missing.tar')", server.url());
    let report = engine(temp.path()).build(request(&definition(&prepare), X86)).await.unwrap();
    let BuildOutcome::Failed(failure) = single(report) else {
      panic!("expected a failure");
    };
    assert_eq!(failure.kind, ErrorKind::Network);
    assert!(failure.message.contains("404"), "{}", failure.message);
  }
}

mod pure {
  use super::*;

  async fn run_prepare(prepare: &str) -> BuildOutcome {
    let temp = TempDir::new().unwrap();
    let body = format!("{prepare}\nfile_save('out/ok', 'ok')");
    single(engine(temp.path()).build(request(&definition(&body), X86)).await.unwrap())
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn digests_agree() {
    let outcome = run_prepare(
      "file_save('data', 'payload')\n\
       local a = sha256sum_string('payload')\n\
       assert(a == sha256sum_string('payload'))\n\
       assert(a == sha256sum_file('data'))\n\
       assert(#a == 64 and a == a:lower())\n\
       assert(verify_sha256('data', a:upper()))",
    )
    .await;
    assert!(matches!(outcome, BuildOutcome::Packaged(_)), "{outcome:?}");
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn regex_no_match_vs_bad_pattern() {
    let outcome = run_prepare("assert(#regex_match('abc', 'x(y)') == 0)").await;
    assert!(matches!(outcome, BuildOutcome::Packaged(_)), "{outcome:?}");

    let BuildOutcome::Failed(failure) = run_prepare("regex_match('abc', '(')").await else {
      panic!("expected a failure");
    };
    assert_eq!(failure.kind, ErrorKind::Pattern);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn exec_runs_with_build_environment() {
    let outcome = run_prepare(
      "local out = exec('printf %s \"$ARCH:$LANG\"')\n\
       assert(out == 'x86_64:C', out)\n\
       assert(exec('pwd') == SRC_DIR)",
    )
    .await;
    assert!(matches!(outcome, BuildOutcome::Packaged(_)), "{outcome:?}");
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn exec_failure_is_runtime_error() {
    let BuildOutcome::Failed(failure) = run_prepare("exec('exit 3')").await else {
      panic!("expected a failure");
    };
    assert_eq!(failure.kind, ErrorKind::Runtime);
  }
}
