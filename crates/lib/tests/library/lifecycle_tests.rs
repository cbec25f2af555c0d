//! End-to-end lifecycle behaviour of the engine.

use std::fs;
use std::time::Duration;

use buildpkg_lib::arch::Arch;
use buildpkg_lib::build::{ArchSelection, BuildMode, BuildOutcome, BuildRequest, Engine, FileKind, Phase};
use buildpkg_lib::error::ErrorKind;
use buildpkg_lib::interrupt::CancelToken;
use tempfile::TempDir;

use super::common::{engine, engine_config, request, single, source, workspaces};

const X86: ArchSelection = ArchSelection::Arch(Arch::X86_64);

const HELLO: &str = r##"
INFO = {
  name = "hello",
  description = "greets",
  license = "MIT",
  provides = { "greeter" },
  arch = { "x86_64", "aarch64" },
}

function SOURCES()
  file_save("hello.sh", "#!/bin/sh\necho hello from " .. ARCH .. "\n")
end

function VERSION()
  return "1.2.3"
end

function BUILD()
  assert(PKG_VERSION == "1.2.3", "version is bound before BUILD")
  file_save("build/hello", file_load("hello.sh"))
end

function PACKAGE()
  copy("build/hello", "/usr/bin/hello")
  link("hello", "/usr/bin/hi")
end
"##;

mod packaged {
  use super::*;

  #[tokio::test(flavor = "multi_thread")]
  async fn full_lifecycle_produces_record() {
    let temp = TempDir::new().unwrap();
    let report = engine(temp.path()).build(request(HELLO, X86)).await.unwrap();
    let BuildOutcome::Packaged(record) = single(report) else {
      panic!("expected a package");
    };

    assert_eq!(record.name, "hello");
    assert_eq!(record.version, "1.2.3");
    assert_eq!(record.arch, Arch::X86_64);
    assert!(record.provides.contains("greeter"));

    let paths: Vec<_> = record.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, ["usr", "usr/bin", "usr/bin/hello", "usr/bin/hi"]);
    assert_eq!(record.files[3].kind, FileKind::Symlink);

    let installed = fs::read_to_string(record.pkg_dir.join("usr/bin/hello")).unwrap();
    assert_eq!(installed, "#!/bin/sh\necho hello from x86_64\n");

    let workspace = record.pkg_dir.parent().unwrap();
    assert!(!workspace.join("src").exists(), "sources are removed after success");
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn keep_sources_leaves_src_dir() {
    let temp = TempDir::new().unwrap();
    let mut config = engine_config(temp.path());
    config.keep_sources = true;
    let report = Engine::new(config).unwrap().build(request(HELLO, X86)).await.unwrap();
    let BuildOutcome::Packaged(record) = single(report) else {
      panic!("expected a package");
    };
    assert!(record.pkg_dir.parent().unwrap().join("src/hello.sh").exists());
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn all_architectures_build_independently() {
    let temp = TempDir::new().unwrap();
    let report = engine(temp.path())
      .build(request(HELLO, ArchSelection::All))
      .await
      .unwrap();

    let records: Vec<_> = report.packaged().collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].arch, Arch::X86_64);
    assert_eq!(records[1].arch, Arch::Aarch64);
    assert_eq!(records[0].name, records[1].name);
    assert_eq!(records[0].version, records[1].version);
    assert_ne!(records[0].pkg_dir, records[1].pkg_dir);

    let aarch64 = fs::read_to_string(records[1].pkg_dir.join("usr/bin/hello")).unwrap();
    assert!(aarch64.contains("aarch64"));
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn absent_hooks_are_noops() {
    let temp = TempDir::new().unwrap();
    let text = r#"
      INFO = { name = "tiny", arch = { "x86_64" } }
      function PACKAGE()
        assert(PKG_VERSION == nil)
        file_save("README", "tiny")
        copy("README", "/usr/share/doc/tiny/README")
      end
    "#;
    let report = engine(temp.path()).build(request(text, X86)).await.unwrap();
    let BuildOutcome::Packaged(record) = single(report) else {
      panic!("expected a package");
    };
    assert_eq!(record.version, "0.0.0");
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn static_version_is_bound() {
    let temp = TempDir::new().unwrap();
    let text = r#"
      INFO = { name = "fixed", version = "2.0", arch = { "x86_64" } }
      function PACKAGE()
        file_save("v", PKG_VERSION)
        copy("v", "/v")
      end
    "#;
    let report = engine(temp.path()).build(request(text, X86)).await.unwrap();
    let BuildOutcome::Packaged(record) = single(report) else {
      panic!("expected a package");
    };
    assert_eq!(record.version, "2.0");
    assert_eq!(fs::read_to_string(record.pkg_dir.join("v")).unwrap(), "2.0");
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn concurrent_builds_see_disjoint_directories() {
    let temp = TempDir::new().unwrap();
    let text = r#"
      INFO = { name = "probe", arch = { "x86_64" } }
      function BUILD()
        file_save("dirs", SRC_DIR .. "\n" .. PKG_DIR)
      end
      function PACKAGE()
        copy("dirs", "/dirs")
      end
    "#;
    let requests = (0..4).map(|_| request(text, X86)).collect();
    let reports = engine(temp.path()).build_many(requests).await.unwrap();
    assert_eq!(reports.len(), 4);

    let mut pkg_dirs = Vec::new();
    for report in reports {
      let BuildOutcome::Packaged(record) = single(report) else {
        panic!("expected a package");
      };
      let dirs = fs::read_to_string(record.pkg_dir.join("dirs")).unwrap();
      assert!(dirs.ends_with(&*record.pkg_dir.to_string_lossy()));
      pkg_dirs.push(record.pkg_dir);
    }
    pkg_dirs.sort();
    pkg_dirs.dedup();
    assert_eq!(pkg_dirs.len(), 4);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn script_state_does_not_leak_between_builds() {
    let temp = TempDir::new().unwrap();
    let text = r#"
      INFO = { name = "counter", arch = { "x86_64", "aarch64" } }
      COUNT = 0
      function BUILD()
        COUNT = COUNT + 1
        file_save("count", tostring(COUNT))
      end
      function PACKAGE()
        copy("count", "/count")
      end
    "#;
    let report = engine(temp.path())
      .build(request(text, ArchSelection::All))
      .await
      .unwrap();
    for record in report.packaged() {
      assert_eq!(fs::read_to_string(record.pkg_dir.join("count")).unwrap(), "1");
    }
    assert!(report.is_success());
  }
}

mod versioned {
  use super::*;

  #[tokio::test(flavor = "multi_thread")]
  async fn version_only_skips_other_phases() {
    let temp = TempDir::new().unwrap();
    let req = BuildRequest::new(source(HELLO)).arch(X86).mode(BuildMode::VersionOnly);
    let report = engine(temp.path()).build(req).await.unwrap();
    let BuildOutcome::Versioned(version) = single(report) else {
      panic!("expected a version report");
    };
    assert_eq!(version.name, "hello");
    assert_eq!(version.version.as_deref(), Some("1.2.3"));
    assert_eq!(workspaces(temp.path()), 0);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn required_version_must_resolve() {
    let temp = TempDir::new().unwrap();
    let text = r#"
      INFO = { name = "unversioned", arch = { "x86_64" } }
      prepared = false
      function VERSION() return nil end
      function PREPARE() prepared = true end
    "#;
    let req = request(text, X86).require_version(true);
    let report = engine(temp.path()).build(req).await.unwrap();
    let BuildOutcome::Failed(failure) = single(report) else {
      panic!("expected a failure");
    };
    assert_eq!(failure.phase, Some(Phase::Version));
    assert_eq!(failure.kind, ErrorKind::Definition);
  }
}

mod failed {
  use super::*;

  #[tokio::test(flavor = "multi_thread")]
  async fn missing_name_runs_no_hook() {
    let temp = TempDir::new().unwrap();
    let text = r#"
      INFO = { description = "nameless" }
      function SOURCES() file_save("ran", "yes") end
    "#;
    let report = engine(temp.path()).build(request(text, X86)).await.unwrap();
    let BuildOutcome::Failed(failure) = single(report) else {
      panic!("expected a failure");
    };
    assert_eq!(failure.kind, ErrorKind::Definition);
    assert_eq!(failure.phase, None);
    assert_eq!(workspaces(temp.path()), 0);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn syntax_error_is_parse_error() {
    let temp = TempDir::new().unwrap();
    let report = engine(temp.path())
      .build(request("INFO = { name = ", X86))
      .await
      .unwrap();
    let BuildOutcome::Failed(failure) = single(report) else {
      panic!("expected a failure");
    };
    assert_eq!(failure.kind, ErrorKind::Parse);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn undeclared_arch_rejected_before_sources() {
    let temp = TempDir::new().unwrap();
    let report = engine(temp.path())
      .build(request(HELLO, ArchSelection::Arch(Arch::Riscv64)))
      .await
      .unwrap();
    let BuildOutcome::Failed(failure) = single(report) else {
      panic!("expected a failure");
    };
    assert_eq!(failure.kind, ErrorKind::Definition);
    assert_eq!(failure.arch, Some(Arch::Riscv64));
    assert_eq!(failure.phase, None);
    assert_eq!(workspaces(temp.path()), 0);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn empty_package_fails() {
    let temp = TempDir::new().unwrap();
    let text = r#"
      INFO = { name = "empty", arch = { "x86_64" } }
      function BUILD() file_save("obj", "x") end
    "#;
    let report = engine(temp.path()).build(request(text, X86)).await.unwrap();
    let BuildOutcome::Failed(failure) = single(report) else {
      panic!("expected a failure");
    };
    assert_eq!(failure.phase, Some(Phase::Package));
    assert_eq!(failure.kind, ErrorKind::EmptyPackage);
    assert_eq!(workspaces(temp.path()), 0);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn runtime_error_stops_lifecycle() {
    let temp = TempDir::new().unwrap();
    let mut config = engine_config(temp.path());
    config.preserve_failed = true;
    let text = r#"
      INFO = { name = "broken", arch = { "x86_64" } }
      function BUILD() error("compiler exploded") end
      function PACKAGE() file_save("packaged", "yes") end
    "#;
    let report = Engine::new(config).unwrap().build(request(text, X86)).await.unwrap();
    let BuildOutcome::Failed(failure) = single(report) else {
      panic!("expected a failure");
    };
    assert_eq!(failure.phase, Some(Phase::Build));
    assert_eq!(failure.kind, ErrorKind::Runtime);
    assert!(failure.message.contains("compiler exploded"));

    let workspace = failure.workspace.expect("workspace is preserved");
    assert!(workspace.join("src").exists());
    assert!(!workspace.join("src/packaged").exists());
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn phase_timeout() {
    let temp = TempDir::new().unwrap();
    let mut config = engine_config(temp.path());
    config.phase_timeout = Some(Duration::from_millis(200));
    let text = r#"
      INFO = { name = "spin", arch = { "x86_64" } }
      function BUILD() while true do end end
    "#;
    let report = Engine::new(config).unwrap().build(request(text, X86)).await.unwrap();
    let BuildOutcome::Failed(failure) = single(report) else {
      panic!("expected a failure");
    };
    assert_eq!(failure.phase, Some(Phase::Build));
    assert_eq!(failure.kind, ErrorKind::Timeout);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn cancellation_mid_phase() {
    let temp = TempDir::new().unwrap();
    let cancel = CancelToken::new();
    let text = r#"
      INFO = { name = "spin", arch = { "x86_64", "aarch64" } }
      function BUILD() while true do end end
    "#;
    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(200)).await;
      trigger.cancel();
    });

    let req = request(text, ArchSelection::All).cancel(cancel);
    let report = engine(temp.path()).build(req).await.unwrap();
    assert_eq!(report.failures().count(), 2);
    for failure in report.failures() {
      assert_eq!(failure.phase, Some(Phase::Build));
      assert_eq!(failure.kind, ErrorKind::Cancelled);
    }
    assert_eq!(workspaces(temp.path()), 0);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn top_level_loop_times_out() {
    let temp = TempDir::new().unwrap();
    let mut config = engine_config(temp.path());
    config.phase_timeout = Some(Duration::from_millis(200));
    let text = r#"
      INFO = { name = "spin", arch = { "x86_64" } }
      while true do end
    "#;
    let engine = Engine::new(config).unwrap();
    let report = tokio::time::timeout(Duration::from_secs(10), engine.build(request(text, X86)))
      .await
      .expect("top-level code is bounded")
      .unwrap();
    let BuildOutcome::Failed(failure) = single(report) else {
      panic!("expected a failure");
    };
    assert_eq!(failure.phase, None);
    assert_eq!(failure.kind, ErrorKind::Timeout);
    assert_eq!(workspaces(temp.path()), 0);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn top_level_loop_is_cancellable() {
    let temp = TempDir::new().unwrap();
    let mut config = engine_config(temp.path());
    config.phase_timeout = None;
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(200)).await;
      trigger.cancel();
    });

    let text = r#"
      INFO = { name = "spin", arch = { "x86_64" } }
      while true do end
    "#;
    let engine = Engine::new(config).unwrap();
    let report = tokio::time::timeout(Duration::from_secs(10), engine.build(request(text, X86).cancel(cancel)))
      .await
      .expect("cancellation reaches top-level code")
      .unwrap();
    let BuildOutcome::Failed(failure) = single(report) else {
      panic!("expected a failure");
    };
    assert_eq!(failure.phase, None);
    assert_eq!(failure.kind, ErrorKind::Cancelled);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn version_with_path_components_is_rejected() {
    let temp = TempDir::new().unwrap();
    let text = r#"
      INFO = { name = "evil", arch = { "x86_64" } }
      function VERSION() return "/../../escaped" end
      function PACKAGE() file_save("x", "x") end
    "#;
    let report = engine(temp.path()).build(request(text, X86)).await.unwrap();
    let BuildOutcome::Failed(failure) = single(report) else {
      panic!("expected a failure");
    };
    assert_eq!(failure.phase, Some(Phase::Version));
    assert_eq!(failure.kind, ErrorKind::Runtime);
    assert_eq!(workspaces(temp.path()), 0);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn cancelled_before_start() {
    let temp = TempDir::new().unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();
    let report = engine(temp.path())
      .build(request(HELLO, X86).cancel(cancel))
      .await
      .unwrap();
    let BuildOutcome::Failed(failure) = single(report) else {
      panic!("expected a failure");
    };
    assert_eq!(failure.phase, Some(Phase::Sources));
    assert_eq!(failure.kind, ErrorKind::Cancelled);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn one_arch_failing_leaves_the_other() {
    let temp = TempDir::new().unwrap();
    let text = r#"
      INFO = { name = "picky", arch = { "x86_64", "aarch64" } }
      function BUILD()
        if ARCH == "aarch64" then error("unsupported toolchain") end
        file_save("bin", ARCH)
      end
      function PACKAGE() copy("bin", "/bin/picky") end
    "#;
    let report = engine(temp.path())
      .build(request(text, ArchSelection::All))
      .await
      .unwrap();
    assert_eq!(report.packaged().count(), 1);
    let failure = report.failures().next().unwrap();
    assert_eq!(failure.arch, Some(Arch::Aarch64));
    assert_eq!(failure.package, "picky");
  }
}
