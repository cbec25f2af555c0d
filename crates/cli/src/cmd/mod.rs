mod build;
mod info;
mod version;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::warn;

use buildpkg_lib::arch::Arch;
use buildpkg_lib::build::{ArchSelection, EngineConfig};
use buildpkg_lib::interrupt::CancelToken;
use buildpkg_lib::stage::LinkPolicy;

pub use build::{BuildArgs, cmd_build};
pub use info::{InfoArgs, cmd_info};
pub use version::{VersionArgs, cmd_version};

/// Which architectures to run for.
#[derive(Args, Debug, Clone)]
pub struct ArchArgs {
  /// Target architecture (default: the host's)
  #[arg(long, conflicts_with = "all_arch")]
  arch: Option<Arch>,

  /// Run once for every architecture the definition declares
  #[arg(long)]
  all_arch: bool,
}

impl ArchArgs {
  pub fn selection(&self) -> ArchSelection {
    match (self.arch, self.all_arch) {
      (_, true) => ArchSelection::All,
      (Some(arch), false) => ArchSelection::Arch(arch),
      (None, false) => ArchSelection::Host,
    }
  }
}

/// Engine settings shared by every command that runs hooks.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
  /// Maximum number of builds running at once
  #[arg(short, long)]
  jobs: Option<usize>,

  /// Directory for build workspaces
  #[arg(long, env = "BUILDPKG_WORK_DIR")]
  work_dir: Option<PathBuf>,

  /// Directory for the shared download cache
  #[arg(long, env = "BUILDPKG_CACHE_DIR", conflicts_with = "no_cache")]
  cache_dir: Option<PathBuf>,

  /// Do not use the download cache
  #[arg(long)]
  no_cache: bool,

  /// Time budget per phase (e.g. "30m", "2h")
  #[arg(long, value_parser = humantime::parse_duration)]
  timeout: Option<Duration>,

  /// Keep the workspace of failed builds
  #[arg(long)]
  keep_failed: bool,

  /// Keep SRC_DIR after a successful build
  #[arg(long)]
  keep_sources: bool,

  /// Replace existing files when `link` targets them
  #[arg(long)]
  overwrite_links: bool,

  /// Refuse `exec` calls from definitions
  #[arg(long)]
  no_exec: bool,
}

impl EngineArgs {
  pub fn config(&self) -> EngineConfig {
    let mut config = EngineConfig::default();
    if let Some(jobs) = self.jobs {
      config.parallelism = jobs.max(1);
    }
    if let Some(dir) = &self.work_dir {
      config.work_root = dir.clone();
    }
    if self.no_cache {
      config.cache_dir = None;
    } else if let Some(dir) = &self.cache_dir {
      config.cache_dir = Some(dir.clone());
    }
    if let Some(timeout) = self.timeout {
      config.phase_timeout = Some(timeout);
    }
    config.preserve_failed = self.keep_failed;
    config.keep_sources = self.keep_sources;
    if self.overwrite_links {
      config.link_policy = LinkPolicy::Overwrite;
    }
    config.exec.enabled = !self.no_exec;
    config
  }
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

/// Cancels `token` on Ctrl-C. Abort the returned handle once the work is done.
pub fn cancel_on_ctrl_c(token: CancelToken) -> tokio::task::JoinHandle<()> {
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupted, cancelling running builds");
      token.cancel();
    }
  })
}
