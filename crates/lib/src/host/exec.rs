//! Subprocess execution for build steps.
//!
//! Commands run through `/bin/sh -c` in an isolated environment:
//! - all inherited variables are cleared
//! - `PATH` comes from configuration
//! - `HOME` is `/homeless-shelter`
//! - `TMPDIR`/`TMP`/`TEMP` point at a directory inside `SRC_DIR`
//! - `LANG`/`LC_ALL` are `C` and `SOURCE_DATE_EPOCH` is fixed
//!
//! The child is killed when the build's interrupt trips.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::interrupt::{Interrupt, InterruptReason};

/// 1980-01-01T00:00:00Z, the ZIP epoch.
const SOURCE_DATE_EPOCH: &str = "315532800";
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct ExecConfig {
  /// When false, `exec` raises a capability error.
  pub enabled: bool,
  pub shell: String,
  /// `PATH` handed to every command.
  pub path: String,
}

impl Default for ExecConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      shell: "/bin/sh".to_string(),
      path: std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string()),
    }
  }
}

#[derive(Debug, Error)]
pub enum ExecError {
  #[error("exec is disabled by engine configuration")]
  Disabled,

  #[error("failed to spawn '{cmd}': {source}")]
  Spawn {
    cmd: String,
    #[source]
    source: std::io::Error,
  },

  #[error("command failed with exit code {code:?}: {cmd}\n{stderr}")]
  Failed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("command '{cmd}' {reason}")]
  Interrupted { cmd: String, reason: InterruptReason },
}

/// Runs `cmd` in `cwd` and returns its trimmed stdout.
///
/// `env` is merged over the isolated base environment.
pub async fn run(
  config: &ExecConfig,
  cmd: &str,
  cwd: &Path,
  tmp_dir: &Path,
  env: &BTreeMap<String, String>,
  interrupt: &Interrupt,
) -> Result<String, ExecError> {
  if !config.enabled {
    return Err(ExecError::Disabled);
  }
  info!(cmd = %cmd, "executing command");

  let spawn_err = |source| ExecError::Spawn {
    cmd: cmd.to_string(),
    source,
  };
  tokio::fs::create_dir_all(tmp_dir).await.map_err(spawn_err)?;

  let mut command = Command::new(&config.shell);
  command
    .arg("-c")
    .arg(cmd)
    .current_dir(cwd)
    .env_clear()
    .env("PATH", &config.path)
    .env("HOME", "/homeless-shelter")
    .env("TMPDIR", tmp_dir)
    .env("TMP", tmp_dir)
    .env("TEMP", tmp_dir)
    .env("LANG", "C")
    .env("LC_ALL", "C")
    .env("SOURCE_DATE_EPOCH", SOURCE_DATE_EPOCH)
    .envs(env)
    .stdin(Stdio::null())
    .kill_on_drop(true);

  debug!(shell = %config.shell, cwd = %cwd.display(), "spawning process");

  let output = tokio::select! {
    output = command.output() => output.map_err(spawn_err)?,
    reason = interrupt.tripped() => {
      warn!(cmd = %cmd, %reason, "killing command");
      return Err(ExecError::Interrupted { cmd: cmd.to_string(), reason });
    }
  };

  let stdout = String::from_utf8_lossy(&output.stdout);
  let stderr = String::from_utf8_lossy(&output.stderr);
  if !stderr.is_empty() {
    debug!(stderr = %stderr, "command stderr");
  }

  if !output.status.success() {
    return Err(ExecError::Failed {
      cmd: cmd.to_string(),
      code: output.status.code(),
      stderr: tail(&stderr, STDERR_TAIL_LINES),
    });
  }

  let stdout = stdout.trim().to_string();
  if !stdout.is_empty() {
    debug!(stdout = %stdout, "command output");
  }
  Ok(stdout)
}

fn tail(text: &str, lines: usize) -> String {
  let all: Vec<&str> = text.trim_end().lines().collect();
  all[all.len().saturating_sub(lines)..].join("\n")
}
