//! Implementation of the `buildpkg version` command: runs only the `VERSION`
//! hook, the way update checks do.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;

use buildpkg_lib::build::{BuildMode, BuildOutcome, BuildRequest, Engine};
use buildpkg_lib::definition::DefinitionSource;
use buildpkg_lib::interrupt::CancelToken;

use super::{ArchArgs, EngineArgs, cancel_on_ctrl_c, runtime};
use crate::output::{OutputFormat, print_error, print_json};

#[derive(Args, Debug)]
pub struct VersionArgs {
  /// Definition file, or a directory containing buildpkg.lua
  #[arg(default_value = ".")]
  path: PathBuf,

  #[command(flatten)]
  arch: ArchArgs,

  #[command(flatten)]
  engine: EngineArgs,

  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text")]
  output: OutputFormat,
}

pub fn cmd_version(args: VersionArgs) -> Result<()> {
  let source = DefinitionSource::from_path(&args.path)
    .with_context(|| format!("Failed to read definition {}", args.path.display()))?;

  let cancel = CancelToken::new();
  let request = BuildRequest::new(source)
    .arch(args.arch.selection())
    .mode(BuildMode::VersionOnly)
    .cancel(cancel.clone());

  let rt = runtime()?;
  let report = rt.block_on(async {
    let engine = Engine::new(args.engine.config()).context("Failed to start build engine")?;
    let watcher = cancel_on_ctrl_c(cancel);
    let report = engine.build(request).await;
    watcher.abort();
    report.context("Version check failed")
  })?;

  if args.output.is_json() {
    print_json(&report.outcomes)?;
  } else {
    for outcome in &report.outcomes {
      match outcome {
        BuildOutcome::Versioned(v) => {
          println!("{} {} {}", v.name, v.arch, v.version.as_deref().unwrap_or("unknown"));
        }
        BuildOutcome::Failed(failure) => print_error(&failure.to_string()),
        BuildOutcome::Packaged(_) => {}
      }
    }
  }

  if !report.is_success() {
    bail!("version check failed");
  }
  Ok(())
}
