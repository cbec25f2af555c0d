//! Implementation of the `buildpkg build` command.
//!
//! Runs the full lifecycle and writes one `<name>-<version>-<arch>.json`
//! record per packaged architecture.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::info;

use buildpkg_lib::build::{BuildOutcome, BuildRequest, Engine, PackageRecord};
use buildpkg_lib::definition::DefinitionSource;
use buildpkg_lib::interrupt::CancelToken;

use super::{ArchArgs, EngineArgs, cancel_on_ctrl_c, runtime};
use crate::output::{
  OutputFormat, format_bytes, format_duration, print_error, print_json, print_stat, print_success, short_digest, symbols,
};

#[derive(Args, Debug)]
pub struct BuildArgs {
  /// Definition file, or a directory containing buildpkg.lua
  #[arg(default_value = ".")]
  path: PathBuf,

  #[command(flatten)]
  arch: ArchArgs,

  #[command(flatten)]
  engine: EngineArgs,

  /// Fail unless a version is resolved before PREPARE
  #[arg(long)]
  require_version: bool,

  /// Directory for package records (default: next to the definition)
  #[arg(long)]
  out: Option<PathBuf>,

  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text")]
  output: OutputFormat,
}

pub fn cmd_build(args: BuildArgs) -> Result<()> {
  let start = Instant::now();
  let source = DefinitionSource::from_path(&args.path)
    .with_context(|| format!("Failed to read definition {}", args.path.display()))?;
  let out_dir = args
    .out
    .clone()
    .or_else(|| source.dir().map(Path::to_path_buf))
    .unwrap_or_else(|| PathBuf::from("."));

  let cancel = CancelToken::new();
  let request = BuildRequest::new(source)
    .arch(args.arch.selection())
    .require_version(args.require_version)
    .cancel(cancel.clone());

  let rt = runtime()?;
  let report = rt.block_on(async {
    let engine = Engine::new(args.engine.config()).context("Failed to start build engine")?;
    let watcher = cancel_on_ctrl_c(cancel);
    let report = engine.build(request).await;
    watcher.abort();
    report.context("Build failed")
  })?;

  for record in report.packaged() {
    write_record(&out_dir, record)?;
  }

  if args.output.is_json() {
    print_json(&report.outcomes)?;
  } else {
    for outcome in &report.outcomes {
      match outcome {
        BuildOutcome::Packaged(record) => print_record(record),
        BuildOutcome::Failed(failure) => print_error(&failure.to_string()),
        BuildOutcome::Versioned(_) => {}
      }
    }
    print_stat("Duration", &format_duration(start.elapsed()));
  }

  let failed = report.failures().count();
  if failed > 0 {
    bail!("{failed} of {} build(s) failed", report.outcomes.len());
  }
  Ok(())
}

fn write_record(out_dir: &Path, record: &PackageRecord) -> Result<()> {
  fs::create_dir_all(out_dir).with_context(|| format!("Failed to create {}", out_dir.display()))?;
  let path = out_dir.join(record.file_name());
  let json = serde_json::to_string_pretty(record).context("Failed to serialize package record")?;
  fs::write(&path, format!("{json}\n")).with_context(|| format!("Failed to write {}", path.display()))?;
  info!(path = %path.display(), "wrote package record");
  Ok(())
}

fn print_record(record: &PackageRecord) {
  let size: u64 = record.files.iter().filter_map(|f| f.size).sum();
  print_success(&format!(
    "{} {} ({}) {} {}",
    record.name,
    record.version,
    record.arch,
    symbols::ARROW,
    record.pkg_dir.display()
  ));
  print_stat("Files", &format!("{} ({})", record.files.len(), format_bytes(size)));
  print_stat("Tree", short_digest(&record.tree_sha256));
}
