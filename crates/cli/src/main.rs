mod cmd;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cmd::{BuildArgs, InfoArgs, VersionArgs};

/// buildpkg - run package build definitions in a sandbox
#[derive(Parser)]
#[command(name = "buildpkg")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging (RUST_LOG takes precedence)
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build a package definition into a staged package tree
  Build(BuildArgs),

  /// Show the metadata a definition declares
  Info(InfoArgs),

  /// Resolve the upstream version without building
  Version(VersionArgs),
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  match cli.command {
    Commands::Build(args) => cmd::cmd_build(args),
    Commands::Info(args) => cmd::cmd_info(args),
    Commands::Version(args) => cmd::cmd_version(args),
  }
}
