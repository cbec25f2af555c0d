use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use buildpkg_lib::build::{Engine, EngineConfig};
use buildpkg_lib::definition::DefinitionSource;

use super::runtime;
use crate::output::{OutputFormat, print_info, print_json, print_stat};

#[derive(Args, Debug)]
pub struct InfoArgs {
  /// Definition file, or a directory containing buildpkg.lua
  #[arg(default_value = ".")]
  path: PathBuf,

  /// Output format
  #[arg(short = 'o', long, value_enum, default_value = "text")]
  output: OutputFormat,
}

pub fn cmd_info(args: InfoArgs) -> Result<()> {
  let source = DefinitionSource::from_path(&args.path)
    .with_context(|| format!("Failed to read definition {}", args.path.display()))?;

  let rt = runtime()?;
  let definition = rt.block_on(async {
    let config = EngineConfig {
      cache_dir: None,
      ..EngineConfig::default()
    };
    let engine = Engine::new(config).context("Failed to start build engine")?;
    engine.inspect(source).await.context("Failed to load definition")
  })?;

  if args.output.is_json() {
    return print_json(&definition);
  }

  print_info(&definition.name);
  let optional = [
    ("Description", &definition.description),
    ("URL", &definition.url),
    ("License", &definition.license),
    ("Version", &definition.version),
  ];
  for (label, value) in optional {
    if let Some(value) = value {
      print_stat(label, value);
    }
  }
  let arch = definition.arch.iter().map(|a| a.as_str()).collect::<Vec<_>>();
  print_stat("Arch", &arch.join(", "));

  let lists = [
    ("Maintainers", definition.maintainers.clone()),
    ("Provides", definition.provides.iter().cloned().collect()),
    ("Depends", definition.dependencies.clone()),
    ("Build depends", definition.build_dependencies.clone()),
    ("Optional", definition.optional_dependencies.clone()),
    ("Conflicts", definition.conflicts.clone()),
    ("Replaces", definition.replaces.clone()),
  ];
  for (label, values) in lists {
    if !values.is_empty() {
      print_stat(label, &values.join(", "));
    }
  }
  if definition.dev {
    print_stat("Development", "yes");
  }
  Ok(())
}
