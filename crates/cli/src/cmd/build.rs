//! Implementation of the `stagecraft build` command.
//!
//! Executes a specification file wave by wave and prints a per-stage
//! summary. Any stage failure aborts the pipeline; the process exits
//! nonzero and no image path is printed.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use stagecraft_lib::execute::{ExecuteConfig, run_pipeline};
use stagecraft_lib::spec::parser;

use super::{parse_overrides, print_summary};

pub fn cmd_build(spec_path: &Path, args: &[String], build_root: &Path, parallelism: Option<usize>) -> Result<()> {
  let overrides = parse_overrides(args)?;

  let spec = parser::load(spec_path).with_context(|| format!("Failed to load spec {}", spec_path.display()))?;
  let context = spec_path.parent().unwrap_or(Path::new(".")).to_path_buf();

  let mut config = ExecuteConfig::default();
  if let Some(parallelism) = parallelism {
    config.parallelism = parallelism;
  }

  info!(spec = %spec_path.display(), build_root = %build_root.display(), "starting build");

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let started = Instant::now();
  let result = rt
    .block_on(run_pipeline(&spec, &overrides, &context, build_root, &config))
    .context("Build failed")?;

  print_summary(&spec, &result, started.elapsed());

  if !result.is_success() {
    std::process::exit(1);
  }

  Ok(())
}
