//! Implementation of the `stagecraft up` command.
//!
//! Builds from a runner descriptor: the descriptor selects the spec file,
//! the build context, and the argument overrides, so the invocation carries
//! no pipeline-specific flags of its own.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use stagecraft_lib::execute::{ExecuteConfig, run_pipeline};
use stagecraft_lib::runner;
use stagecraft_lib::spec::parser;

use crate::output;

use super::print_summary;

pub fn cmd_up(config_path: &Path, build_root: &Path, parallelism: Option<usize>) -> Result<()> {
  let descriptor = runner::load(config_path).context("Failed to load runner config")?;
  let base_dir = config_path.parent().unwrap_or(Path::new("."));

  let spec_path = descriptor.spec_path(base_dir);
  let context = descriptor.context_dir(base_dir);

  if let Some(name) = &descriptor.name {
    output::print_info(name);
  }
  info!(spec = %spec_path.display(), context = %context.display(), "starting build from descriptor");

  let spec = parser::load(&spec_path).with_context(|| format!("Failed to load spec {}", spec_path.display()))?;

  let mut config = ExecuteConfig::default();
  if let Some(parallelism) = parallelism {
    config.parallelism = parallelism;
  }

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let started = Instant::now();
  let result = rt
    .block_on(run_pipeline(
      &spec,
      descriptor.overrides(),
      &context,
      build_root,
      &config,
    ))
    .context("Build failed")?;

  print_summary(&spec, &result, started.elapsed());

  if !result.is_success() {
    std::process::exit(1);
  }

  Ok(())
}
