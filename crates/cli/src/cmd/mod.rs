mod args;
mod build;
mod plan;
mod up;

pub use args::cmd_args;
pub use build::cmd_build;
pub use plan::cmd_plan;
pub use up::cmd_up;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Result, bail};
use stagecraft_lib::execute::{PipelineResult, StageState};
use stagecraft_lib::spec::BuildSpec;

use crate::output;

/// Parse repeated `NAME=VALUE` override flags.
pub(crate) fn parse_overrides(args: &[String]) -> Result<BTreeMap<String, String>> {
  let mut overrides = BTreeMap::new();
  for arg in args {
    match arg.split_once('=') {
      Some((name, value)) if !name.is_empty() => {
        overrides.insert(name.to_string(), value.to_string());
      }
      _ => bail!("invalid argument override {arg:?}, expected NAME=VALUE"),
    }
  }
  Ok(overrides)
}

/// Print the per-stage outcome and totals of a pipeline run.
pub(crate) fn print_summary(spec: &BuildSpec, result: &PipelineResult, elapsed: Duration) {
  println!();

  for (index, stage) in spec.stages.iter().enumerate() {
    let label = stage.label(index);
    match result.state(index) {
      StageState::Complete => output::print_success(&label),
      StageState::Failed => output::print_error(&format!("{label} (failed)")),
      StageState::Skipped => output::print_warning(&format!("{label} (skipped)")),
      state => output::print_info(&format!("{label} ({state})")),
    }
  }

  println!();
  output::print_stat("stages", &format!("{}/{}", result.completed.len(), spec.stages.len()));
  output::print_stat("elapsed", &output::format_duration(elapsed));

  if let Some((index, err)) = &result.failed {
    let label = spec.stages[*index].label(*index);
    output::print_error(&format!("stage {label} failed: {err}"));
  }

  if let Some(image) = &result.image_root {
    output::print_success(&format!("image {} {}", output::symbols::ARROW, image.display()));
  }
}
