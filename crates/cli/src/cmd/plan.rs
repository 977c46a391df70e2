//! Implementation of the `stagecraft plan` command.
//!
//! Parses and validates a specification without executing anything: every
//! declaration error a build would hit (malformed spec, unknown override,
//! unresolved reference, cycle) surfaces here.

use std::path::Path;

use anyhow::{Context, Result};

use stagecraft_lib::plan::plan_file;

use crate::output;

use super::parse_overrides;

pub fn cmd_plan(spec_path: &Path, args: &[String], json: bool) -> Result<()> {
  let overrides = parse_overrides(args)?;

  let plan = plan_file(spec_path, &overrides)
    .with_context(|| format!("Failed to plan {}", spec_path.display()))?;

  if json {
    return output::print_json(&plan);
  }

  for stage in &plan.stages {
    let label = stage.name.clone().unwrap_or_else(|| stage.index.to_string());
    let base = if stage.base_is_stage {
      format!("stage {}", stage.base)
    } else {
      stage.base.clone()
    };
    output::print_info(&format!(
      "{label} {} {base} ({} instructions)",
      output::symbols::ARROW,
      stage.instructions
    ));

    for (name, value) in &stage.args {
      output::print_stat(name, value);
    }
  }

  println!();
  for (index, wave) in plan.waves.iter().enumerate() {
    let members: Vec<String> = wave
      .iter()
      .map(|&i| plan.stages[i].name.clone().unwrap_or_else(|| i.to_string()))
      .collect();
    output::print_stat(&format!("wave {index}"), &members.join(", "));
  }

  output::print_success(&format!("{} stage(s), {} wave(s)", plan.stages.len(), plan.waves.len()));

  Ok(())
}
