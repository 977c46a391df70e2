//! Implementation of the `stagecraft args` command.
//!
//! Dumps the per-stage resolved argument scopes, making the scoping rule
//! inspectable: a declaration shows up only in the stages that carry it,
//! and an undeclared reference has nothing to show.

use std::path::Path;

use anyhow::{Context, Result};

use stagecraft_lib::spec::{parser, resolve_scopes};

use crate::output;

use super::parse_overrides;

pub fn cmd_args(spec_path: &Path, args: &[String]) -> Result<()> {
  let overrides = parse_overrides(args)?;

  let spec = parser::load(spec_path).with_context(|| format!("Failed to load spec {}", spec_path.display()))?;
  let resolved = resolve_scopes(&spec, &overrides).context("Failed to resolve arguments")?;

  if !spec.preamble.is_empty() {
    output::print_info("preamble");
    for decl in &spec.preamble {
      let value = resolved.preamble.get(&decl.name).unwrap_or("(unset)");
      output::print_stat(&decl.name, value);
    }
  }

  for (index, stage) in spec.stages.iter().enumerate() {
    output::print_info(&format!("stage {}", stage.label(index)));
    let scope = &resolved.stages[index];

    let mut any = false;
    for decl in stage.arg_decls() {
      let value = scope.get(&decl.name).unwrap_or("(unset)");
      output::print_stat(&decl.name, value);
      any = true;
    }
    if !any {
      output::print_stat("args", "(none declared)");
    }
  }

  Ok(())
}
