//! Pre-execution planning.
//!
//! A plan is everything the pipeline decides before running anything: parsed
//! stages, resolved per-stage arguments, the dependency graph, and the
//! execution waves. Every declaration error a build would hit surfaces here,
//! which is what backs the CLI's dry-run commands.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::execute::BuildError;
use crate::graph::{ResolvedBase, StageGraph};
use crate::spec::{BuildSpec, parser, resolve_scopes};

/// One stage of a computed plan.
#[derive(Debug, Clone, Serialize)]
pub struct StagePlan {
  pub index: usize,
  pub name: Option<String>,
  /// Display form of the resolved base: an image reference, or the label of
  /// a prior stage.
  pub base: String,
  pub base_is_stage: bool,
  /// Direct dependencies (base stage and copy sources), by index.
  pub depends_on: Vec<usize>,
  /// Resolved argument bindings of this stage's scope.
  pub args: BTreeMap<String, String>,
  pub instructions: usize,
}

/// The computed plan for one specification.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
  pub stages: Vec<StagePlan>,
  /// Stage indices grouped into parallel execution waves.
  pub waves: Vec<Vec<usize>>,
}

/// Compute the plan for an already-parsed specification.
pub fn compute_plan(spec: &BuildSpec, overrides: &BTreeMap<String, String>) -> Result<Plan, BuildError> {
  let args = resolve_scopes(spec, overrides)?;
  let graph = StageGraph::build(spec, &args)?;

  let stages = spec
    .stages
    .iter()
    .enumerate()
    .map(|(index, stage)| {
      let (base, base_is_stage) = match graph.base(index) {
        ResolvedBase::Image(reference) => (reference.clone(), false),
        ResolvedBase::Stage(source) => (spec.stages[*source].label(*source), true),
      };

      StagePlan {
        index,
        name: stage.name.clone(),
        base,
        base_is_stage,
        depends_on: graph.dependencies(index),
        args: args.stages[index].bindings(),
        instructions: stage.instructions.len(),
      }
    })
    .collect();

  Ok(Plan {
    stages,
    waves: graph.waves(),
  })
}

/// Load a specification file and compute its plan.
pub fn plan_file(spec_path: &Path, overrides: &BTreeMap<String, String>) -> Result<Plan, BuildError> {
  let spec = parser::load(spec_path)?;
  compute_plan(&spec, overrides)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::spec::parser::parse;

  #[test]
  fn plan_reports_bases_waves_and_args() {
    let spec = parse(
      "ARG TAG=12\nFROM debian:${TAG} AS base\nFROM base AS py\nARG PYTHON_VER=3.12\nFROM debian:${TAG} AS final\nCOPY --from=py /opt /opt\n",
    )
    .unwrap();

    let plan = compute_plan(&spec, &BTreeMap::new()).unwrap();

    assert_eq!(plan.stages.len(), 3);
    assert_eq!(plan.stages[0].base, "debian:12");
    assert!(!plan.stages[0].base_is_stage);
    assert_eq!(plan.stages[1].base, "base");
    assert!(plan.stages[1].base_is_stage);
    assert_eq!(plan.stages[1].args.get("PYTHON_VER").map(String::as_str), Some("3.12"));
    assert_eq!(plan.stages[2].depends_on, vec![1]);

    assert_eq!(plan.waves, vec![vec![0], vec![1], vec![2]]);
  }

  #[test]
  fn plan_serializes_to_json() {
    let spec = parse("FROM scratch AS only\n").unwrap();
    let plan = compute_plan(&spec, &BTreeMap::new()).unwrap();

    let json = serde_json::to_string(&plan).unwrap();
    assert!(json.contains("\"only\""));
  }
}
