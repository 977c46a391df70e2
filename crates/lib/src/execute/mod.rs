//! Pipeline execution.
//!
//! This module provides the main entry point for running a build
//! specification. It:
//! - resolves argument scopes and builds the stage graph (declaration
//!   errors surface here, before anything executes)
//! - computes parallel execution waves
//! - executes stages wave by wave on a `JoinSet`, bounded by a semaphore
//! - aborts the whole pipeline on the first failure, recording every
//!   not-yet-run stage as skipped
//!
//! There is no retry and no partial-success state: a failed run leaves no
//! usable composed image, only the per-stage logs for diagnosis.

pub mod actions;
pub mod stage;
pub mod store;
pub mod types;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::graph::{GraphError, StageGraph};
use crate::spec::{BuildSpec, SpecError, resolve_scopes};

use stage::{StageTask, run_stage};

pub use types::{ActionRecord, ExecuteConfig, ExecuteError, ImageConfig, PipelineResult, StageResult, StageState};

/// Errors from a whole pipeline run, including the pre-execution phases.
#[derive(Debug, Error)]
pub enum BuildError {
  /// Specification parse or argument declaration error.
  #[error("spec error: {0}")]
  Spec(#[from] SpecError),

  /// Stage graph validation error.
  #[error("graph error: {0}")]
  Graph(#[from] GraphError),

  /// Stage execution error (also recorded in the [`PipelineResult`]).
  #[error("execution error: {0}")]
  Execute(#[from] ExecuteError),
}

/// Execute a build specification.
///
/// `context` is the directory copy sources and manifests resolve against;
/// `build_root` receives the per-stage snapshot directories.
///
/// Declaration errors (bad spec, unknown override, unresolved reference,
/// cycle) return `Err` before any stage runs. Execution failures are
/// reported inside the returned [`PipelineResult`]: `failed` holds the
/// failing stage and its error, `skipped` every stage that never ran
/// because of it.
pub async fn run_pipeline(
  spec: &BuildSpec,
  overrides: &BTreeMap<String, String>,
  context: &Path,
  build_root: &Path,
  config: &ExecuteConfig,
) -> Result<PipelineResult, BuildError> {
  let args = resolve_scopes(spec, overrides)?;
  let graph = StageGraph::build(spec, &args)?;
  let waves = graph.waves();

  info!(
    stages = spec.stages.len(),
    waves = waves.len(),
    parallelism = config.parallelism,
    "starting pipeline"
  );

  let labels: Vec<String> = spec.stages.iter().enumerate().map(|(i, s)| s.label(i)).collect();

  let tasks: Vec<StageTask> = spec
    .stages
    .iter()
    .enumerate()
    .map(|(index, def)| StageTask {
      index,
      def: def.clone(),
      base: graph.base(index).clone(),
      copy_sources: graph.copy_sources(index).clone(),
      scope: args.stages[index].clone(),
      labels: labels.clone(),
    })
    .collect();

  let mut result = PipelineResult::default();
  let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));

  'waves: for (wave_idx, wave) in waves.iter().enumerate() {
    debug!(wave = wave_idx, stages = wave.len(), "executing wave");

    let mut join_set: JoinSet<(usize, Result<StageResult, ExecuteError>)> = JoinSet::new();

    for &index in wave {
      let task = tasks[index].clone();
      let context = context.to_path_buf();
      let build_root = build_root.to_path_buf();
      let completed = result.completed.clone();
      let config = config.clone();
      let semaphore = Arc::clone(&semaphore);

      join_set.spawn(async move {
        let _permit = semaphore.acquire().await;
        let outcome = run_stage(&task, &context, &build_root, &completed, &config).await;
        (task.index, outcome)
      });
    }

    let mut wave_failed = false;

    while let Some(join_result) = join_set.join_next().await {
      match join_result {
        Ok((index, Ok(stage_result))) => {
          info!(stage = %labels[index], "stage complete");
          result.completed.insert(index, stage_result);
        }
        Ok((index, Err(e))) => {
          error!(stage = %labels[index], error = %e, "stage failed");
          // Keep only the first failure; siblings already in flight drain
          // through the JoinSet but nothing new is scheduled.
          if result.failed.is_none() {
            result.failed = Some((index, e));
          }
          wave_failed = true;
        }
        Err(e) => {
          error!(error = %e, "stage task panicked");
          wave_failed = true;
        }
      }
    }

    if wave_failed {
      break 'waves;
    }
  }

  if let Some((failed_idx, _)) = &result.failed {
    let failed_idx = *failed_idx;
    for index in 0..spec.stages.len() {
      if index != failed_idx && !result.completed.contains_key(&index) {
        warn!(stage = %labels[index], "skipping stage, pipeline aborted");
        result.skipped.insert(index, failed_idx);
      }
    }
  } else if let Some(last) = spec.stages.len().checked_sub(1) {
    // The final stage's snapshot is the composed image.
    result.image_root = result.completed.get(&last).map(|r| r.root.clone());
  }

  info!(
    completed = result.completed.len(),
    failed = result.failed.is_some(),
    skipped = result.skipped.len(),
    "pipeline finished"
  );

  Ok(result)
}
