//! Types for pipeline execution.
//!
//! This module defines the error types, per-stage results, and configuration
//! for executing a stage graph against directory-backed snapshots.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::manifest::ManifestError;

/// Lifecycle of a single stage within one pipeline run.
///
/// `Pending -> Running -> Complete`; `Failed` and `Skipped` are terminal.
/// There is no retry transition: any failure aborts the whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageState {
  Pending,
  Running,
  Complete,
  Failed,
  Skipped,
}

impl std::fmt::Display for StageState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      StageState::Pending => "pending",
      StageState::Running => "running",
      StageState::Complete => "complete",
      StageState::Failed => "failed",
      StageState::Skipped => "skipped",
    };
    write!(f, "{s}")
  }
}

/// Errors that can occur while executing a stage.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// A `RUN` command exited nonzero.
  #[error("command failed with exit code {code:?}: {cmd}")]
  CmdFailed { cmd: String, code: Option<i32> },

  /// An `INSTALL` collaborator script exited nonzero.
  #[error("installer {installer} failed with exit code {code:?}")]
  InstallerFailed { installer: String, code: Option<i32> },

  /// A cross-stage copy named a path the source snapshot does not contain.
  #[error("artifact {path} not found in stage {stage}")]
  ArtifactMissing { stage: String, path: String },

  /// A context copy named a path outside the build context.
  #[error("context path not found: {0}")]
  ContextPathMissing(PathBuf),

  /// Manifest file could not be read.
  #[error("manifest error: {0}")]
  Manifest(#[from] ManifestError),

  /// A stage's base or copy source has no completed result. Graph
  /// validation makes this unreachable in a healthy run.
  #[error("stage {0} result unavailable")]
  DependencyUnavailable(usize),

  /// I/O error while manipulating snapshots.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// One entry of a stage's action log.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
  /// Instruction keyword (`RUN`, `COPY`, ...).
  pub instruction: String,
  /// Expanded operand text.
  pub detail: String,
}

/// Image metadata accumulated by recorded-only instructions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageConfig {
  /// External base image reference at the bottom of this stage's chain.
  pub base: String,
  pub cmd: Option<String>,
  pub entrypoint: Option<String>,
  pub user: Option<String>,
  pub labels: BTreeMap<String, String>,
}

/// Result of executing a single stage.
#[derive(Debug, Clone)]
pub struct StageResult {
  /// The stage's snapshot root directory.
  pub root: PathBuf,
  /// Environment bindings visible to derived stages.
  pub env: BTreeMap<String, String>,
  /// Working directory, relative to the snapshot root.
  pub workdir: PathBuf,
  pub config: ImageConfig,
  /// Ordered log of actions taken, also persisted as `log.json`.
  pub log: Vec<ActionRecord>,
}

/// Result of executing the whole pipeline.
#[derive(Debug, Default)]
pub struct PipelineResult {
  /// Successfully completed stages, by index.
  pub completed: HashMap<usize, StageResult>,

  /// Stage that failed (at most one; execution stops there).
  pub failed: Option<(usize, ExecuteError)>,

  /// Stages never executed because of the failure, mapped to the failed
  /// stage's index.
  pub skipped: HashMap<usize, usize>,

  /// Snapshot root of the final stage, when the pipeline succeeded.
  pub image_root: Option<PathBuf>,
}

impl PipelineResult {
  /// Returns true if every stage completed.
  pub fn is_success(&self) -> bool {
    self.failed.is_none() && self.skipped.is_empty()
  }

  /// Total number of stages accounted for.
  pub fn total(&self) -> usize {
    self.completed.len() + self.failed.iter().count() + self.skipped.len()
  }

  /// Terminal state of a stage after the run.
  pub fn state(&self, index: usize) -> StageState {
    if self.completed.contains_key(&index) {
      StageState::Complete
    } else if self.failed.as_ref().is_some_and(|(failed, _)| *failed == index) {
      StageState::Failed
    } else if self.skipped.contains_key(&index) {
      StageState::Skipped
    } else {
      StageState::Pending
    }
  }
}

/// Configuration for pipeline execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of stages to execute in parallel.
  pub parallelism: usize,

  /// Shell for `RUN` instructions. Defaults to /bin/sh (Unix) or
  /// powershell.exe (Windows).
  pub shell: Option<String>,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      shell: None,
    }
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn stage_result() -> StageResult {
    StageResult {
      root: PathBuf::from("/build/stages/00-base/root"),
      env: BTreeMap::new(),
      workdir: PathBuf::new(),
      config: ImageConfig::default(),
      log: vec![],
    }
  }

  #[test]
  fn empty_result_is_success() {
    let result = PipelineResult::default();
    assert!(result.is_success());
    assert_eq!(result.total(), 0);
  }

  #[test]
  fn failure_is_not_success() {
    let mut result = PipelineResult::default();
    result.failed = Some((
      1,
      ExecuteError::CmdFailed {
        cmd: "make".to_string(),
        code: Some(2),
      },
    ));
    result.skipped.insert(2, 1);

    assert!(!result.is_success());
    assert_eq!(result.total(), 2);
  }

  #[test]
  fn state_reflects_outcome() {
    let mut result = PipelineResult::default();
    result.completed.insert(0, stage_result());
    result.failed = Some((
      1,
      ExecuteError::CmdFailed {
        cmd: "exit 1".to_string(),
        code: Some(1),
      },
    ));
    result.skipped.insert(2, 1);

    assert_eq!(result.state(0), StageState::Complete);
    assert_eq!(result.state(1), StageState::Failed);
    assert_eq!(result.state(2), StageState::Skipped);
    assert_eq!(result.state(9), StageState::Pending);
  }

  #[test]
  fn default_config_parallelism() {
    let config = ExecuteConfig::default();
    assert!(config.parallelism >= 1);
    assert!(config.shell.is_none());
  }
}
