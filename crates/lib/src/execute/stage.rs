//! Execution of a single stage.
//!
//! A stage runs against a fresh snapshot seeded from its base: a copy of the
//! parent stage's snapshot, or an empty root for an external image
//! reference. Instructions execute strictly in declaration order; the first
//! failure aborts the stage. Argument bindings activate at their `ARG` line,
//! so a reference above the declaration expands to unset, like any
//! undeclared name.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::graph::ResolvedBase;
use crate::manifest::read_manifest;
use crate::spec::{ArgScope, Instruction, MetaKind, StageDef, expand};
use crate::util::hash::Hashable;

use super::actions::copy::{copy_from_context, copy_from_stage, copy_tree, rebase};
use super::actions::run::{execute_installer, execute_run};
use super::store;
use super::types::{ActionRecord, ExecuteConfig, ExecuteError, ImageConfig, StageResult};

/// Everything a spawned task needs to run one stage.
#[derive(Debug, Clone)]
pub struct StageTask {
  pub index: usize,
  pub def: StageDef,
  pub base: ResolvedBase,
  /// Instruction index of each `COPY --from` -> resolved source stage.
  pub copy_sources: BTreeMap<usize, usize>,
  pub scope: ArgScope,
  /// Labels of every stage in the spec, for log and error messages.
  pub labels: Vec<String>,
}

/// Execute one stage's instruction list against its base snapshot.
pub async fn run_stage(
  task: &StageTask,
  context: &Path,
  build_root: &Path,
  completed: &HashMap<usize, StageResult>,
  config: &ExecuteConfig,
) -> Result<StageResult, ExecuteError> {
  let label = task.def.label(task.index);
  let hash = task.def.compute_hash().map_err(std::io::Error::other)?;
  let stage_dir = store::stage_dir(build_root, task.index, &label, &hash);

  info!(stage = %label, dir = %stage_dir.display(), "running stage");

  // Always start from a fresh snapshot; repeated runs rebuild rather than
  // reuse partial state.
  if stage_dir.exists() {
    std::fs::remove_dir_all(&stage_dir)?;
  }
  let root = store::snapshot_root(&stage_dir);
  std::fs::create_dir_all(&root)?;
  let tmp_dir = stage_dir.join("tmp");

  let (mut env, mut workdir, mut image_config) = seed_from_base(task, &root, completed)?;

  let mut activated: BTreeMap<String, String> = BTreeMap::new();
  let mut log: Vec<ActionRecord> = Vec::new();

  for (instr_idx, instruction) in task.def.instructions.iter().enumerate() {
    let bindings = merged_bindings(&activated, &env);

    match instruction {
      Instruction::Arg(decl) => {
        if let Some(value) = task.scope.get(&decl.name) {
          activated.insert(decl.name.clone(), value.to_string());
        }
        record(&mut log, "ARG", &decl.name);
      }

      Instruction::Env { name, value } => {
        let value = expand(value, &bindings);
        record(&mut log, "ENV", &format!("{name}={value}"));
        env.insert(name.clone(), value);
      }

      Instruction::Run { cmd } => {
        // The command line reaches the shell unexpanded; references resolve
        // through the process environment, so an argument this stage never
        // declared is unset rather than leaked from another scope.
        record(&mut log, "RUN", cmd);
        execute_run(cmd, &bindings, &root.join(&workdir), &root, &tmp_dir, config.shell.as_deref()).await?;
      }

      Instruction::Copy { from, src, dest } => {
        let src = expand(src, &bindings);
        let dest = expand(dest, &bindings);

        match from {
          Some(_) => {
            let source = task
              .copy_sources
              .get(&instr_idx)
              .copied()
              .ok_or(ExecuteError::DependencyUnavailable(task.index))?;
            let source_result = completed.get(&source).ok_or(ExecuteError::DependencyUnavailable(source))?;
            record(&mut log, "COPY", &format!("--from={} {src} {dest}", task.labels[source]));
            copy_from_stage(&task.labels[source], &source_result.root, &src, &root, &dest)?;
          }
          None => {
            record(&mut log, "COPY", &format!("{src} {dest}"));
            copy_from_context(context, &src, &root, &dest)?;
          }
        }
      }

      Instruction::Install { installer, manifest } => {
        let installer = expand(installer, &bindings);
        let manifest = expand(manifest, &bindings);

        let packages = read_manifest(&context.join(rebase(&manifest)))?;
        let program = resolve_installer(&installer, &root, context);

        record(&mut log, "INSTALL", &format!("{installer} {}", packages.join(" ")));
        execute_installer(&program, &packages, &bindings, &root.join(&workdir), &root, &tmp_dir).await?;
      }

      Instruction::Workdir { dir } => {
        let dir = expand(dir, &bindings);
        record(&mut log, "WORKDIR", &dir);
        workdir = rebase(&dir);
        std::fs::create_dir_all(root.join(&workdir))?;
      }

      Instruction::Meta { kind, value } => {
        let value = expand(value, &bindings);
        record(&mut log, kind.keyword(), &value);
        apply_meta(&mut image_config, *kind, value);
      }
    }
  }

  persist(&stage_dir, &log, &image_config)?;

  debug!(stage = %label, actions = log.len(), "stage complete");

  Ok(StageResult {
    root,
    env,
    workdir,
    config: image_config,
    log,
  })
}

/// Seed the snapshot, environment, and image config from the stage's base.
fn seed_from_base(
  task: &StageTask,
  root: &Path,
  completed: &HashMap<usize, StageResult>,
) -> Result<(BTreeMap<String, String>, PathBuf, ImageConfig), ExecuteError> {
  match &task.base {
    ResolvedBase::Stage(parent_idx) => {
      let parent = completed
        .get(parent_idx)
        .ok_or(ExecuteError::DependencyUnavailable(*parent_idx))?;
      copy_tree(&parent.root, root)?;
      Ok((parent.env.clone(), parent.workdir.clone(), parent.config.clone()))
    }
    ResolvedBase::Image(reference) => {
      let config = ImageConfig {
        base: reference.clone(),
        ..ImageConfig::default()
      };
      Ok((BTreeMap::new(), PathBuf::new(), config))
    }
  }
}

/// Activated arguments plus environment, environment winning on collision.
fn merged_bindings(activated: &BTreeMap<String, String>, env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
  let mut merged = activated.clone();
  merged.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
  merged
}

/// Resolve an installer operand: inside the snapshot first, then the build
/// context, else leave it to PATH lookup.
fn resolve_installer(installer: &str, root: &Path, context: &Path) -> PathBuf {
  let in_snapshot = root.join(rebase(installer));
  if in_snapshot.is_file() {
    return in_snapshot;
  }
  let in_context = context.join(rebase(installer));
  if in_context.is_file() {
    return in_context;
  }
  PathBuf::from(installer)
}

fn apply_meta(config: &mut ImageConfig, kind: MetaKind, value: String) {
  match kind {
    MetaKind::Cmd => config.cmd = Some(value),
    MetaKind::Entrypoint => config.entrypoint = Some(value),
    MetaKind::User => config.user = Some(value),
    MetaKind::Label => {
      let (key, val) = match value.split_once('=') {
        Some((key, val)) => (key.trim().to_string(), val.trim().to_string()),
        None => (value, String::new()),
      };
      config.labels.insert(key, val);
    }
  }
}

fn record(log: &mut Vec<ActionRecord>, instruction: &str, detail: &str) {
  log.push(ActionRecord {
    instruction: instruction.to_string(),
    detail: detail.to_string(),
  });
}

fn persist(stage_dir: &Path, log: &[ActionRecord], config: &ImageConfig) -> Result<(), ExecuteError> {
  let log_json = serde_json::to_string_pretty(log).map_err(std::io::Error::other)?;
  std::fs::write(store::log_path(stage_dir), log_json)?;

  let config_json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;
  std::fs::write(store::config_path(stage_dir), config_json)?;

  Ok(())
}
