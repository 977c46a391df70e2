//! Selective copies between snapshots and from the build context.
//!
//! Copy sources and destinations are always interpreted relative to a root
//! (snapshot root or context directory); absolute operands are re-rooted by
//! stripping the leading separator. Copying a directory replicates its
//! contents under the destination, so the final snapshot holds exactly the
//! union of what was explicitly copied.

use std::path::{Component, Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::execute::types::ExecuteError;

/// Copy an artifact path out of a completed stage's snapshot.
///
/// # Errors
///
/// [`ExecuteError::ArtifactMissing`] when the source snapshot does not
/// contain `src`.
pub fn copy_from_stage(
  stage_label: &str,
  source_root: &Path,
  src: &str,
  dest_root: &Path,
  dest: &str,
) -> Result<(), ExecuteError> {
  let source = source_root.join(rebase(src));
  if !source.exists() {
    return Err(ExecuteError::ArtifactMissing {
      stage: stage_label.to_string(),
      path: src.to_string(),
    });
  }

  debug!(stage = stage_label, src = src, dest = dest, "copying artifact");
  copy_entry(&source, &resolve_dest(dest_root, dest, &source))
}

/// Copy a path from the build context into the snapshot.
///
/// # Errors
///
/// [`ExecuteError::ContextPathMissing`] when the context does not contain
/// `src`.
pub fn copy_from_context(context: &Path, src: &str, dest_root: &Path, dest: &str) -> Result<(), ExecuteError> {
  let source = context.join(rebase(src));
  if !source.exists() {
    return Err(ExecuteError::ContextPathMissing(PathBuf::from(src)));
  }

  debug!(src = src, dest = dest, "copying from context");
  copy_entry(&source, &resolve_dest(dest_root, dest, &source))
}

/// Re-root an operand path: strip leading separators and `.` components.
pub(crate) fn rebase(path: &str) -> PathBuf {
  Path::new(path)
    .components()
    .filter(|c| matches!(c, Component::Normal(_)))
    .collect()
}

/// Destination path for a copy: a trailing separator means "into this
/// directory, keeping the source file name".
fn resolve_dest(dest_root: &Path, dest: &str, source: &Path) -> PathBuf {
  let base = dest_root.join(rebase(dest));
  if (dest.ends_with('/') || dest.ends_with(std::path::MAIN_SEPARATOR)) && source.is_file() {
    match source.file_name() {
      Some(name) => base.join(name),
      None => base,
    }
  } else {
    base
  }
}

fn copy_entry(source: &Path, dest: &Path) -> Result<(), ExecuteError> {
  if source.is_dir() {
    copy_tree(source, dest)
  } else {
    if let Some(parent) = dest.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(source, dest)?;
    Ok(())
  }
}

/// Replicate a directory's contents under `dest`.
pub fn copy_tree(source: &Path, dest: &Path) -> Result<(), ExecuteError> {
  std::fs::create_dir_all(dest)?;

  for entry in WalkDir::new(source).min_depth(1) {
    let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
    let relative = entry
      .path()
      .strip_prefix(source)
      .map_err(|e| std::io::Error::other(e.to_string()))?;
    let target = dest.join(relative);

    let file_type = entry.file_type();
    if file_type.is_dir() {
      std::fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      copy_symlink(entry.path(), &target)?;
    } else {
      if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
      }
      std::fs::copy(entry.path(), &target)?;
    }
  }

  Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> std::io::Result<()> {
  let link = std::fs::read_link(source)?;
  if target.exists() {
    std::fs::remove_file(target)?;
  }
  std::os::unix::fs::symlink(link, target)
}

#[cfg(windows)]
fn copy_symlink(source: &Path, target: &Path) -> std::io::Result<()> {
  let _ = target;
  tracing::warn!(path = %source.display(), "skipping symlink on windows");
  Ok(())
}
