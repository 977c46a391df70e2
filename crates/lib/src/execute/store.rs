//! Snapshot directory layout under the build root.
//!
//! Each stage owns one directory containing its filesystem snapshot plus the
//! persisted action log and image config:
//!
//! ```text
//! <build_root>/stages/<NN>-<label>-<hash>/
//!   root/          the snapshot itself
//!   log.json       ordered action log
//!   config.json    image metadata
//! ```

use std::path::{Path, PathBuf};

use crate::util::hash::ObjectHash;

/// Directory holding all stage directories of a build.
pub fn stages_dir(build_root: &Path) -> PathBuf {
  build_root.join("stages")
}

/// Directory owned by one stage.
///
/// The content hash in the name keeps snapshots of edited stage definitions
/// from colliding with stale ones.
pub fn stage_dir(build_root: &Path, index: usize, label: &str, hash: &ObjectHash) -> PathBuf {
  stages_dir(build_root).join(format!("{index:02}-{label}-{hash}"))
}

/// Snapshot root inside a stage directory.
pub fn snapshot_root(stage_dir: &Path) -> PathBuf {
  stage_dir.join("root")
}

/// Persisted action log path.
pub fn log_path(stage_dir: &Path) -> PathBuf {
  stage_dir.join("log.json")
}

/// Persisted image config path.
pub fn config_path(stage_dir: &Path) -> PathBuf {
  stage_dir.join("config.json")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stage_dir_embeds_index_label_and_hash() {
    let dir = stage_dir(
      Path::new("/build"),
      3,
      "quarto",
      &ObjectHash("abc123def456".to_string()),
    );

    assert_eq!(dir, Path::new("/build/stages/03-quarto-abc123def456"));
  }

  #[test]
  fn snapshot_root_is_under_stage_dir() {
    let dir = PathBuf::from("/build/stages/00-base-ffff");
    assert_eq!(snapshot_root(&dir), Path::new("/build/stages/00-base-ffff/root"));
    assert_eq!(log_path(&dir), Path::new("/build/stages/00-base-ffff/log.json"));
    assert_eq!(config_path(&dir), Path::new("/build/stages/00-base-ffff/config.json"));
  }
}
