//! Runner configuration descriptors.
//!
//! A descriptor is a devcontainer-style JSON file that selects which build
//! specification to use and which argument overrides to pass. The argument
//! names are opaque to the tool: whatever the descriptor lists must simply
//! be declared somewhere in the selected spec.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
  #[error("failed to read runner config {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse runner config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// Parsed runner descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
  #[serde(default)]
  pub name: Option<String>,
  pub build: BuildSection,
}

/// The `build` section: which spec file, which context, which overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildSection {
  /// Spec file path, relative to the descriptor's directory.
  pub dockerfile: String,

  /// Build context directory, relative to the descriptor's directory.
  /// Defaults to the descriptor's directory itself.
  #[serde(default)]
  pub context: Option<String>,

  /// Argument overrides passed to the pipeline.
  #[serde(default)]
  pub args: BTreeMap<String, String>,
}

/// Load a descriptor file.
pub fn load(path: &Path) -> Result<RunnerConfig, RunnerError> {
  let text = std::fs::read_to_string(path).map_err(|source| RunnerError::Io {
    path: path.to_path_buf(),
    source,
  })?;

  serde_json::from_str(&text).map_err(|source| RunnerError::Parse {
    path: path.to_path_buf(),
    source,
  })
}

impl RunnerConfig {
  /// Absolute path of the selected spec file, given the descriptor's
  /// directory.
  pub fn spec_path(&self, base_dir: &Path) -> PathBuf {
    base_dir.join(&self.build.dockerfile)
  }

  /// Build context directory, given the descriptor's directory.
  pub fn context_dir(&self, base_dir: &Path) -> PathBuf {
    match &self.build.context {
      Some(context) => base_dir.join(context),
      None => base_dir.to_path_buf(),
    }
  }

  pub fn overrides(&self) -> &BTreeMap<String, String> {
    &self.build.args
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn loads_descriptor_with_args() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("devcontainer.json");
    std::fs::write(
      &path,
      r#"{
  "name": "blog-dev",
  "build": {
    "dockerfile": "containerfile",
    "args": { "PYTHON_VER": "3.12", "QUARTO_VER": "1.5.57" }
  }
}"#,
    )
    .unwrap();

    let config = load(&path).unwrap();

    assert_eq!(config.name.as_deref(), Some("blog-dev"));
    assert_eq!(config.spec_path(temp.path()), temp.path().join("containerfile"));
    assert_eq!(config.context_dir(temp.path()), temp.path());
    assert_eq!(config.overrides().get("PYTHON_VER").map(String::as_str), Some("3.12"));
  }

  #[test]
  fn context_is_resolved_relative_to_descriptor() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("devcontainer.json");
    std::fs::write(
      &path,
      r#"{ "build": { "dockerfile": "setup/containerfile", "context": "setup" } }"#,
    )
    .unwrap();

    let config = load(&path).unwrap();

    assert_eq!(config.context_dir(temp.path()), temp.path().join("setup"));
    assert!(config.overrides().is_empty());
  }

  #[test]
  fn malformed_descriptor_is_a_parse_error() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("devcontainer.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(load(&path), Err(RunnerError::Parse { .. })));
  }

  #[test]
  fn missing_descriptor_is_an_io_error() {
    let temp = TempDir::new().unwrap();
    let err = load(&temp.path().join("nope.json")).unwrap_err();

    assert!(matches!(err, RunnerError::Io { .. }));
  }
}
