//! Package manifest files.
//!
//! A manifest is a plain list of package identifiers, one per line, consumed
//! verbatim by an `INSTALL` instruction. The file is read once per build and
//! never mutated by the pipeline. There is no comment syntax; blank lines
//! are ignored.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("failed to read manifest {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("manifest {path} lists no packages")]
  EmptyManifest { path: PathBuf },
}

/// Read a manifest file, preserving file order.
pub fn read_manifest(path: &Path) -> Result<Vec<String>, ManifestError> {
  let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
    path: path.to_path_buf(),
    source,
  })?;

  let packages: Vec<String> = text
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .map(str::to_string)
    .collect();

  if packages.is_empty() {
    return Err(ManifestError::EmptyManifest {
      path: path.to_path_buf(),
    });
  }

  Ok(packages)
}
