//! End-to-end builds of the shipped demo pipelines.
//!
//! These run the real spec files under demos/ against a temporary build
//! root and inspect the composed image.

#![cfg(unix)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

fn stagecraft_cmd() -> Command {
  cargo_bin_cmd!("stagecraft")
}

fn demos_dir() -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("../..")
    .join("demos")
}

/// Find the stage directory for a given index/label prefix.
fn stage_root(build_root: &Path, prefix: &str) -> PathBuf {
  let stages = build_root.join("stages");
  let entry = std::fs::read_dir(&stages)
    .unwrap()
    .filter_map(|e| e.ok())
    .find(|e| e.file_name().to_string_lossy().starts_with(prefix))
    .unwrap_or_else(|| panic!("no stage dir matching {prefix} in {}", stages.display()));
  entry.path().join("root")
}

#[test]
fn main_variant_composes_the_runtime_image() {
  let temp = TempDir::new().unwrap();
  let build_root = temp.path().join("build");

  stagecraft_cmd()
    .arg("build")
    .arg(demos_dir().join("containerfile"))
    .arg("--build-root")
    .arg(&build_root)
    .assert()
    .success();

  let image = stage_root(&build_root, "04-runtime-");

  // Renderer, Python env, and R library were composed in.
  assert_eq!(
    std::fs::read_to_string(image.join("opt/quarto/VERSION")).unwrap().trim(),
    "1.5.57"
  );
  assert!(image.join("opt/envs/blog/bin/python").is_file());
  assert!(image.join("opt/r/library/ggplot2").is_dir());

  // Package set in manifest order.
  let lock = std::fs::read_to_string(image.join("opt/envs/blog/lib/packages.lock")).unwrap();
  assert_eq!(lock, "numpy\npandas\nmatplotlib\njupyter\npyyaml\n");

  // Build-only tooling stays behind: the setup folder was never copied.
  assert!(!image.join("opt/setup").exists());
  assert!(!image.join("var/lib/setup").exists());
}

#[test]
fn main_variant_honors_overrides() {
  let temp = TempDir::new().unwrap();
  let build_root = temp.path().join("build");

  stagecraft_cmd()
    .arg("build")
    .arg(demos_dir().join("containerfile"))
    .arg("--build-root")
    .arg(&build_root)
    .arg("--arg")
    .arg("QUARTO_VER=1.6.1")
    .arg("--arg")
    .arg("ENV_NAME=site")
    .assert()
    .success();

  let image = stage_root(&build_root, "04-runtime-");
  assert_eq!(
    std::fs::read_to_string(image.join("opt/quarto/VERSION")).unwrap().trim(),
    "1.6.1"
  );
  assert!(image.join("opt/envs/site/bin/python").is_file());
}

#[test]
fn alt_variant_builds_independently() {
  let temp = TempDir::new().unwrap();
  let build_root = temp.path().join("build");

  stagecraft_cmd()
    .arg("build")
    .arg(demos_dir().join("containerfile.alt"))
    .arg("--build-root")
    .arg(&build_root)
    .assert()
    .success();

  let image = stage_root(&build_root, "02-runtime-");

  assert_eq!(
    std::fs::read_to_string(image.join("opt/quarto/VERSION")).unwrap().trim(),
    "1.4.550"
  );
  // The alt variant uses its own environment name.
  assert!(image.join("opt/envs/publishing/bin/python").is_file());

  let python_ver = stage_root(&build_root, "01-tools-").join("opt/envs/publishing/PYTHON_VERSION");
  assert_eq!(std::fs::read_to_string(python_ver).unwrap().trim(), "3.11");
}

#[test]
fn descriptor_drives_the_main_variant() {
  let temp = TempDir::new().unwrap();
  let build_root = temp.path().join("build");

  stagecraft_cmd()
    .arg("up")
    .arg(demos_dir().join("devcontainer.json"))
    .arg("--build-root")
    .arg(&build_root)
    .assert()
    .success();

  let image = stage_root(&build_root, "04-runtime-");
  assert!(image.join("opt/quarto/bin/quarto").is_file());
}
