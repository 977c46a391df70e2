//! stagecraft-lib: Core types and logic for Stagecraft
//!
//! This crate provides the fundamental pieces of the build pipeline:
//! - `spec`: the build specification format (stages, instructions, arguments)
//! - `graph`: the stage dependency graph and execution ordering
//! - `execute`: wave-parallel stage execution against directory snapshots
//! - `manifest`: package manifest files consumed by installer steps
//! - `runner`: devcontainer-style descriptors that select a spec and arguments

pub mod execute;
pub mod graph;
pub mod manifest;
pub mod plan;
pub mod runner;
pub mod spec;
pub mod util;
