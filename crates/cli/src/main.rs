use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

/// stagecraft - multi-stage image build pipeline orchestrator
#[derive(Parser)]
#[command(name = "stagecraft")]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a spec and show stages, dependencies, and execution waves
  Plan {
    /// Path to the build specification file
    spec: PathBuf,

    /// Argument override, NAME=VALUE (repeatable)
    #[arg(short = 'a', long = "arg", value_name = "NAME=VALUE")]
    args: Vec<String>,

    /// Print the plan as JSON
    #[arg(long)]
    json: bool,
  },

  /// Execute a build specification
  Build {
    /// Path to the build specification file
    spec: PathBuf,

    /// Argument override, NAME=VALUE (repeatable)
    #[arg(short = 'a', long = "arg", value_name = "NAME=VALUE")]
    args: Vec<String>,

    /// Directory for stage snapshots (default: .stagecraft)
    #[arg(long, default_value = ".stagecraft")]
    build_root: PathBuf,

    /// Maximum number of stages to run in parallel
    #[arg(long)]
    parallelism: Option<usize>,
  },

  /// Show per-stage resolved argument scopes
  Args {
    /// Path to the build specification file
    spec: PathBuf,

    /// Argument override, NAME=VALUE (repeatable)
    #[arg(short = 'a', long = "arg", value_name = "NAME=VALUE")]
    args: Vec<String>,
  },

  /// Build from a runner descriptor (devcontainer-style JSON)
  Up {
    /// Path to the descriptor file
    config: PathBuf,

    /// Directory for stage snapshots (default: .stagecraft)
    #[arg(long, default_value = ".stagecraft")]
    build_root: PathBuf,

    /// Maximum number of stages to run in parallel
    #[arg(long)]
    parallelism: Option<usize>,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .without_time()
    .init();

  let cli = Cli::parse();

  match cli.command {
    Commands::Plan { spec, args, json } => cmd::cmd_plan(&spec, &args, json),
    Commands::Build {
      spec,
      args,
      build_root,
      parallelism,
    } => cmd::cmd_build(&spec, &args, &build_root, parallelism),
    Commands::Args { spec, args } => cmd::cmd_args(&spec, &args),
    Commands::Up {
      config,
      build_root,
      parallelism,
    } => cmd::cmd_up(&config, &build_root, parallelism),
  }
}
