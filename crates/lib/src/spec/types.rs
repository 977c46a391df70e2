//! Types for parsed build specifications.
//!
//! A [`BuildSpec`] is the parsed form of one specification file: an optional
//! preamble of argument declarations followed by an ordered list of
//! [`StageDef`]s. Definitions are plain data; name resolution and argument
//! scoping happen later, in `graph` and `spec::args`.

use serde::{Deserialize, Serialize};

use crate::util::hash::Hashable;

/// A named, stage-scoped build argument declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgDecl {
  pub name: String,
  /// Default value, if the declaration carried one (`ARG NAME=default`).
  pub default: Option<String>,
}

/// Metadata instructions recorded into the image config without touching
/// the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaKind {
  Cmd,
  Entrypoint,
  Label,
  User,
}

impl MetaKind {
  pub fn keyword(self) -> &'static str {
    match self {
      MetaKind::Cmd => "CMD",
      MetaKind::Entrypoint => "ENTRYPOINT",
      MetaKind::Label => "LABEL",
      MetaKind::User => "USER",
    }
  }
}

/// A single instruction inside a stage block.
///
/// Operands are stored unexpanded; `${VAR}` references are resolved against
/// the owning stage's argument scope and environment at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
  /// `ARG NAME[=default]`: declare a build argument in this stage's scope.
  Arg(ArgDecl),
  /// `ENV NAME=value`: bind an environment variable in the snapshot.
  Env { name: String, value: String },
  /// `RUN <command>`: execute a shell command against the snapshot.
  Run { cmd: String },
  /// `COPY [--from=<stage>] <src> <dest>`: copy from the build context or
  /// from a completed prior stage's snapshot.
  Copy {
    from: Option<String>,
    src: String,
    dest: String,
  },
  /// `INSTALL <installer> <manifest>`: read a package manifest and invoke
  /// the installer once with every package name, in file order.
  Install { installer: String, manifest: String },
  /// `WORKDIR <dir>`: set the working directory for later instructions.
  Workdir { dir: String },
  /// Recorded-only metadata (`CMD`, `ENTRYPOINT`, `LABEL`, `USER`).
  Meta { kind: MetaKind, value: String },
}

/// One stage of the pipeline.
///
/// `base` is the raw operand of the `FROM` line; whether it names a prior
/// stage or an external image is decided during graph construction, after
/// argument expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDef {
  /// Stage name from `AS <name>`, if any.
  pub name: Option<String>,
  /// Raw base reference from the `FROM` line.
  pub base: String,
  pub instructions: Vec<Instruction>,
}

impl Hashable for StageDef {}

impl StageDef {
  /// Label used in logs and error messages: the stage name, or its index.
  pub fn label(&self, index: usize) -> String {
    match &self.name {
      Some(name) => name.clone(),
      None => index.to_string(),
    }
  }

  /// Argument declarations of this stage, in declaration order.
  pub fn arg_decls(&self) -> impl Iterator<Item = &ArgDecl> {
    self.instructions.iter().filter_map(|instr| match instr {
      Instruction::Arg(decl) => Some(decl),
      _ => None,
    })
  }
}

/// A parsed build specification file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
  /// `ARG` declarations before the first `FROM`. Usable in `FROM` operands
  /// and as defaults for bare redeclarations inside stages.
  pub preamble: Vec<ArgDecl>,
  pub stages: Vec<StageDef>,
}

impl BuildSpec {
  /// Resolve a stage reference, by name or by numeric index.
  pub fn stage_index(&self, reference: &str) -> Option<usize> {
    if let Ok(index) = reference.parse::<usize>() {
      return (index < self.stages.len()).then_some(index);
    }
    self
      .stages
      .iter()
      .position(|stage| stage.name.as_deref() == Some(reference))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn named_stage(name: &str) -> StageDef {
    StageDef {
      name: Some(name.to_string()),
      base: "scratch".to_string(),
      instructions: vec![],
    }
  }

  #[test]
  fn stage_index_by_name() {
    let spec = BuildSpec {
      preamble: vec![],
      stages: vec![named_stage("base"), named_stage("builder")],
    };

    assert_eq!(spec.stage_index("builder"), Some(1));
    assert_eq!(spec.stage_index("missing"), None);
  }

  #[test]
  fn stage_index_by_number() {
    let spec = BuildSpec {
      preamble: vec![],
      stages: vec![named_stage("base"), named_stage("builder")],
    };

    assert_eq!(spec.stage_index("0"), Some(0));
    assert_eq!(spec.stage_index("2"), None);
  }

  #[test]
  fn label_falls_back_to_index() {
    let anon = StageDef {
      name: None,
      base: "scratch".to_string(),
      instructions: vec![],
    };

    assert_eq!(anon.label(3), "3");
    assert_eq!(named_stage("base").label(0), "base");
  }

  #[test]
  fn hash_changes_when_instructions_differ() {
    use crate::util::hash::Hashable;

    let a = named_stage("base");
    let mut b = named_stage("base");
    b.instructions.push(Instruction::Run {
      cmd: "true".to_string(),
    });

    assert_ne!(a.compute_hash().unwrap(), b.compute_hash().unwrap());
  }
}
