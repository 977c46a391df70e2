//! Parser for the build specification format.
//!
//! The format is line-oriented: `#` comment lines, trailing-`\` line
//! continuation, and one instruction per logical line. A `FROM` line opens a
//! stage block; every other instruction belongs to the stage opened most
//! recently. `ARG` lines before the first `FROM` form the preamble.

use std::path::Path;

use thiserror::Error;

use super::types::{ArgDecl, BuildSpec, Instruction, MetaKind, StageDef};

/// Errors produced while reading or parsing a specification file.
#[derive(Debug, Error)]
pub enum SpecError {
  /// Failed to read the specification file.
  #[error("failed to read spec: {0}")]
  Io(#[from] std::io::Error),

  /// The file contains no stage blocks.
  #[error("spec declares no stages")]
  Empty,

  /// First word of a logical line is not a known instruction.
  #[error("line {line}: unknown instruction {instruction}")]
  UnknownInstruction { line: usize, instruction: String },

  /// Instruction is known but its operands do not parse.
  #[error("line {line}: {message}")]
  Malformed { line: usize, message: String },

  /// Only `ARG` may appear before the first `FROM`.
  #[error("line {line}: {instruction} before first FROM")]
  BeforeFrom { line: usize, instruction: String },

  /// Two stages share a name.
  #[error("duplicate stage name: {name}")]
  DuplicateStageName { name: String },

  /// An external override names an argument no stage declares.
  #[error("override for undeclared argument: {name}")]
  UnknownArgOverride { name: String },
}

/// Read and parse a specification file.
pub fn load(path: &Path) -> Result<BuildSpec, SpecError> {
  let text = std::fs::read_to_string(path)?;
  parse(&text)
}

/// Parse specification text.
pub fn parse(text: &str) -> Result<BuildSpec, SpecError> {
  let mut spec = BuildSpec::default();

  for (line_no, logical) in logical_lines(text) {
    let (keyword, rest) = split_keyword(&logical);
    let keyword = keyword.to_ascii_uppercase();

    if keyword == "FROM" {
      let stage = parse_from(line_no, rest)?;
      if let Some(name) = &stage.name
        && spec.stages.iter().any(|s| s.name == stage.name)
      {
        return Err(SpecError::DuplicateStageName { name: name.clone() });
      }
      spec.stages.push(stage);
      continue;
    }

    let instruction = parse_instruction(line_no, &keyword, rest)?;

    match spec.stages.last_mut() {
      Some(stage) => stage.instructions.push(instruction),
      None => match instruction {
        Instruction::Arg(decl) => spec.preamble.push(decl),
        _ => {
          return Err(SpecError::BeforeFrom {
            line: line_no,
            instruction: keyword,
          });
        }
      },
    }
  }

  if spec.stages.is_empty() {
    return Err(SpecError::Empty);
  }

  Ok(spec)
}

/// Iterate logical lines: comments and blanks dropped, continuations joined.
///
/// Yields the line number where each logical line started.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
  let mut lines = Vec::new();
  let mut pending: Option<(usize, String)> = None;

  for (idx, raw) in text.lines().enumerate() {
    let line_no = idx + 1;
    let trimmed = raw.trim();

    if trimmed.is_empty() || trimmed.starts_with('#') {
      continue;
    }

    let (fragment, continued) = match trimmed.strip_suffix('\\') {
      Some(head) => (head.trim_end(), true),
      None => (trimmed, false),
    };

    match pending.take() {
      Some((start, mut acc)) => {
        acc.push(' ');
        acc.push_str(fragment);
        if continued {
          pending = Some((start, acc));
        } else {
          lines.push((start, acc));
        }
      }
      None => {
        if continued {
          pending = Some((line_no, fragment.to_string()));
        } else {
          lines.push((line_no, fragment.to_string()));
        }
      }
    }
  }

  // Dangling continuation at EOF: treat the fragment as a complete line.
  if let Some(entry) = pending {
    lines.push(entry);
  }

  lines
}

fn split_keyword(line: &str) -> (&str, &str) {
  match line.split_once(char::is_whitespace) {
    Some((keyword, rest)) => (keyword, rest.trim()),
    None => (line, ""),
  }
}

fn parse_from(line: usize, rest: &str) -> Result<StageDef, SpecError> {
  let tokens: Vec<&str> = rest.split_whitespace().collect();

  match tokens.as_slice() {
    [base] => Ok(StageDef {
      name: None,
      base: (*base).to_string(),
      instructions: vec![],
    }),
    [base, as_kw, name] if as_kw.eq_ignore_ascii_case("as") => Ok(StageDef {
      name: Some((*name).to_string()),
      base: (*base).to_string(),
      instructions: vec![],
    }),
    _ => Err(SpecError::Malformed {
      line,
      message: format!("expected FROM <base> [AS <name>], got {rest:?}"),
    }),
  }
}

fn parse_instruction(line: usize, keyword: &str, rest: &str) -> Result<Instruction, SpecError> {
  match keyword {
    "ARG" => parse_arg(line, rest).map(Instruction::Arg),
    "ENV" => parse_env(line, rest),
    "RUN" => {
      if rest.is_empty() {
        return Err(SpecError::Malformed {
          line,
          message: "RUN requires a command".to_string(),
        });
      }
      Ok(Instruction::Run { cmd: rest.to_string() })
    }
    "COPY" => parse_copy(line, rest),
    "INSTALL" => {
      let tokens: Vec<&str> = rest.split_whitespace().collect();
      match tokens.as_slice() {
        [installer, manifest] => Ok(Instruction::Install {
          installer: (*installer).to_string(),
          manifest: (*manifest).to_string(),
        }),
        _ => Err(SpecError::Malformed {
          line,
          message: format!("expected INSTALL <installer> <manifest>, got {rest:?}"),
        }),
      }
    }
    "WORKDIR" => {
      if rest.is_empty() || rest.split_whitespace().count() != 1 {
        return Err(SpecError::Malformed {
          line,
          message: format!("expected WORKDIR <dir>, got {rest:?}"),
        });
      }
      Ok(Instruction::Workdir { dir: rest.to_string() })
    }
    "CMD" => Ok(meta(MetaKind::Cmd, rest)),
    "ENTRYPOINT" => Ok(meta(MetaKind::Entrypoint, rest)),
    "LABEL" => Ok(meta(MetaKind::Label, rest)),
    "USER" => Ok(meta(MetaKind::User, rest)),
    _ => Err(SpecError::UnknownInstruction {
      line,
      instruction: keyword.to_string(),
    }),
  }
}

fn meta(kind: MetaKind, rest: &str) -> Instruction {
  Instruction::Meta {
    kind,
    value: rest.to_string(),
  }
}

fn parse_arg(line: usize, rest: &str) -> Result<ArgDecl, SpecError> {
  let (name, default) = match rest.split_once('=') {
    Some((name, default)) => (name.trim(), Some(default.trim().to_string())),
    None => (rest, None),
  };

  if !is_valid_name(name) {
    return Err(SpecError::Malformed {
      line,
      message: format!("invalid argument name {name:?}"),
    });
  }

  Ok(ArgDecl {
    name: name.to_string(),
    default,
  })
}

fn parse_env(line: usize, rest: &str) -> Result<Instruction, SpecError> {
  // Both `ENV NAME=value` and the legacy `ENV NAME value` form.
  let (name, value) = match rest.split_once('=') {
    Some((name, value)) if !name.contains(char::is_whitespace) => (name, value),
    _ => match rest.split_once(char::is_whitespace) {
      Some((name, value)) => (name, value.trim()),
      None => {
        return Err(SpecError::Malformed {
          line,
          message: format!("expected ENV <name>=<value>, got {rest:?}"),
        });
      }
    },
  };

  if !is_valid_name(name) {
    return Err(SpecError::Malformed {
      line,
      message: format!("invalid environment name {name:?}"),
    });
  }

  Ok(Instruction::Env {
    name: name.to_string(),
    value: value.to_string(),
  })
}

fn parse_copy(line: usize, rest: &str) -> Result<Instruction, SpecError> {
  let mut tokens: Vec<&str> = rest.split_whitespace().collect();

  let from = match tokens.first().and_then(|t| t.strip_prefix("--from=")) {
    Some(source) => {
      let source = source.to_string();
      tokens.remove(0);
      Some(source)
    }
    None => None,
  };

  match tokens.as_slice() {
    [src, dest] => Ok(Instruction::Copy {
      from,
      src: (*src).to_string(),
      dest: (*dest).to_string(),
    }),
    _ => Err(SpecError::Malformed {
      line,
      message: format!("expected COPY [--from=<stage>] <src> <dest>, got {rest:?}"),
    }),
  }
}

fn is_valid_name(name: &str) -> bool {
  let mut chars = name.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
    _ => return false,
  }
  chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
