//! Per-stage build argument resolution.
//!
//! Arguments are scoped to the stage that declares them; the scope is a
//! per-stage symbol table, never a shared map. The effective value of a
//! declared argument is, in order of precedence: an external override, the
//! stage-local default, the preamble default (bare redeclarations only),
//! else unset. An argument declared in one stage is invisible to every
//! other stage unless redeclared there.

use std::collections::BTreeMap;

use super::parser::SpecError;
use super::types::BuildSpec;

/// Symbol table of one scope (the preamble, or a single stage).
///
/// Declared-but-unset arguments are kept as `None` so the scope can tell
/// "declared without a value" apart from "never declared".
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ArgScope {
  values: BTreeMap<String, Option<String>>,
}

impl ArgScope {
  /// Effective value of a declared, set argument.
  pub fn get(&self, name: &str) -> Option<&str> {
    self.values.get(name).and_then(|v| v.as_deref())
  }

  pub fn is_declared(&self, name: &str) -> bool {
    self.values.contains_key(name)
  }

  /// All declared, set arguments as name -> value bindings.
  pub fn bindings(&self) -> BTreeMap<String, String> {
    self
      .values
      .iter()
      .filter_map(|(name, value)| value.as_ref().map(|v| (name.clone(), v.clone())))
      .collect()
  }

  fn declare(&mut self, name: &str, value: Option<String>) {
    self.values.insert(name.to_string(), value);
  }
}

/// Resolved argument scopes for a whole specification.
#[derive(Debug, Clone)]
pub struct ResolvedArgs {
  pub preamble: ArgScope,
  /// One scope per stage, indexed like `BuildSpec::stages`.
  pub stages: Vec<ArgScope>,
}

/// Resolve every scope of a specification against external overrides.
///
/// Fails with [`SpecError::UnknownArgOverride`] when an override names an
/// argument that neither the preamble nor any stage declares.
pub fn resolve_scopes(
  spec: &BuildSpec,
  overrides: &BTreeMap<String, String>,
) -> Result<ResolvedArgs, SpecError> {
  for name in overrides.keys() {
    let declared = spec.preamble.iter().any(|d| &d.name == name)
      || spec.stages.iter().any(|s| s.arg_decls().any(|d| &d.name == name));
    if !declared {
      return Err(SpecError::UnknownArgOverride { name: name.clone() });
    }
  }

  let mut preamble = ArgScope::default();
  for decl in &spec.preamble {
    let value = overrides.get(&decl.name).cloned().or_else(|| decl.default.clone());
    preamble.declare(&decl.name, value);
  }

  let mut stages = Vec::with_capacity(spec.stages.len());
  for stage in &spec.stages {
    let mut scope = ArgScope::default();
    for decl in stage.arg_decls() {
      let value = overrides
        .get(&decl.name)
        .cloned()
        .or_else(|| decl.default.clone())
        // Bare redeclaration inherits the preamble default, if any.
        .or_else(|| spec.preamble.iter().find(|d| d.name == decl.name).and_then(|d| d.default.clone()));
      scope.declare(&decl.name, value);
    }
    stages.push(scope);
  }

  Ok(ResolvedArgs { preamble, stages })
}

/// Expand `${VAR}` and `$VAR` references against a set of bindings.
///
/// Unbound references expand to the empty string; `$$` is a literal `$`.
pub fn expand(input: &str, bindings: &BTreeMap<String, String>) -> String {
  let mut out = String::with_capacity(input.len());
  let mut chars = input.chars().peekable();

  while let Some(c) = chars.next() {
    if c != '$' {
      out.push(c);
      continue;
    }

    match chars.peek() {
      Some('$') => {
        chars.next();
        out.push('$');
      }
      Some('{') => {
        chars.next();
        let mut name = String::new();
        let mut closed = false;
        for inner in chars.by_ref() {
          if inner == '}' {
            closed = true;
            break;
          }
          name.push(inner);
        }
        if closed {
          if let Some(value) = bindings.get(&name) {
            out.push_str(value);
          }
        } else {
          // Unterminated reference: keep the text as written.
          out.push_str("${");
          out.push_str(&name);
        }
      }
      Some(c) if c.is_ascii_alphabetic() || *c == '_' => {
        let mut name = String::new();
        while let Some(&inner) = chars.peek() {
          if inner.is_ascii_alphanumeric() || inner == '_' {
            name.push(inner);
            chars.next();
          } else {
            break;
          }
        }
        if let Some(value) = bindings.get(&name) {
          out.push_str(value);
        }
      }
      _ => out.push('$'),
    }
  }

  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::spec::parser::parse;

  fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn stage_default_used_without_override() {
    let spec = parse("FROM scratch\nARG ENV_NAME=blog\n").unwrap();
    let args = resolve_scopes(&spec, &BTreeMap::new()).unwrap();

    assert_eq!(args.stages[0].get("ENV_NAME"), Some("blog"));
  }

  #[test]
  fn override_beats_stage_default() {
    let spec = parse("FROM scratch\nARG ENV_NAME=blog\n").unwrap();
    let args = resolve_scopes(&spec, &overrides(&[("ENV_NAME", "site")])).unwrap();

    assert_eq!(args.stages[0].get("ENV_NAME"), Some("site"));
  }

  #[test]
  fn bare_redeclaration_inherits_preamble_default() {
    let spec = parse("ARG QUARTO_VER=1.5\nFROM scratch\nARG QUARTO_VER\n").unwrap();
    let args = resolve_scopes(&spec, &BTreeMap::new()).unwrap();

    assert_eq!(args.stages[0].get("QUARTO_VER"), Some("1.5"));
  }

  #[test]
  fn declaration_does_not_cross_stage_boundary() {
    // Declared in stage 0 only: stage 2 must see it as unset, not stage 0's
    // value.
    let spec = parse(
      "FROM scratch AS a\nARG PYTHON_VER=3.12\nFROM scratch AS b\nFROM scratch AS c\n",
    )
    .unwrap();
    let args = resolve_scopes(&spec, &BTreeMap::new()).unwrap();

    assert_eq!(args.stages[0].get("PYTHON_VER"), Some("3.12"));
    assert!(!args.stages[1].is_declared("PYTHON_VER"));
    assert!(!args.stages[2].is_declared("PYTHON_VER"));
    assert_eq!(args.stages[2].get("PYTHON_VER"), None);
  }

  #[test]
  fn override_without_declaration_is_rejected() {
    let spec = parse("FROM scratch\nARG A=1\n").unwrap();
    let err = resolve_scopes(&spec, &overrides(&[("NOPE", "x")])).unwrap_err();

    assert!(matches!(err, SpecError::UnknownArgOverride { name } if name == "NOPE"));
  }

  #[test]
  fn bare_declaration_without_any_default_is_unset() {
    let spec = parse("FROM scratch\nARG SETUP_FOLDER\n").unwrap();
    let args = resolve_scopes(&spec, &BTreeMap::new()).unwrap();

    assert!(args.stages[0].is_declared("SETUP_FOLDER"));
    assert_eq!(args.stages[0].get("SETUP_FOLDER"), None);
    assert!(args.stages[0].bindings().is_empty());
  }

  #[test]
  fn expand_braced_and_bare() {
    let bindings = overrides(&[("VER", "3.12"), ("NAME", "blog")]);

    assert_eq!(expand("python:${VER}-slim", &bindings), "python:3.12-slim");
    assert_eq!(expand("/envs/$NAME/bin", &bindings), "/envs/blog/bin");
  }

  #[test]
  fn expand_unbound_is_empty() {
    let bindings = BTreeMap::new();

    assert_eq!(expand("before-${MISSING}-after", &bindings), "before--after");
    assert_eq!(expand("$GONE/bin", &bindings), "/bin");
  }

  #[test]
  fn expand_dollar_escape() {
    let bindings = overrides(&[("A", "x")]);

    assert_eq!(expand("cost: $$5 and $A", &bindings), "cost: $5 and x");
    assert_eq!(expand("trailing $", &bindings), "trailing $");
  }
}
