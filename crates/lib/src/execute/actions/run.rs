//! `RUN` and `INSTALL` execution.
//!
//! Commands run with a controlled environment rather than the caller's:
//! everything is cleared, then `PATH` is inherited (collaborator scripts
//! need real tools), a minimal locale is set, the snapshot root is exported
//! as `SNAPSHOT_ROOT`, and the stage's resolved `ENV`/`ARG` bindings are
//! merged last so they can override any of the above.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

use crate::execute::types::ExecuteError;

/// Execute a `RUN` instruction's command string through the shell.
///
/// # Returns
///
/// The trimmed stdout of the command on success.
pub async fn execute_run(
  cmd: &str,
  env: &BTreeMap<String, String>,
  cwd: &Path,
  root: &Path,
  tmp_dir: &Path,
  shell: Option<&str>,
) -> Result<String, ExecuteError> {
  info!(cmd = %cmd, "executing command");

  tokio::fs::create_dir_all(tmp_dir).await?;
  tokio::fs::create_dir_all(cwd).await?;

  let (shell_cmd, shell_args) = get_shell(shell);

  let mut command = Command::new(&shell_cmd);
  command.args(&shell_args).arg(cmd);
  configure_env(&mut command, env, cwd, root, tmp_dir);

  debug!(shell = %shell_cmd, cwd = %cwd.display(), "spawning process");

  let output = command.output().await?;

  if !output.status.success() {
    log_failure_output(&output);
    return Err(ExecuteError::CmdFailed {
      cmd: cmd.to_string(),
      code: output.status.code(),
    });
  }

  Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Invoke an installer program once with positional arguments.
///
/// Used by `INSTALL`: the arguments are the manifest's package names, in
/// file order. The environment matches `execute_run`.
pub async fn execute_installer(
  installer: &Path,
  args: &[String],
  env: &BTreeMap<String, String>,
  cwd: &Path,
  root: &Path,
  tmp_dir: &Path,
) -> Result<String, ExecuteError> {
  info!(installer = %installer.display(), packages = args.len(), "invoking installer");

  tokio::fs::create_dir_all(tmp_dir).await?;
  tokio::fs::create_dir_all(cwd).await?;

  let mut command = Command::new(installer);
  command.args(args);
  configure_env(&mut command, env, cwd, root, tmp_dir);

  let output = command.output().await?;

  if !output.status.success() {
    log_failure_output(&output);
    return Err(ExecuteError::InstallerFailed {
      installer: installer.display().to_string(),
      code: output.status.code(),
    });
  }

  Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn configure_env(command: &mut Command, env: &BTreeMap<String, String>, cwd: &Path, root: &Path, tmp_dir: &Path) {
  command
    .current_dir(cwd)
    .env_clear()
    // Collaborator scripts need the host toolchain.
    .env("PATH", std::env::var_os("PATH").unwrap_or_default())
    .env("TMPDIR", tmp_dir)
    .env("TMP", tmp_dir)
    .env("TEMP", tmp_dir)
    .env("SNAPSHOT_ROOT", root)
    // Minimal locale for deterministic tool output.
    .env("LANG", "C")
    .env("LC_ALL", "C");

  for (key, value) in env {
    command.env(key, value);
  }
}

fn log_failure_output(output: &std::process::Output) {
  let stderr = String::from_utf8_lossy(&output.stderr);
  let stdout = String::from_utf8_lossy(&output.stdout);

  if !stderr.is_empty() {
    debug!(stderr = %stderr, "command stderr");
  }
  if !stdout.is_empty() {
    debug!(stdout = %stdout, "command stdout");
  }
}

/// Get the shell command and arguments for the current platform.
///
/// Interactive shells may source profile files that change the environment,
/// so the default is always the plain system shell rather than `$SHELL`.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn dirs(temp: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    (temp.path().join("root"), temp.path().join("tmp"))
  }

  #[tokio::test]
  async fn runs_simple_command() {
    let temp = TempDir::new().unwrap();
    let (root, tmp) = dirs(&temp);

    let out = execute_run("echo hello", &BTreeMap::new(), &root, &root, &tmp, None)
      .await
      .unwrap();

    assert_eq!(out, "hello");
  }

  #[tokio::test]
  async fn stage_bindings_reach_the_command() {
    let temp = TempDir::new().unwrap();
    let (root, tmp) = dirs(&temp);

    let mut env = BTreeMap::new();
    env.insert("ENV_NAME".to_string(), "blog".to_string());

    let out = execute_run("echo $ENV_NAME", &env, &root, &root, &tmp, None)
      .await
      .unwrap();

    assert_eq!(out, "blog");
  }

  #[tokio::test]
  async fn snapshot_root_is_exported() {
    let temp = TempDir::new().unwrap();
    let (root, tmp) = dirs(&temp);

    let out = execute_run("echo $SNAPSHOT_ROOT", &BTreeMap::new(), &root, &root, &tmp, None)
      .await
      .unwrap();

    assert_eq!(out, root.to_string_lossy());
  }

  #[tokio::test]
  async fn nonzero_exit_fails() {
    let temp = TempDir::new().unwrap();
    let (root, tmp) = dirs(&temp);

    let result = execute_run("exit 3", &BTreeMap::new(), &root, &root, &tmp, None).await;

    assert!(matches!(result, Err(ExecuteError::CmdFailed { code: Some(3), .. })));
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn installer_gets_positional_args_in_order() {
    let temp = TempDir::new().unwrap();
    let (root, tmp) = dirs(&temp);

    let script = temp.path().join("installer.sh");
    std::fs::write(&script, "#!/bin/sh\nprintf '%s ' \"$@\"\n").unwrap();
    let mut perms = std::fs::metadata(&script).unwrap().permissions();
    use std::os::unix::fs::PermissionsExt;
    perms.set_mode(0o755);
    std::fs::set_permissions(&script, perms).unwrap();

    let args = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let out = execute_installer(&script, &args, &BTreeMap::new(), &root, &root, &tmp)
      .await
      .unwrap();

    assert_eq!(out, "a b c");
  }

  #[tokio::test]
  #[cfg(unix)]
  async fn failing_installer_reports_exit_code() {
    let temp = TempDir::new().unwrap();
    let (root, tmp) = dirs(&temp);

    let script = temp.path().join("installer.sh");
    std::fs::write(&script, "#!/bin/sh\nexit 7\n").unwrap();
    let mut perms = std::fs::metadata(&script).unwrap().permissions();
    use std::os::unix::fs::PermissionsExt;
    perms.set_mode(0o755);
    std::fs::set_permissions(&script, perms).unwrap();

    let result = execute_installer(&script, &[], &BTreeMap::new(), &root, &root, &tmp).await;

    assert!(matches!(
      result,
      Err(ExecuteError::InstallerFailed { code: Some(7), .. })
    ));
  }

  #[test]
  fn get_shell_with_override() {
    let (shell, args) = get_shell(Some("/usr/bin/bash"));
    assert_eq!(shell, "/usr/bin/bash");
    assert_eq!(args, vec!["-c"]);
  }

  #[test]
  fn get_shell_default() {
    let (shell, args) = get_shell(None);
    #[cfg(unix)]
    {
      assert_eq!(shell, "/bin/sh");
      assert_eq!(args, vec!["-c"]);
    }
    #[cfg(windows)]
    {
      assert_eq!(shell, "powershell.exe");
      assert_eq!(args, vec!["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command"]);
    }
  }
}
