//! Building the backend command line.
//!
//! Backends installed through an environment manager (opam, nix) are often
//! only on `PATH` inside the user's login shell. When `login_shell` or a
//! `shell_prefix` is configured, the command is wrapped as
//! `<prefix> '<quoted command>'`, with `$SHELL -l -c` as the default prefix.

use std::process::{Command, ExitStatus};

use serde::Serialize;

use crate::config::BackendConfig;

/// Exit status of a backend process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl BackendExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for BackendExit {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Prepend the binary's parent directory to PATH so sibling tools are found.
pub fn prepare_path_env(cmd: &mut Command, binary_path: &str) {
    if !binary_path.contains('/') {
        return;
    }
    let Some(dir) = std::path::Path::new(binary_path)
        .parent()
        .and_then(|d| d.to_str())
    else {
        return;
    };

    let existing = std::env::var("PATH").unwrap_or_default();
    let combined = if existing.is_empty() {
        dir.to_string()
    } else {
        format!("{}:{}", dir, existing)
    };
    cmd.env("PATH", combined);
}

/// Build the command that launches the backend described by `config`.
///
/// The caller wires up stdin/stdout/stderr.
pub fn build_backend_command(config: &BackendConfig) -> Result<Command, String> {
    let mut cmd = if config.uses_shell() {
        wrap_in_shell(
            &config.binary_path,
            &config.args,
            config.shell_prefix.as_deref(),
        )?
    } else {
        let mut cmd = Command::new(&config.binary_path);
        cmd.args(&config.args);
        cmd
    };

    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }
    prepare_path_env(&mut cmd, &config.binary_path);

    Ok(cmd)
}

#[cfg(unix)]
fn wrap_in_shell(
    binary_path: &str,
    args: &[String],
    shell_prefix: Option<&str>,
) -> Result<Command, String> {
    let prefix = get_shell_prefix(shell_prefix);
    let mut prefix_parts = prefix.split_whitespace();
    let shell_program = prefix_parts
        .next()
        .ok_or_else(|| "Empty shell prefix".to_string())?;

    let quoted = std::iter::once(binary_path)
        .chain(args.iter().map(String::as_str))
        .map(|part| {
            shlex::try_quote(part)
                .map(|q| q.into_owned())
                .map_err(|_| format!("Cannot quote argument: {}", part))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut cmd = Command::new(shell_program);
    cmd.args(prefix_parts).arg(quoted.join(" "));
    Ok(cmd)
}

/// No login shell on Windows; run the binary directly.
#[cfg(windows)]
fn wrap_in_shell(
    binary_path: &str,
    args: &[String],
    _shell_prefix: Option<&str>,
) -> Result<Command, String> {
    let mut cmd = Command::new(binary_path);
    cmd.args(args);
    Ok(cmd)
}

/// Custom prefix if given, else `$SHELL -l -c`. Shells without POSIX
/// `-l -c` semantics fall back to bash or sh.
#[cfg(unix)]
fn get_shell_prefix(custom_prefix: Option<&str>) -> String {
    if let Some(prefix) = custom_prefix.filter(|p| !p.is_empty()) {
        return prefix.to_string();
    }

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let shell_name = std::path::Path::new(&shell)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    const NON_POSIX: [&str; 6] = ["fish", "nu", "nushell", "elvish", "xonsh", "ion"];
    let effective_shell = if NON_POSIX.contains(&shell_name) {
        if std::path::Path::new("/bin/bash").exists() {
            "/bin/bash"
        } else {
            "/bin/sh"
        }
    } else {
        &shell
    };

    format!("{} -l -c", effective_shell)
}
