//! Backend process spawning.
//!
//! Starts the backend with piped stdio. Stdout carries the wire protocol and
//! is handed to the session's reader; stderr is drained line by line on its
//! own thread into the log (and transcript) so it can neither block the
//! backend nor corrupt the protocol stream.

use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use std::thread;

use crate::config::BackendConfig;
use crate::logging::{log_line, LogHandle, STDERR};
use crate::shell::build_backend_command;

/// A freshly spawned backend with its protocol pipes taken out.
pub struct SpawnedBackend {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Spawn the backend described by `config`.
pub fn spawn_backend(
    config: &BackendConfig,
    label: &str,
    transcript: &LogHandle,
) -> Result<SpawnedBackend, String> {
    let mut cmd = build_backend_command(config)?;
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    log::info!(
        "Spawning backend for {}: {} {}",
        label,
        config.binary_path,
        config.args.join(" ")
    );
    let mut child = cmd
        .spawn()
        .map_err(|e| format!("Failed to spawn {}: {}", config.binary_path, e))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| "Failed to capture stdin".to_string())?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "Failed to capture stdout".to_string())?;

    if let Some(stderr) = child.stderr.take() {
        let label = label.to_string();
        let transcript = LogHandle::clone(transcript);
        thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines().map_while(Result::ok) {
                log::warn!("backend stderr [{}]: {}", label, line);
                log_line(&transcript, STDERR, &line);
            }
        });
    }

    Ok(SpawnedBackend {
        child,
        stdin,
        stdout,
    })
}
