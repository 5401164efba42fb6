//! Wire transcripts.
//!
//! Each session can append its raw traffic to `{dir}/{label}.log`, one
//! timestamped line per outbound call, inbound chunk or stderr line.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{SecondsFormat, Utc};

/// Thread-safe handle to an append-only transcript file.
pub type LogHandle = Arc<Mutex<Option<File>>>;

/// Direction markers used in transcripts.
pub const STDIN: &str = "STDIN";
pub const STDOUT: &str = "STDOUT";
pub const STDERR: &str = "STDERR";

/// A handle that discards everything.
pub fn disabled() -> LogHandle {
    Arc::new(Mutex::new(None))
}

/// Write a timestamped line to the transcript (if present).
pub fn log_line(handle: &LogHandle, direction: &str, data: &str) {
    let mut guard = handle.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(file) = guard.as_mut() {
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let _ = writeln!(file, "[{}] {}: {}", ts, direction, data.trim_end());
        let _ = file.flush();
    }
}

/// Open (or create) `{log_dir}/{label}.log`. Without a directory, or if the
/// file cannot be opened, the returned handle is disabled.
pub fn open_log_file(log_dir: Option<&str>, label: &str) -> LogHandle {
    let file = log_dir.and_then(|dir| {
        let path = Path::new(dir).join(format!("{}.log", sanitize(label)));
        if let Err(e) = std::fs::create_dir_all(dir) {
            log::warn!("Cannot create transcript dir {}: {}", dir, e);
            return None;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| log::warn!("Cannot open transcript {}: {}", path.display(), e))
            .ok()
    });
    Arc::new(Mutex::new(file))
}

/// Labels come from document handles, which may be file paths.
fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}
