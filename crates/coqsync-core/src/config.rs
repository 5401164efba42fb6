//! Backend configuration.
//!
//! Settings are read from a JSON file, by default `config.json` under
//! [`config_dir`](crate::paths::config_dir). Every field is optional; missing
//! fields take the defaults below.
//!
//! ```json
//! {
//!   "binary_path": "/opt/coq/bin/coqidetop",
//!   "login_shell": true,
//!   "call_timeout_ms": 30000,
//!   "transcript_dir": "/tmp/coqsync-logs"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::paths::config_dir;

/// Flags putting `coqidetop` in pipe mode with the XML protocol.
pub const DEFAULT_ARGS: [&str; 5] = [
    "-main-channel",
    "stdfds",
    "--xml_format=Ppcmds",
    "-async-proofs",
    "on",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// How to launch and talk to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Path to (or name of) the backend executable
    pub binary_path: String,
    /// Command-line flags
    pub args: Vec<String>,
    /// Working directory for the process
    pub working_dir: Option<String>,
    /// Run through the user's login shell so PATH from shell profiles applies
    pub login_shell: bool,
    /// Custom shell prefix (e.g., "/bin/zsh -l -c"), implies `login_shell`
    pub shell_prefix: Option<String>,
    /// Give up on a call after this long and tear the session down
    pub call_timeout_ms: Option<u64>,
    /// How long to wait for the backend to exit after closing its stdin
    pub shutdown_grace_ms: u64,
    /// Size of each read from the backend's stdout
    pub read_chunk_size: usize,
    /// Directory for per-session wire transcripts
    pub transcript_dir: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            binary_path: "coqidetop".to_string(),
            args: DEFAULT_ARGS.iter().map(|s| s.to_string()).collect(),
            working_dir: None,
            login_shell: false,
            shell_prefix: None,
            call_timeout_ms: None,
            shutdown_grace_ms: 3000,
            read_chunk_size: 4096,
            transcript_dir: None,
        }
    }
}

impl BackendConfig {
    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Load `path` (or the default location) if it exists, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// `config.json` inside [`config_dir`], if one can be determined.
    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("config.json"))
    }

    /// Save the config as pretty JSON, writing through a temp file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn binary_path(mut self, path: impl Into<String>) -> Self {
        self.binary_path = path.into();
        self
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Whether the command should be wrapped in a shell.
    pub fn uses_shell(&self) -> bool {
        self.login_shell || self.shell_prefix.as_deref().is_some_and(|p| !p.is_empty())
    }
}
