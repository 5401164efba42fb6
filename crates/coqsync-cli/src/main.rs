//! Check a Coq file against `coqidetop`, one sentence at a time.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, PoisonError};

use clap::Parser;
use coqsync_core::feedback::LogFeedback;
use coqsync_core::{
    BackendConfig, DocumentError, DocumentHandle, DocumentState, SessionRegistry, TextBuffer,
    TextSource,
};

#[derive(Parser, Debug)]
#[command(name = "coqsync", version, about = "Step a Coq file through coqidetop")]
struct Cli {
    /// Coq source file
    file: PathBuf,

    /// Config file (defaults to config.json in the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend executable
    #[arg(long)]
    coqtop: Option<String>,

    /// Write wire transcripts into this directory
    #[arg(long)]
    transcript_dir: Option<String>,

    /// Give up on a backend call after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Launch the backend through the login shell
    #[arg(long)]
    login_shell: bool,

    /// Commit up to this byte offset
    #[arg(long, conflicts_with = "steps")]
    until: Option<usize>,

    /// Commit this many units
    #[arg(long)]
    steps: Option<usize>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<BackendConfig, Box<dyn Error>> {
    let mut config = BackendConfig::load_or_default(cli.config.as_deref())?;
    if let Some(coqtop) = &cli.coqtop {
        config.binary_path = coqtop.clone();
    }
    if let Some(dir) = &cli.transcript_dir {
        config.transcript_dir = Some(dir.clone());
    }
    if let Some(ms) = cli.timeout_ms {
        config.call_timeout_ms = Some(ms);
    }
    if cli.login_shell {
        config.login_shell = true;
    }
    Ok(config)
}

/// Returns `Ok(false)` when the backend rejected a sentence.
fn run(cli: &Cli) -> Result<bool, Box<dyn Error>> {
    let config = load_config(cli)?;
    let mut buffer = TextBuffer::new(std::fs::read_to_string(&cli.file)?);

    let registry = SessionRegistry::new();
    let handle = DocumentHandle(cli.file.display().to_string());
    let label = handle.to_string();
    let document = registry.get_or_try_insert_with(&handle, || {
        DocumentState::open(&config, &label, Arc::new(LogFeedback))
    })?;

    let mut doc = document.lock().unwrap_or_else(PoisonError::into_inner);
    let outcome = match cli.steps {
        Some(steps) => step(&mut doc, &mut buffer, steps),
        None => {
            let target = cli.until.unwrap_or(buffer.len());
            doc.goto(&mut buffer, target)
        }
    };
    for line in summarize(&doc, &buffer) {
        println!("{}", line);
    }
    let end = doc.committed_end();
    drop(doc);
    registry.close(&handle);

    match outcome {
        Ok(true) => Ok(true),
        Ok(false) => {
            log::warn!("Stopped at byte {}: nothing more can be committed", end);
            Ok(true)
        }
        Err(DocumentError::Rejected(failure)) => {
            eprintln!("Rejected after byte {}: {}", end, failure);
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn step(
    doc: &mut DocumentState,
    buffer: &mut TextBuffer,
    steps: usize,
) -> Result<bool, DocumentError> {
    for _ in 0..steps {
        if !doc.next(buffer)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// One line per span: region, state id (or `skip`), and the start of the text.
fn summarize(doc: &DocumentState, buffer: &TextBuffer) -> Vec<String> {
    doc.spans()
        .iter()
        .map(|span| {
            let id = span
                .backend_id
                .as_ref()
                .map_or("skip".to_string(), ToString::to_string);
            let text = buffer.substr(span.region);
            let mut preview: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if preview.chars().count() > 60 {
                preview = preview.chars().take(57).collect::<String>() + "...";
            }
            format!("{:<12} {:>6}  {}", span.region.to_string(), id, preview)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("coqsync").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"binary_path": "/opt/coq/coqidetop", "call_timeout_ms": 5}"#)
            .unwrap();
        let path = path.to_str().unwrap();

        let config = load_config(&parse(&["--config", path, "a.v"])).unwrap();
        assert_eq!(config.binary_path, "/opt/coq/coqidetop");
        assert_eq!(config.call_timeout_ms, Some(5));
        assert!(!config.login_shell);

        let config = load_config(&parse(&[
            "--config",
            path,
            "--coqtop",
            "coqidetop.opt",
            "--timeout-ms",
            "900",
            "--login-shell",
            "a.v",
        ]))
        .unwrap();
        assert_eq!(config.binary_path, "coqidetop.opt");
        assert_eq!(config.call_timeout_ms, Some(900));
        assert!(config.login_shell);
    }

    #[test]
    fn missing_config_file_means_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let config = load_config(&parse(&["--config", path.to_str().unwrap(), "a.v"])).unwrap();
        assert_eq!(config, BackendConfig::default());
    }

    #[test]
    fn until_and_steps_are_exclusive() {
        let args = ["coqsync", "--until", "10", "--steps", "2", "a.v"];
        assert!(Cli::try_parse_from(args).is_err());
        assert_eq!(parse(&["--steps", "2", "a.v"]).steps, Some(2));
    }
}
