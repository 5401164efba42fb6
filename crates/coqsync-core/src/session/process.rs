//! A live connection to one backend process.
//!
//! The session owns the backend's stdin and a reader thread that owns the
//! stdout pipe and a [`WireParser`]. Responses come back to the caller over
//! an mpsc channel; feedback goes straight to the session's
//! [`FeedbackSink`]. The wire carries no request ids, so at most one call is
//! outstanding at a time: [`ProcessSession::call`] holds a lock from send
//! until its reply arrives.

use std::io::{self, ErrorKind, Read, Write};
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::BackendConfig;
use crate::feedback::FeedbackSink;
use crate::logging::{disabled, log_line, open_log_file, LogHandle, STDIN, STDOUT};
use crate::shell::BackendExit;
use crate::spawn::{spawn_backend, SpawnedBackend};
use crate::wire::{
    new_state_id, Call, CoqInfo, Delivery, Element, ParseError, Reply, StateId, WireParser,
};

use super::error::SessionError;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Per-session settings, usually derived from a [`BackendConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Name used in logs, transcripts and feedback routing
    pub label: String,
    pub call_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
    pub read_chunk_size: usize,
    pub transcript: LogHandle,
}

impl SessionOptions {
    pub fn new(label: impl Into<String>) -> Self {
        let defaults = BackendConfig::default();
        Self {
            label: label.into(),
            call_timeout: defaults.call_timeout(),
            shutdown_grace: defaults.shutdown_grace(),
            read_chunk_size: defaults.read_chunk_size,
            transcript: disabled(),
        }
    }

    pub fn from_config(config: &BackendConfig, label: &str) -> Self {
        Self {
            label: label.to_string(),
            call_timeout: config.call_timeout(),
            shutdown_grace: config.shutdown_grace(),
            read_chunk_size: config.read_chunk_size.max(1),
            transcript: open_log_file(config.transcript_dir.as_deref(), label),
        }
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }
}

/// What the reader thread hands back to the caller.
enum ReaderEvent {
    Response(Element),
    Fatal(ParseError),
    ReadFailed(String),
}

pub struct ProcessSession {
    label: String,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    responses: Mutex<Receiver<ReaderEvent>>,
    call_lock: Mutex<()>,
    child: Mutex<Option<Child>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    dead: Mutex<Option<String>>,
    shut_down: AtomicBool,
    exit: Mutex<Option<BackendExit>>,
    initial_id: StateId,
    info: Option<CoqInfo>,
    call_timeout: Option<Duration>,
    shutdown_grace: Duration,
    transcript: LogHandle,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProcessSession {
    /// Spawn the backend described by `config` and run the handshake.
    pub fn start(
        config: &BackendConfig,
        label: &str,
        feedback: Arc<dyn FeedbackSink>,
    ) -> Result<Self, SessionError> {
        let options = SessionOptions::from_config(config, label);
        let SpawnedBackend {
            child,
            stdin,
            stdout,
        } = spawn_backend(config, label, &options.transcript).map_err(SessionError::Spawn)?;
        Self::connect(stdout, stdin, Some(child), options, feedback)
    }

    /// Run a session over already-open streams.
    ///
    /// `child`, when given, is waited on (and killed if needed) at shutdown.
    /// Fails if the `About`/`Init` handshake does not complete.
    pub fn connect<R, W>(
        reader: R,
        writer: W,
        child: Option<Child>,
        options: SessionOptions,
        feedback: Arc<dyn FeedbackSink>,
    ) -> Result<Self, SessionError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let reader_thread = {
            let label = options.label.clone();
            let transcript = LogHandle::clone(&options.transcript);
            let chunk_size = options.read_chunk_size.max(1);
            thread::Builder::new()
                .name(format!("coqsync-reader-{}", label))
                .spawn(move || read_loop(reader, tx, feedback, &label, &transcript, chunk_size))
        };
        let reader_thread = match reader_thread {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(mut child) = child {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                return Err(e.into());
            }
        };

        let writer: Box<dyn Write + Send> = Box::new(writer);
        let mut session = Self {
            label: options.label,
            writer: Mutex::new(Some(writer)),
            responses: Mutex::new(rx),
            call_lock: Mutex::new(()),
            child: Mutex::new(child),
            reader: Mutex::new(Some(reader_thread)),
            dead: Mutex::new(None),
            shut_down: AtomicBool::new(false),
            exit: Mutex::new(None),
            initial_id: StateId::new(""),
            info: None,
            call_timeout: options.call_timeout,
            shutdown_grace: options.shutdown_grace,
            transcript: options.transcript,
        };

        // A failed handshake drops `session`, which shuts the backend down.
        let about = session.call_good(&Call::About)?;
        session.info = CoqInfo::from_value(&about);
        match &session.info {
            Some(info) => log::info!(
                "Backend [{}] is Coq {} (protocol {})",
                session.label,
                info.version,
                info.protocol_version
            ),
            None => log::warn!("Backend [{}] About reply had no coq_info", session.label),
        }
        session.initial_id = session.init()?;
        log::debug!(
            "Session [{}] ready at state {}",
            session.label,
            session.initial_id
        );
        Ok(session)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// State the backend reported for the empty document.
    pub fn initial_id(&self) -> &StateId {
        &self.initial_id
    }

    /// Version information captured during the handshake.
    pub fn backend_info(&self) -> Option<&CoqInfo> {
        self.info.as_ref()
    }

    pub fn is_alive(&self) -> bool {
        lock(&self.dead).is_none()
    }

    /// Why the session stopped accepting calls, if it has.
    pub fn death_reason(&self) -> Option<String> {
        lock(&self.dead).clone()
    }

    /// Write one raw call and flush it.
    ///
    /// Prefer [`call`](Self::call); pairing `send` with
    /// [`recv_response`](Self::recv_response) is left to the caller.
    pub fn send(&self, raw: &str) -> Result<(), SessionError> {
        self.ensure_alive()?;
        let mut writer = lock(&self.writer);
        let Some(stream) = writer.as_mut() else {
            return Err(SessionError::Dead("stdin is closed".to_string()));
        };
        log_line(&self.transcript, STDIN, raw);
        log::trace!("-> [{}] {}", self.label, raw);
        let written = stream
            .write_all(raw.as_bytes())
            .and_then(|()| stream.flush());
        drop(writer);
        written.map_err(|e| self.fail(SessionError::Io(e)))
    }

    /// Block until the next response element.
    pub fn recv_response(&self) -> Result<Element, SessionError> {
        self.wait_for("response")
    }

    /// Send `call` and wait for its reply.
    pub fn call(&self, call: &Call) -> Result<Reply, SessionError> {
        let _turn = lock(&self.call_lock);
        self.send(&call.to_wire())?;
        let element = self.wait_for(call.name())?;
        let name = element.name.clone();
        Reply::classify(element).ok_or_else(|| {
            self.fail(SessionError::UnexpectedResponse(format!(
                "{} answered with <{}>",
                call.name(),
                name
            )))
        })
    }

    pub fn about(&self) -> Result<CoqInfo, SessionError> {
        let value = self.call_good(&Call::About)?;
        CoqInfo::from_value(&value).ok_or_else(|| {
            self.fail(SessionError::UnexpectedResponse(
                "About reply has no coq_info".to_string(),
            ))
        })
    }

    pub fn init(&self) -> Result<StateId, SessionError> {
        let value = self.call_good(&Call::Init)?;
        self.expect_state_id("Init", &value)
    }

    /// Submit one sentence on top of `base`; returns the new state.
    pub fn add(&self, text: &str, base: &StateId, edit_id: usize) -> Result<StateId, SessionError> {
        let value = self.call_good(&Call::Add {
            text: text.to_string(),
            base: base.clone(),
            edit_id,
        })?;
        self.expect_state_id("Add", &value)
    }

    /// Roll the backend back to `target`.
    pub fn edit_at(&self, target: &StateId) -> Result<(), SessionError> {
        self.call_good(&Call::EditAt {
            target: target.clone(),
        })?;
        Ok(())
    }

    /// Close stdin, wait out the grace period, kill if still running.
    ///
    /// Runs once; later calls (including the one from `Drop`) return the
    /// exit status recorded the first time.
    pub fn shutdown(&self) -> Option<BackendExit> {
        let mut exit = lock(&self.exit);
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return exit.clone();
        }

        log::info!("Shutting down backend [{}]", self.label);
        self.mark_dead("session was shut down");
        drop(lock(&self.writer).take());

        let (status, killed) = self.wait_for_exit();
        let reader = lock(&self.reader).take();
        match reader {
            // A killed backend may leave a grandchild holding stdout open.
            Some(_) if killed => log::debug!("Not waiting for reader of [{}]", self.label),
            Some(handle) => {
                if handle.join().is_err() {
                    log::warn!("Reader thread for [{}] panicked", self.label);
                }
            }
            None => {}
        }

        match &status {
            Some(s) if !s.success() => log::warn!(
                "Backend [{}] exited with code {:?} signal {:?}",
                self.label,
                s.code,
                s.signal
            ),
            Some(_) => log::info!("Backend [{}] exited cleanly", self.label),
            None => {}
        }
        *exit = status.clone();
        status
    }

    fn call_good(&self, call: &Call) -> Result<Element, SessionError> {
        match self.call(call)? {
            Reply::Good(value) => Ok(value),
            Reply::Fail(failure) => {
                log::debug!("[{}] {} rejected: {}", self.label, call.name(), failure);
                Err(SessionError::Rejected(failure))
            }
        }
    }

    fn expect_state_id(&self, call: &str, value: &Element) -> Result<StateId, SessionError> {
        new_state_id(value).ok_or_else(|| {
            self.fail(SessionError::UnexpectedResponse(format!(
                "{} reply has no state_id",
                call
            )))
        })
    }

    fn wait_for(&self, call: &str) -> Result<Element, SessionError> {
        self.ensure_alive()?;
        let responses = lock(&self.responses);
        let event = match self.call_timeout {
            Some(timeout) => match responses.recv_timeout(timeout) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    drop(responses);
                    self.kill();
                    return Err(self.fail(SessionError::Timeout {
                        call: call.to_string(),
                        timeout,
                    }));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(self.fail(SessionError::BackendExited))
                }
            },
            None => match responses.recv() {
                Ok(event) => event,
                Err(_) => return Err(self.fail(SessionError::BackendExited)),
            },
        };

        match event {
            ReaderEvent::Response(element) => Ok(element),
            ReaderEvent::Fatal(err) => Err(self.fail(err.into())),
            ReaderEvent::ReadFailed(msg) => Err(self.fail(SessionError::Io(io::Error::other(msg)))),
        }
    }

    fn ensure_alive(&self) -> Result<(), SessionError> {
        match lock(&self.dead).as_ref() {
            Some(reason) => Err(SessionError::Dead(reason.clone())),
            None => Ok(()),
        }
    }

    /// Mark the session dead after a fatal error and pass the error on.
    fn fail(&self, err: SessionError) -> SessionError {
        if err.is_fatal() {
            log::error!("Session [{}] failed: {}", self.label, err);
            self.mark_dead(&err.to_string());
        }
        err
    }

    fn mark_dead(&self, reason: &str) {
        let mut dead = lock(&self.dead);
        if dead.is_none() {
            *dead = Some(reason.to_string());
        }
    }

    /// Force the backend down. Closing stdin also ends in-process backends.
    fn kill(&self) {
        drop(lock(&self.writer).take());
        if let Some(child) = lock(&self.child).as_mut() {
            if let Err(e) = child.kill() {
                log::debug!("Kill of backend [{}] failed: {}", self.label, e);
            }
        }
    }

    fn wait_for_exit(&self) -> (Option<BackendExit>, bool) {
        let Some(mut child) = lock(&self.child).take() else {
            return (None, false);
        };
        let deadline = Instant::now() + self.shutdown_grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return (Some(status.into()), false),
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL_INTERVAL),
                Ok(None) => {
                    log::warn!(
                        "Backend [{}] still running after {:?}; killing it",
                        self.label,
                        self.shutdown_grace
                    );
                    let _ = child.kill();
                    return (child.wait().ok().map(BackendExit::from), true);
                }
                Err(e) => {
                    log::warn!("Cannot wait for backend [{}]: {}", self.label, e);
                    let _ = child.kill();
                    return (None, true);
                }
            }
        }
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reader thread body: parse stdout, route feedback, forward responses.
fn read_loop<R: Read>(
    mut stdout: R,
    responses: Sender<ReaderEvent>,
    feedback: Arc<dyn FeedbackSink>,
    label: &str,
    transcript: &LogHandle,
    chunk_size: usize,
) {
    let mut parser = WireParser::new();
    let mut chunk = vec![0u8; chunk_size];
    loop {
        let n = match stdout.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::error!("Reading from backend [{}] failed: {}", label, e);
                let _ = responses.send(ReaderEvent::ReadFailed(e.to_string()));
                return;
            }
        };
        log_line(transcript, STDOUT, &String::from_utf8_lossy(&chunk[..n]));
        parser.feed(&chunk[..n]);

        loop {
            match parser.next_delivery() {
                Ok(Some(Delivery::Response(element))) => {
                    log::trace!("<- [{}] <{}>", label, element.name);
                    if responses.send(ReaderEvent::Response(element)).is_err() {
                        return;
                    }
                }
                Ok(Some(Delivery::Feedback(element))) => feedback.deliver(label, element),
                Ok(None) => break,
                Err(err) => {
                    log::error!("Protocol error from backend [{}]: {}", label, err);
                    let _ = responses.send(ReaderEvent::Fatal(err));
                    return;
                }
            }
        }
    }

    if parser.depth() > 0 || parser.buffered() > 0 {
        log::warn!("Backend [{}] output ended inside an element", label);
    }
    log::debug!("Reader for [{}] finished", label);
}
