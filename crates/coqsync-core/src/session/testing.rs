//! In-process stand-in for the backend.
//!
//! [`FakeCoq`] answers calls the way `coqidetop` does. It sits behind a pair
//! of in-memory streams: the writer half parses each flushed call and queues
//! the replies, split into small chunks, for the reader half.

use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::feedback::{FeedbackSink, LogFeedback};
use crate::wire::{Element, WireParser};

use super::error::SessionError;
use super::process::{ProcessSession, SessionOptions};

/// Replies are cut into pieces this size to exercise reassembly.
const REPLY_CHUNK: usize = 7;

pub(crate) const ABOUT_REPLY: &str = r#"<value val="good"><coq_info><string>8.17.1</string><string>20230413</string><string>Jun 2023</string><string>Jun 2023</string></coq_info></value>"#;

pub(crate) enum Output {
    Send(String),
    /// Close stdout.
    Hangup,
}

impl Output {
    pub(crate) fn send(text: impl Into<String>) -> Self {
        Output::Send(text.into())
    }
}

type Handler = Box<dyn FnMut(&Element) -> Vec<Output> + Send>;

/// Every call the fake received, in order.
#[derive(Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<Element>>>);

impl CallLog {
    pub(crate) fn calls(&self) -> Vec<Element> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.val().unwrap_or_default().to_string())
            .collect()
    }

    pub(crate) fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| *n == name).count()
    }

    fn record(&self, call: Element) {
        self.0.lock().unwrap().push(call);
    }
}

/// Scripted backend with Coq-like defaults.
pub(crate) struct FakeCoq {
    next_id: u64,
    reject: Option<Box<dyn Fn(&str) -> bool + Send>>,
    overrides: HashMap<String, Handler>,
}

impl FakeCoq {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            reject: None,
            overrides: HashMap::new(),
        }
    }

    /// Fail every `Add` whose sentence matches `pred`.
    pub(crate) fn rejecting(mut self, pred: impl Fn(&str) -> bool + Send + 'static) -> Self {
        self.reject = Some(Box::new(pred));
        self
    }

    /// Replace the default answer to calls named `name`.
    pub(crate) fn on(
        mut self,
        name: &str,
        handler: impl FnMut(&Element) -> Vec<Output> + Send + 'static,
    ) -> Self {
        self.overrides.insert(name.to_string(), Box::new(handler));
        self
    }

    fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn respond(&mut self, call: &Element) -> Vec<Output> {
        let name = call.val().unwrap_or_default();
        if let Some(handler) = self.overrides.get_mut(name) {
            return handler(call);
        }
        match name {
            "About" => vec![Output::send(ABOUT_REPLY)],
            "Init" => {
                let id = self.fresh_id();
                vec![Output::send(format!(
                    r#"<value val="good"><state_id val="{id}"/></value>"#
                ))]
            }
            "Add" => {
                let text = call
                    .descendant("string")
                    .map(Element::text)
                    .unwrap_or_default();
                if self.reject.as_ref().is_some_and(|reject| reject(&text)) {
                    return vec![Output::send(format!(
                        r#"<value val="fail" loc_s="0" loc_e="{}"><state_id val="{}"/><string>Syntax error</string></value>"#,
                        text.len(),
                        self.next_id - 1
                    ))];
                }
                let id = self.fresh_id();
                vec![
                    Output::send(format!(
                        r#"<feedback object="state" route="0"><state_id val="{id}"/><feedback_content val="processed"/></feedback>"#
                    )),
                    Output::send(format!(
                        r#"<value val="good"><pair><state_id val="{id}"/><pair><union val="in_l"><unit/></union><string></string></pair></pair></value>"#
                    )),
                ]
            }
            "Edit_at" => vec![Output::send(
                r#"<value val="good"><union val="in_l"><unit/></union></value>"#,
            )],
            other => vec![Output::send(format!(
                r#"<value val="fail"><state_id val="0"/>unknown call {other}</value>"#
            ))],
        }
    }
}

/// Stdin side: parses calls and produces the replies.
pub(crate) struct ScriptedWriter {
    parser: WireParser,
    fake: FakeCoq,
    stdout: Option<Sender<Vec<u8>>>,
    log: CallLog,
}

impl ScriptedWriter {
    fn emit(&mut self, text: &str) {
        if let Some(stdout) = &self.stdout {
            for piece in text.as_bytes().chunks(REPLY_CHUNK) {
                let _ = stdout.send(piece.to_vec());
            }
        }
    }
}

impl Write for ScriptedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stdout.is_none() {
            return Err(io::Error::new(ErrorKind::BrokenPipe, "backend hung up"));
        }
        self.parser.feed(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        loop {
            let call = match self.parser.next_delivery() {
                Ok(Some(delivery)) => delivery.into_element(),
                Ok(None) => return Ok(()),
                Err(e) => return Err(io::Error::new(ErrorKind::InvalidData, e.to_string())),
            };
            self.log.record(call.clone());
            for output in self.fake.respond(&call) {
                match output {
                    Output::Send(text) => self.emit(&text),
                    Output::Hangup => self.stdout = None,
                }
            }
        }
    }
}

/// Stdout side: blocks until the writer queues bytes; EOF once it is gone.
pub(crate) struct ScriptedReader {
    chunks: Receiver<Vec<u8>>,
    current: Vec<u8>,
    pos: usize,
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.current.len() {
            match self.chunks.recv() {
                Ok(chunk) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len() - self.pos);
        buf[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

pub(crate) fn scripted(fake: FakeCoq) -> (ScriptedReader, ScriptedWriter, CallLog) {
    let (tx, rx) = mpsc::channel();
    let log = CallLog::default();
    let reader = ScriptedReader {
        chunks: rx,
        current: Vec::new(),
        pos: 0,
    };
    let writer = ScriptedWriter {
        parser: WireParser::new(),
        fake,
        stdout: Some(tx),
        log: log.clone(),
    };
    (reader, writer, log)
}

pub(crate) fn fake_session_with(
    fake: FakeCoq,
    options: SessionOptions,
    feedback: Arc<dyn FeedbackSink>,
) -> Result<(ProcessSession, CallLog), SessionError> {
    let (reader, writer, log) = scripted(fake);
    let session = ProcessSession::connect(reader, writer, None, options, feedback)?;
    Ok((session, log))
}

pub(crate) fn fake_session(fake: FakeCoq) -> (ProcessSession, CallLog) {
    fake_session_with(fake, SessionOptions::new("test"), Arc::new(LogFeedback)).unwrap()
}
