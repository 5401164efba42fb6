//! Incremental parser for the backend's tagged-element stream.
//!
//! The backend writes a sequence of XML-like elements to stdout with no
//! framing. Reads from the pipe arrive in arbitrary chunks, so a single read
//! may end halfway through a tag, an attribute value or a multi-byte
//! character. [`WireParser`] buffers bytes and only consumes a token once
//! the whole of it (leading text run plus tag head) is available.
//!
//! # Usage
//!
//! ```
//! use coqsync_core::wire::{Delivery, WireParser};
//!
//! let mut parser = WireParser::new();
//! parser.feed(b"<value val=\"good\"><state_");
//! assert!(parser.next_delivery().unwrap().is_none());
//!
//! parser.feed(b"id val=\"1\"/></value>");
//! match parser.next_delivery().unwrap() {
//!     Some(Delivery::Response(e)) => assert_eq!(e.val(), Some("good")),
//!     other => panic!("unexpected {other:?}"),
//! }
//! ```
//!
//! Completed root-level elements named `feedback` are reported as
//! [`Delivery::Feedback`]; everything else is a [`Delivery::Response`].

use thiserror::Error;

use super::element::{Child, Element};
use super::entities::EntityTable;

/// Name of the asynchronous notification element.
pub const FEEDBACK: &str = "feedback";

/// Fatal wire-format violations. Parsing never recovers from these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Tag expected, found: {found}")]
    TagExpected { found: String },

    #[error("Mismatched closing tag: expected </{expected}>, found </{found}>")]
    MismatchedClose { expected: String, found: String },

    #[error("Closing tag </{0}> without an open element")]
    UnexpectedClose(String),

    #[error("Duplicate attribute '{attribute}' on <{element}>")]
    DuplicateAttribute { element: String, attribute: String },

    #[error("Unknown entity: &{0};")]
    UnknownEntity(String),

    #[error("Unterminated entity: {0}")]
    UnterminatedEntity(String),

    #[error("Malformed tag: <{0}>")]
    MalformedTag(String),

    #[error("Malformed attribute: {0}")]
    MalformedAttribute(String),

    #[error("Invalid UTF-8 in wire data")]
    InvalidUtf8,
}

/// A completed root-level element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Reply to the outstanding call.
    Response(Element),
    /// Unsolicited notification, never a call reply.
    Feedback(Element),
}

impl Delivery {
    pub fn element(&self) -> &Element {
        match self {
            Delivery::Response(e) | Delivery::Feedback(e) => e,
        }
    }

    pub fn into_element(self) -> Element {
        match self {
            Delivery::Response(e) | Delivery::Feedback(e) => e,
        }
    }
}

enum Tag {
    Open { element: Element, self_closing: bool },
    Close(String),
}

enum Step {
    Delivered(Delivery),
    Progress,
    NeedMore,
}

/// Streaming parser state: byte buffer, cursor and open-element stack.
#[derive(Debug)]
pub struct WireParser {
    buffer: Vec<u8>,
    cursor: usize,
    /// Open elements, outermost first. Empty means we are at the root.
    stack: Vec<Element>,
    entities: EntityTable,
    failed: Option<ParseError>,
}

impl WireParser {
    pub fn new() -> Self {
        Self::with_entities(EntityTable::default())
    }

    pub fn with_entities(entities: EntityTable) -> Self {
        Self {
            buffer: Vec::new(),
            cursor: 0,
            stack: Vec::new(),
            entities,
            failed: None,
        }
    }

    /// Append a chunk read from the backend.
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.failed.is_none() {
            self.buffer.extend_from_slice(chunk);
        }
    }

    /// Extract the next completed root-level element.
    ///
    /// Returns `Ok(None)` once the buffered bytes hold no further complete
    /// token; the consumed prefix is discarded at that point. After an error
    /// the parser is poisoned and keeps returning the same error.
    pub fn next_delivery(&mut self) -> Result<Option<Delivery>, ParseError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }

        loop {
            match self.step() {
                Ok(Step::Delivered(delivery)) => return Ok(Some(delivery)),
                Ok(Step::Progress) => continue,
                Ok(Step::NeedMore) => {
                    self.compact();
                    return Ok(None);
                }
                Err(err) => {
                    self.failed = Some(err.clone());
                    self.buffer.clear();
                    self.cursor = 0;
                    self.stack.clear();
                    return Err(err);
                }
            }
        }
    }

    /// Feed a chunk and collect everything it completes.
    pub fn parse_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Delivery>, ParseError> {
        self.feed(chunk);
        let mut out = Vec::new();
        while let Some(delivery) = self.next_delivery()? {
            out.push(delivery);
        }
        Ok(out)
    }

    /// Number of currently open elements.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Bytes held back waiting for the rest of a token.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    fn compact(&mut self) {
        self.buffer.drain(..self.cursor);
        self.cursor = 0;
    }

    fn step(&mut self) -> Result<Step, ParseError> {
        let start = skip_whitespace(&self.buffer, self.cursor);
        self.cursor = start;
        if start >= self.buffer.len() {
            return Ok(Step::NeedMore);
        }

        if self.stack.is_empty() && self.buffer[start] != b'<' {
            let end = (start + 32).min(self.buffer.len());
            return Err(ParseError::TagExpected {
                found: String::from_utf8_lossy(&self.buffer[start..end]).into_owned(),
            });
        }

        let Some(lt) = self.buffer[start..]
            .iter()
            .position(|&b| b == b'<')
            .map(|i| start + i)
        else {
            return Ok(Step::NeedMore);
        };
        let Some(gt) = find_tag_end(&self.buffer, lt + 1) else {
            return Ok(Step::NeedMore);
        };

        let raw_text = trim_end(&self.buffer[start..lt]);
        let text = if raw_text.is_empty() {
            None
        } else {
            Some(decode(raw_text, &self.entities)?)
        };
        let tag = parse_head(&self.buffer[lt + 1..gt], &self.entities)?;
        self.cursor = gt + 1;

        if let Some(text) = text {
            if let Some(top) = self.stack.last_mut() {
                top.children.push(Child::Text(text));
            }
        }

        match tag {
            Tag::Close(name) => {
                let open = self
                    .stack
                    .pop()
                    .ok_or_else(|| ParseError::UnexpectedClose(name.clone()))?;
                if open.name != name {
                    return Err(ParseError::MismatchedClose {
                        expected: open.name,
                        found: name,
                    });
                }
                Ok(self.attach(open))
            }
            Tag::Open {
                element,
                self_closing: true,
            } => Ok(self.attach(element)),
            Tag::Open { element, .. } => {
                self.stack.push(element);
                Ok(Step::Progress)
            }
        }
    }

    fn attach(&mut self, element: Element) -> Step {
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(Child::Element(element));
                Step::Progress
            }
            None if element.is(FEEDBACK) => Step::Delivered(Delivery::Feedback(element)),
            None => Step::Delivered(Delivery::Response(element)),
        }
    }
}

impl Default for WireParser {
    fn default() -> Self {
        Self::new()
    }
}

fn skip_whitespace(buf: &[u8], mut pos: usize) -> usize {
    while pos < buf.len() && buf[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

fn trim_end(mut bytes: &[u8]) -> &[u8] {
    while let [rest @ .., last] = bytes {
        if !last.is_ascii_whitespace() {
            break;
        }
        bytes = rest;
    }
    bytes
}

/// Position of the `>` closing the tag head that starts at `from`,
/// ignoring any `>` inside quoted attribute values.
fn find_tag_end(buf: &[u8], from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (offset, &b) in buf[from..].iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(from + offset),
            None => {}
        }
    }
    None
}

fn decode(raw: &[u8], entities: &EntityTable) -> Result<String, ParseError> {
    let text = std::str::from_utf8(raw).map_err(|_| ParseError::InvalidUtf8)?;
    entities.decode(text)
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '=' | '"' | '\'' | '/'))
}

fn parse_head(raw: &[u8], entities: &EntityTable) -> Result<Tag, ParseError> {
    let head = std::str::from_utf8(raw).map_err(|_| ParseError::InvalidUtf8)?;
    let head = head.trim();

    if let Some(rest) = head.strip_prefix('/') {
        let name = rest.trim();
        if !is_valid_name(name) {
            return Err(ParseError::MalformedTag(head.to_string()));
        }
        return Ok(Tag::Close(name.to_string()));
    }

    let (body, self_closing) = match head.strip_suffix('/') {
        Some(body) => (body.trim_end(), true),
        None => (head, false),
    };

    let name_end = body.find(char::is_whitespace).unwrap_or(body.len());
    let name = &body[..name_end];
    if !is_valid_name(name) {
        return Err(ParseError::MalformedTag(head.to_string()));
    }

    let mut element = Element::new(name);
    let mut rest = body[name_end..].trim_start();
    while !rest.is_empty() {
        let malformed = || ParseError::MalformedAttribute(rest.to_string());

        let eq = rest.find('=').ok_or_else(malformed)?;
        let attr_name = rest[..eq].trim();
        if !is_valid_name(attr_name) {
            return Err(malformed());
        }

        let after = rest[eq + 1..].trim_start();
        let quote = match after.chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(malformed()),
        };
        let close = after[1..].find(quote).ok_or_else(malformed)?;
        let value = entities.decode(&after[1..1 + close])?;

        if element.attributes.contains_key(attr_name) {
            return Err(ParseError::DuplicateAttribute {
                element: name.to_string(),
                attribute: attr_name.to_string(),
            });
        }
        element.attributes.insert(attr_name.to_string(), value);
        rest = after[close + 2..].trim_start();
    }

    Ok(Tag::Open {
        element,
        self_closing,
    })
}
