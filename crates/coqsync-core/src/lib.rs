//! # coqsync-core
//!
//! Keeps an editor buffer of Coq source in step with a `coqidetop` backend.
//!
//! The crate is editor-agnostic: anything implementing
//! [`EditorHost`](document::EditorHost) can drive it, and
//! [`TextBuffer`](document::TextBuffer) is an in-memory one.
//!
//! ## Key Concepts
//!
//! - **Sentence**: a Coq statement ending in `.`, or a bullet/brace token
//! - **Span**: a region of the committed prefix, either a sentence the backend
//!   accepted (with its state id) or skipped whitespace and comments
//! - **Session**: one backend process speaking the XML protocol over stdio
//! - **Feedback**: asynchronous backend notifications, routed to a sink

pub mod config;
pub mod document;
pub mod feedback;
pub mod logging;
pub mod paths;
pub mod scanner;
pub mod session;
pub mod shell;
pub mod spawn;
pub mod text;
pub mod wire;

// Re-export commonly used types
pub use config::BackendConfig;
pub use document::{DocumentError, DocumentState, EditorHost, TextBuffer};
pub use session::{DocumentHandle, ProcessSession, SessionError, SessionRegistry};
pub use text::{Region, TextSource};
pub use wire::StateId;
