//! Documents: the committed prefix of a buffer and the editor it lives in.

pub mod host;
pub mod span;
pub mod state;

pub use host::{EditorHost, TextBuffer};
pub use span::{ContentHash, Span};
pub use state::{DocumentError, DocumentState, PROVEN_REGIONS};
