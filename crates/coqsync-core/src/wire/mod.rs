//! The backend's wire protocol.
//!
//! - [`parser`]: streaming parser for inbound elements
//! - [`element`]: the parsed element tree
//! - [`entities`]: entity decoding and outbound escaping
//! - [`calls`]: call encodings and reply classification

pub mod calls;
pub mod element;
pub mod entities;
pub mod parser;

pub use calls::{new_state_id, BackendFailure, Call, CoqInfo, Reply, StateId};
pub use element::{Child, Element};
pub use entities::{escape, EntityTable};
pub use parser::{Delivery, ParseError, WireParser, FEEDBACK};
