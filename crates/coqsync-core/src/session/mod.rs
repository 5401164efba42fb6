//! Backend sessions and the registry of open documents.

pub mod error;
pub mod process;
pub mod registry;
#[cfg(test)]
pub(crate) mod testing;

pub use error::SessionError;
pub use process::{ProcessSession, SessionOptions};
pub use registry::{DocumentHandle, SessionRegistry, SharedDocument};
