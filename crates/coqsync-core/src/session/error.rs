use std::time::Duration;

use thiserror::Error;

use crate::wire::{BackendFailure, ParseError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to start backend: {0}")]
    Spawn(String),

    #[error("Backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ParseError),

    #[error("Backend exited")]
    BackendExited,

    #[error("No reply to {call} within {timeout:?}")]
    Timeout { call: String, timeout: Duration },

    #[error("Session is dead: {0}")]
    Dead(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Backend rejected the call: {0}")]
    Rejected(BackendFailure),
}

impl SessionError {
    /// Whether the session is unusable after this error.
    ///
    /// A rejection is an ordinary answer; everything else means the stream
    /// can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Rejected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rejections_are_recoverable() {
        let rejected = SessionError::Rejected(BackendFailure {
            message: "Syntax error".to_string(),
            state_id: None,
            location: None,
        });
        assert!(!rejected.is_fatal());
        assert!(SessionError::BackendExited.is_fatal());
        assert!(SessionError::Dead("gone".to_string()).is_fatal());
        assert!(SessionError::from(ParseError::UnknownEntity("bogus".to_string())).is_fatal());
    }

    #[test]
    fn messages_are_readable() {
        let err = SessionError::Timeout {
            call: "Add".to_string(),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "No reply to Add within 250ms");
        assert_eq!(
            SessionError::Dead("stdin closed".to_string()).to_string(),
            "Session is dead: stdin closed"
        );
    }
}
