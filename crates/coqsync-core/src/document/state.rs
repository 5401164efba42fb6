//! The committed prefix of one document and the session backing it.

use std::sync::Arc;

use thiserror::Error;

use crate::config::BackendConfig;
use crate::feedback::FeedbackSink;
use crate::scanner;
use crate::session::{ProcessSession, SessionError};
use crate::shell::BackendExit;
use crate::text::Region;
use crate::wire::{BackendFailure, StateId};

use super::host::EditorHost;
use super::span::Span;

/// Highlight tag under which committed regions are stored in the editor.
pub const PROVEN_REGIONS: &str = "coqsync.proven";

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Backend rejected the sentence: {0}")]
    Rejected(BackendFailure),

    #[error(transparent)]
    Session(SessionError),
}

impl From<SessionError> for DocumentError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Rejected(failure) => DocumentError::Rejected(failure),
            other => DocumentError::Session(other),
        }
    }
}

/// Tracks which prefix of a document the backend has accepted.
///
/// Spans are contiguous from offset 0 and each committed one records the
/// state its sentence produced, so rolling back is a matter of truncating the
/// list and telling the backend which state to return to.
pub struct DocumentState {
    session: Arc<ProcessSession>,
    spans: Vec<Span>,
}

impl DocumentState {
    pub fn new(session: ProcessSession) -> Self {
        Self {
            session: Arc::new(session),
            spans: Vec::new(),
        }
    }

    /// Start a backend for a new document.
    pub fn open(
        config: &BackendConfig,
        label: &str,
        feedback: Arc<dyn FeedbackSink>,
    ) -> Result<Self, SessionError> {
        ProcessSession::start(config, label, feedback).map(Self::new)
    }

    pub fn session(&self) -> &ProcessSession {
        &self.session
    }

    /// Shared handle to the session, usable without holding the document.
    ///
    /// Liveness checks and [`ProcessSession::shutdown`] through this handle
    /// do not wait for a call in progress.
    pub fn session_handle(&self) -> Arc<ProcessSession> {
        Arc::clone(&self.session)
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// End of the committed prefix; 0 when nothing is committed.
    pub fn committed_end(&self) -> usize {
        self.spans.last().map_or(0, |span| span.region.end)
    }

    /// State of the last committed sentence, or the initial state.
    pub fn current_tip(&self) -> &StateId {
        self.spans
            .iter()
            .rev()
            .find_map(|span| span.backend_id.as_ref())
            .unwrap_or_else(|| self.session.initial_id())
    }

    /// Commit the next unit after the committed prefix.
    ///
    /// Returns `Ok(false)` when there is nothing more to commit: the rest of
    /// the document is blank, the next sentence is unfinished, or a comment
    /// or string is left open. A rejected sentence leaves the spans unchanged.
    pub fn next(&mut self, host: &mut dyn EditorHost) -> Result<bool, DocumentError> {
        let start = self.committed_end();
        let step = match scanner::advance(&*host, start) {
            Ok(step) => step,
            Err(stop) => {
                log::debug!(
                    "[{}] cannot scan past {}: {:?}",
                    self.session.label(),
                    start,
                    stop
                );
                return Ok(false);
            }
        };

        let skip = (step.skipped_to > start).then(|| {
            let region = Region::new(start, step.skipped_to);
            Span::skip(region, &host.substr(region))
        });

        let Some(unit) = step.unit() else {
            let Some(skip) = skip else {
                return Ok(false);
            };
            self.spans.push(skip);
            self.publish(host);
            return Ok(true);
        };

        let text = host.substr(unit);
        let edit_id = self.spans.len() + usize::from(skip.is_some());
        let base = self.current_tip().clone();
        let state_id = self.session.add(&text, &base, edit_id).map_err(|err| {
            log::info!("[{}] sentence at {} not accepted: {}", self.session.label(), unit, err);
            DocumentError::from(err)
        })?;
        log::debug!("[{}] {} -> state {}", self.session.label(), unit, state_id);

        self.spans.extend(skip);
        self.spans.push(Span::committed(unit, &text, state_id));
        self.publish(host);
        Ok(true)
    }

    /// Commit until the prefix reaches `target`.
    ///
    /// Returns `Ok(true)` once it does, `Ok(false)` if scanning stopped short.
    pub fn goto(&mut self, host: &mut dyn EditorHost, target: usize) -> Result<bool, DocumentError> {
        while self.committed_end() < target {
            if !self.next(host)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn goto_cursor(&mut self, host: &mut dyn EditorHost) -> Result<bool, DocumentError> {
        let target = host.cursor_position();
        self.goto(host, target)
    }

    /// Compare the spans with the editor's current regions and roll back to
    /// the first one that no longer matches.
    ///
    /// Returns the index of that span (now the span count), or `None` if
    /// nothing changed.
    pub fn detect_changes(
        &mut self,
        host: &mut dyn EditorHost,
    ) -> Result<Option<usize>, DocumentError> {
        let mut observed = host.highlighted_regions(PROVEN_REGIONS);
        observed.sort();

        let longest = self.spans.len().max(observed.len());
        let divergence = (0..longest).find(|&i| match (self.spans.get(i), observed.get(i)) {
            (Some(span), Some(&region)) => !span.matches(region, &host.substr(region)),
            _ => true,
        });
        let Some(index) = divergence else {
            return Ok(None);
        };

        log::info!(
            "[{}] document changed at span {}; rolling back {} span(s)",
            self.session.label(),
            index,
            self.spans.len().saturating_sub(index)
        );
        self.spans.truncate(index);
        self.publish(host);
        let tip = self.current_tip().clone();
        self.session.edit_at(&tip)?;
        Ok(Some(index))
    }

    /// Drop every span and return the backend to its initial state.
    pub fn invalidate(&mut self, host: &mut dyn EditorHost) -> Result<(), DocumentError> {
        self.spans.clear();
        self.publish(host);
        let initial = self.session.initial_id().clone();
        self.session.edit_at(&initial)?;
        Ok(())
    }

    /// Shut the backend down.
    pub fn close(self) -> Option<BackendExit> {
        self.session.shutdown()
    }

    fn publish(&self, host: &mut dyn EditorHost) {
        let regions: Vec<Region> = self.spans.iter().map(|span| span.region).collect();
        host.set_highlighted_regions(PROVEN_REGIONS, &regions);
    }
}
