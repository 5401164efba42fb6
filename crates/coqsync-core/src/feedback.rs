//! Routing of asynchronous feedback elements.
//!
//! The backend interleaves `<feedback>` notifications with call replies. The
//! reader thread hands each one to a [`FeedbackSink`] and moves on, so a
//! sink must never block.
//!
//! [`FeedbackBus`] broadcasts them to any number of subscribers:
//!
//! ```rust
//! use coqsync_core::feedback::{FeedbackBus, FeedbackSink};
//! use coqsync_core::wire::Element;
//!
//! let bus = FeedbackBus::new();
//! let mut rx = bus.subscribe();
//!
//! bus.deliver("Basics.v", Element::new("feedback").with_attr("object", "state"));
//! let event = rx.try_recv().unwrap();
//! assert_eq!(event.session, "Basics.v");
//! ```

use serde::Serialize;
use tokio::sync::broadcast;

use crate::wire::{Element, StateId};

/// Default channel capacity for the bus.
/// Subscribers that fall further behind than this miss events (lag).
const DEFAULT_CAPACITY: usize = 1024;

/// Receives feedback elements from a session's reader thread.
pub trait FeedbackSink: Send + Sync {
    fn deliver(&self, session: &str, feedback: Element);
}

impl<F> FeedbackSink for F
where
    F: Fn(&str, Element) + Send + Sync,
{
    fn deliver(&self, session: &str, feedback: Element) {
        self(session, feedback)
    }
}

/// Sink that only logs at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFeedback;

impl FeedbackSink for LogFeedback {
    fn deliver(&self, session: &str, feedback: Element) {
        let event = FeedbackEvent::new(session, feedback);
        log::debug!(
            "feedback [{}]: {} {}",
            session,
            event.content.as_deref().unwrap_or("?"),
            event.state_id.as_ref().map(StateId::as_str).unwrap_or("-")
        );
    }
}

/// A feedback element with its commonly used fields pulled out.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackEvent {
    /// Label of the session that received it
    pub session: String,
    /// `object` attribute (e.g. "state")
    pub object: Option<String>,
    /// `route` attribute
    pub route: Option<String>,
    /// State the feedback concerns, if any
    pub state_id: Option<StateId>,
    /// `val` of the `feedback_content` child (e.g. "processed", "message")
    pub content: Option<String>,
    /// The full element
    pub element: Element,
}

impl FeedbackEvent {
    pub fn new(session: impl Into<String>, element: Element) -> Self {
        let attr = |name: &str| element.attr(name).map(str::to_string);
        Self {
            session: session.into(),
            object: attr("object"),
            route: attr("route"),
            state_id: element
                .child("state_id")
                .and_then(Element::val)
                .map(StateId::new),
            content: element
                .child("feedback_content")
                .and_then(Element::val)
                .map(str::to_string),
            element,
        }
    }
}

/// Broadcasts feedback to every subscriber, using a tokio broadcast channel.
pub struct FeedbackBus {
    sender: broadcast::Sender<FeedbackEvent>,
}

impl FeedbackBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to future feedback. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedbackEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event; returns how many subscribers received it.
    pub fn emit(&self, event: FeedbackEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for FeedbackBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedbackSink for FeedbackBus {
    fn deliver(&self, session: &str, feedback: Element) {
        self.emit(FeedbackEvent::new(session, feedback));
    }
}
