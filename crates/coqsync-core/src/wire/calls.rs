//! Outbound call encodings and reply classification.
//!
//! Only the four calls needed to step a document are supported:
//!
//! | Call      | Payload                               | Good reply carries      |
//! |-----------|---------------------------------------|-------------------------|
//! | `About`   | `<unit/>`                             | `coq_info` strings      |
//! | `Init`    | `<option val="none"/>`                | initial `state_id`      |
//! | `Add`     | command text, edit id, base state id  | new `state_id` in pair  |
//! | `Edit_at` | target `state_id`                     | nothing we use          |

use serde::{Deserialize, Serialize};
use std::fmt;

use super::element::Element;
use super::entities::escape;

/// Opaque identifier of a point in the backend's proof-state history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateId(pub String);

impl StateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A call to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    About,
    Init,
    Add {
        text: String,
        base: StateId,
        edit_id: usize,
    },
    EditAt {
        target: StateId,
    },
}

impl Call {
    /// The protocol name carried in the call's `val` attribute.
    pub fn name(&self) -> &'static str {
        match self {
            Call::About => "About",
            Call::Init => "Init",
            Call::Add { .. } => "Add",
            Call::EditAt { .. } => "Edit_at",
        }
    }

    /// Encode the call as sent on the wire.
    pub fn to_wire(&self) -> String {
        match self {
            Call::About => r#"<call val="About"><unit/></call>"#.to_string(),
            Call::Init => r#"<call val="Init"><option val="none"/></call>"#.to_string(),
            Call::Add {
                text,
                base,
                edit_id,
            } => format!(
                r#"<call val="Add"><pair><pair><string>{}</string><int>{}</int></pair><pair><state_id val="{}"/><bool val="true"/></pair></pair></call>"#,
                escape(text),
                edit_id,
                escape(base.as_str()),
            ),
            Call::EditAt { target } => format!(
                r#"<call val="Edit_at"><state_id val="{}"/></call>"#,
                escape(target.as_str())
            ),
        }
    }
}

/// Rejection reported by the backend (`val` other than `good`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendFailure {
    /// Human-readable message assembled from the reply's text.
    pub message: String,
    /// State the backend says it is (still) at.
    pub state_id: Option<StateId>,
    /// Byte offsets of the error inside the submitted text, when given.
    pub location: Option<(usize, usize)>,
}

impl BackendFailure {
    fn from_value(value: &Element) -> Self {
        let state_id = value
            .child("state_id")
            .and_then(Element::val)
            .map(StateId::new);
        let location = match (value.attr("loc_s"), value.attr("loc_e")) {
            (Some(s), Some(e)) => s.parse().ok().zip(e.parse().ok()),
            _ => None,
        };
        let message = value.text();
        Self {
            message: if message.is_empty() {
                format!("backend replied val=\"{}\"", value.val().unwrap_or(""))
            } else {
                message
            },
            state_id,
            location,
        }
    }
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some((start, end)) => write!(f, "{} (at {}..{})", self.message, start, end),
            None => write!(f, "{}", self.message),
        }
    }
}

/// A classified `value` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Good(Element),
    Fail(BackendFailure),
}

impl Reply {
    /// Classify a response element. Returns `None` if it is not a `value`.
    pub fn classify(element: Element) -> Option<Self> {
        if !element.is("value") {
            return None;
        }
        if element.val() == Some("good") {
            Some(Reply::Good(element))
        } else {
            Some(Reply::Fail(BackendFailure::from_value(&element)))
        }
    }
}

/// The state identifier carried by a good `Init` or `Add` reply.
///
/// `Init` puts it directly under `value`; `Add` nests it in a pair.
pub fn new_state_id(value: &Element) -> Option<StateId> {
    value
        .child("state_id")
        .or_else(|| value.path(&["pair", "state_id"]))
        .and_then(Element::val)
        .map(StateId::new)
}

/// Version information from a good `About` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoqInfo {
    pub version: String,
    pub protocol_version: String,
    pub release_date: String,
    pub compile_date: String,
}

impl CoqInfo {
    pub fn from_value(value: &Element) -> Option<Self> {
        let info = value.child("coq_info")?;
        let mut strings = info.elements().filter(|e| e.is("string")).map(Element::text);
        Some(Self {
            version: strings.next()?,
            protocol_version: strings.next().unwrap_or_default(),
            release_date: strings.next().unwrap_or_default(),
            compile_date: strings.next().unwrap_or_default(),
        })
    }
}
