//! Progress messages relayed to observers of a starting server.

use serde::{Deserialize, Serialize};

/// A single progress message shown to whoever is watching a start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub message: String,
}

impl ProgressEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An item on the progress queue.
///
/// `End` is the end-of-stream marker. It is a distinct variant rather than a
/// special payload so a reader can never confuse it with a real message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressSignal {
    /// A relayed progress message.
    Event(ProgressEvent),
    /// No more messages will be sent for the current start.
    End,
}

impl From<ProgressEvent> for ProgressSignal {
    fn from(event: ProgressEvent) -> Self {
        ProgressSignal::Event(event)
    }
}
