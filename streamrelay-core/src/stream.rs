//! Outbound event primitives.
//!
//! Contract:
//! - A relayed stream emits 0..n `Content` events, at most one `Error`, and
//!   ends with exactly one `Done`.
//! - After `Done`, no further events are emitted.
//! - Each event is encoded as its own SSE frame `data: <payload>\n\n`.

use bytes::Bytes;
use serde::Serialize;

/// What the client receives incrementally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// One upstream delta.
    Content(String),
    /// In-band failure description.
    Error(String),
    /// Terminal marker, sent as the literal `[DONE]`.
    Done,
}

#[derive(Serialize)]
struct ContentPayload<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    error: &'a str,
}

impl OutboundEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Encode as one SSE frame.
    pub fn to_frame(&self) -> Bytes {
        let payload = match self {
            Self::Content(c) => serde_json::to_string(&ContentPayload { content: c }),
            Self::Error(e) => serde_json::to_string(&ErrorPayload { error: e }),
            Self::Done => Ok(crate::frame::DONE_SENTINEL.to_string()),
        };
        // Serializing a struct of one &str field cannot fail.
        let payload = payload.unwrap_or_default();
        Bytes::from(format!("data: {payload}\n\n"))
    }
}

/// Boxed stream of outbound events.
pub type BoxStreamEv = futures::stream::BoxStream<'static, OutboundEvent>;

/// A stream that reports one failure and terminates.
pub fn error_then_done(message: impl Into<String>) -> BoxStreamEv {
    use futures::StreamExt;
    futures::stream::iter([OutboundEvent::Error(message.into()), OutboundEvent::Done]).boxed()
}
