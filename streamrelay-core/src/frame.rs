//! Decoding of upstream stream units (`data: <json>` lines).

use serde::Deserialize;

pub const DATA_PREFIX: &str = "data:";
pub const DONE_SENTINEL: &str = "[DONE]";

/// What one upstream line means to the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamUnit {
    /// Incremental content from the first choice.
    Delta(String),
    /// The `[DONE]` sentinel.
    Done,
    /// Blank, non-data, malformed, or content-free. Never an error.
    Skip,
}

#[derive(Deserialize)]
struct ChunkEnvelope {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Classify one upstream line (delimiter already removed).
pub fn decode_line(line: &str) -> UpstreamUnit {
    let line = line.trim();
    if line.is_empty() {
        return UpstreamUnit::Skip;
    }
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return UpstreamUnit::Skip;
    };
    let payload = payload.trim();
    if payload == DONE_SENTINEL {
        return UpstreamUnit::Done;
    }
    match decode_delta(payload) {
        Some(delta) => UpstreamUnit::Delta(delta),
        None => UpstreamUnit::Skip,
    }
}

/// Content of the first choice's delta, if the payload has that shape.
pub fn decode_delta(payload: &str) -> Option<String> {
    let envelope: ChunkEnvelope = match serde_json::from_str(payload) {
        Ok(env) => env,
        Err(e) => {
            tracing::trace!(error = %e, "skipping undecodable upstream chunk");
            return None;
        }
    };
    envelope
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
}
