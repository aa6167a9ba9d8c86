use serde::{Deserialize, Serialize};

/// How a relayed stream reached its terminal marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamOutcome {
    /// Upstream sent `[DONE]`.
    Sentinel,
    /// Upstream closed without `[DONE]`.
    Eof,
    /// Request refused before contacting the upstream.
    Rejected,
    /// Upstream could not be reached or returned a non-success status.
    UpstreamFailed,
    /// Upstream body failed mid-stream.
    ReadError,
}

impl StreamOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sentinel => "sentinel",
            Self::Eof => "eof",
            Self::Rejected => "rejected",
            Self::UpstreamFailed => "upstream_failed",
            Self::ReadError => "read_error",
        }
    }
}

/// One record per relayed stream, emitted when it terminates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayTrace {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub outcome: StreamOutcome,
    /// Number of `{content}` events delivered.
    pub content_events: u32,
    pub latency_ms: Option<u64>,
    pub error_kind: Option<String>,
}

impl RelayTrace {
    pub fn new(outcome: StreamOutcome) -> Self {
        Self {
            provider: None,
            model: None,
            outcome,
            content_events: 0,
            latency_ms: None,
            error_kind: None,
        }
    }

    pub fn provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }
    pub fn model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }
    pub fn content_events(mut self, n: u32) -> Self {
        self.content_events = n;
        self
    }
    pub fn latency_ms(mut self, ms: u64) -> Self {
        self.latency_ms = Some(ms);
        self
    }
    pub fn error_kind_opt(mut self, kind: Option<&str>) -> Self {
        self.error_kind = kind.map(|s| s.to_string());
        self
    }
}
