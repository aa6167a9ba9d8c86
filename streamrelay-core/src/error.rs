use thiserror::Error;

/// Reasons an inbound request is refused before any upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid JSON input")]
    BodyNotJson,

    #[error("Prompt cannot be empty")]
    EmptyPrompt,

    #[error("Missing OpenAI API key")]
    MissingApiKey,
}

/// Core error type for streamrelay.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("upstream unavailable")]
    UpstreamUnavailable,

    #[error("upstream rejected request with status {status}")]
    UpstreamRejected { status: u16, body: String },

    #[error("upstream stream read failed: {0}")]
    UpstreamRead(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    /// Text placed in the in-band `{"error": ...}` event for this failure.
    pub fn client_message(&self) -> String {
        match self {
            Self::Validation(v) => v.to_string(),
            Self::UpstreamUnavailable => "API request failed".to_string(),
            Self::UpstreamRejected { status, body } => {
                if body.trim().is_empty() {
                    format!("upstream returned status {status}")
                } else {
                    body.clone()
                }
            }
            Self::UpstreamRead(_) => "Error reading stream".to_string(),
            Self::Io(_) | Self::Other(_) => "Internal relay error".to_string(),
        }
    }

    /// Short, stable label used for telemetry and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::UpstreamRejected { .. } => "upstream_rejected",
            Self::UpstreamRead(_) => "upstream_read",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, RelayError>;
