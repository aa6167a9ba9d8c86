/// Span/Log attribute keys for relayed streams.
/// Keep these stable; changing them is a breaking change for dashboards.
pub const KEY_PROVIDER: &str = "llm.provider";
pub const KEY_MODEL: &str = "llm.model";

pub const KEY_OUTCOME: &str = "relay.outcome";
pub const KEY_EVENTS: &str = "relay.events";
pub const KEY_LATENCY_MS: &str = "latency.ms";

/// Error-related (if applicable)
pub const KEY_ERROR_KIND: &str = "error.kind";
