//! Telemetry for relayed streams.
//! By default, no records are delivered unless a sink is installed via `set_telemetry_sink`;
//! the bridge always logs through `tracing` regardless.

pub mod keys;
pub mod types;

pub use keys::*;
pub use types::*;

use std::sync::Arc;

use once_cell::sync::OnceCell;

/// Implement this to receive one `RelayTrace` per terminated stream.
///
/// Implementations must be thread-safe and cheap: `record` runs on the
/// request task right before the terminal marker is sent.
pub trait TelemetrySink: Send + Sync + 'static {
    fn record(&self, trace: RelayTrace);
}

static TELEMETRY_SINK: OnceCell<Arc<dyn TelemetrySink>> = OnceCell::new();

// In tests, gate emission to only the calling test thread to avoid cross-test interference.
#[cfg(test)]
thread_local! {
    static TEST_CAPTURE: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Install a global telemetry sink. Returns `false` if a sink is already installed.
///
/// This is a write-once global for the process lifetime (backed by `OnceCell`).
pub fn set_telemetry_sink(sink: Arc<dyn TelemetrySink>) -> bool {
    TELEMETRY_SINK.set(sink).is_ok()
}

/// Deliver a record to the installed sink, if any.
#[inline]
pub(crate) fn emit(trace: RelayTrace) {
    #[cfg(test)]
    {
        if !TEST_CAPTURE.with(|c| c.get()) {
            return;
        }
    }
    if let Some(sink) = TELEMETRY_SINK.get() {
        sink.record(trace);
    }
}

#[cfg(test)]
/// Test-only helper: enable or disable capture for the current test thread.
pub fn test_set_capture_enabled(enabled: bool) {
    TEST_CAPTURE.with(|c| c.set(enabled));
}
