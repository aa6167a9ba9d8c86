//! The stream bridge: upstream `data:` lines in, outbound events out.
//!
//! Per request the bridge walks `Connecting → Streaming → Closing →
//! Terminated`. Every failure moves to `Closing` after yielding one
//! `Error` event, and `Closing` yields the single `Done`. The upstream
//! line stream lives inside `Streaming` only, so it is dropped (and the
//! connection released) before `Done` goes out, and also whenever the
//! client drops the outbound stream.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use secrecy::SecretString;
use tracing_futures::Instrument;

use crate::error::{RelayError, ValidationError};
use crate::frame::{UpstreamUnit, decode_line};
use crate::http_client::SseStream;
use crate::provider::StreamingProvider;
use crate::stream::{BoxStreamEv, OutboundEvent, error_then_done};
use crate::telemetry::{
    self, KEY_ERROR_KIND, KEY_EVENTS, KEY_LATENCY_MS, KEY_MODEL, KEY_OUTCOME, KEY_PROVIDER,
    RelayTrace, StreamOutcome,
};

#[derive(Clone)]
pub struct StreamBridge {
    provider: Arc<dyn StreamingProvider>,
}

impl StreamBridge {
    pub fn new(provider: Arc<dyn StreamingProvider>) -> Self {
        Self { provider }
    }

    /// Relay `prompt` upstream and return the outbound event sequence.
    ///
    /// Nothing happens until the returned stream is polled. Once ended it
    /// keeps yielding `None`.
    pub fn relay(&self, prompt: String, api_key: SecretString) -> BoxStreamEv {
        let span = tracing::info_span!(
            "relay.stream",
            { KEY_PROVIDER } = self.provider.name(),
            { KEY_MODEL } = self.provider.model(),
            { KEY_OUTCOME } = tracing::field::Empty,
            { KEY_EVENTS } = tracing::field::Empty,
            { KEY_LATENCY_MS } = tracing::field::Empty,
            { KEY_ERROR_KIND } = tracing::field::Empty,
        );
        let relay = Relay {
            provider: self.provider.clone(),
            state: BridgeState::Connecting { prompt, api_key },
            started: Instant::now(),
            content_events: 0,
            error_kind: None,
        };
        futures::stream::unfold(relay, |mut relay| async move {
            relay.next_event().await.map(|ev| (ev, relay))
        })
        .fuse()
        .instrument(span)
        .boxed()
    }

    /// Event sequence for a request refused before any upstream call.
    pub fn reject(&self, err: ValidationError) -> BoxStreamEv {
        tracing::info!(reason = %err, "rejecting stream request");
        let message = err.to_string();
        telemetry::emit(
            RelayTrace::new(StreamOutcome::Rejected)
                .provider(self.provider.name())
                .model(self.provider.model())
                .error_kind_opt(Some(RelayError::from(err).kind())),
        );
        error_then_done(message)
    }
}

enum BridgeState {
    Connecting { prompt: String, api_key: SecretString },
    Streaming { lines: SseStream },
    Closing(StreamOutcome),
    Terminated,
}

struct Relay {
    provider: Arc<dyn StreamingProvider>,
    state: BridgeState,
    started: Instant,
    content_events: u32,
    error_kind: Option<&'static str>,
}

impl Relay {
    async fn next_event(&mut self) -> Option<OutboundEvent> {
        loop {
            match std::mem::replace(&mut self.state, BridgeState::Terminated) {
                BridgeState::Connecting { prompt, api_key } => {
                    let opened = self.provider.open_stream(&prompt, &api_key).await;
                    match opened {
                        Ok(lines) => self.state = BridgeState::Streaming { lines },
                        Err(e) => return Some(self.fail(e, StreamOutcome::UpstreamFailed)),
                    }
                }
                BridgeState::Streaming { mut lines } => match lines.next().await {
                    None => self.state = BridgeState::Closing(StreamOutcome::Eof),
                    Some(Err(e)) => return Some(self.fail(e, StreamOutcome::ReadError)),
                    Some(Ok(line)) => match decode_line(&line.line) {
                        UpstreamUnit::Done => {
                            self.state = BridgeState::Closing(StreamOutcome::Sentinel)
                        }
                        UpstreamUnit::Delta(delta) => {
                            self.content_events += 1;
                            self.state = BridgeState::Streaming { lines };
                            return Some(OutboundEvent::Content(delta));
                        }
                        UpstreamUnit::Skip => self.state = BridgeState::Streaming { lines },
                    },
                },
                BridgeState::Closing(outcome) => {
                    self.finish(outcome);
                    return Some(OutboundEvent::Done);
                }
                BridgeState::Terminated => return None,
            }
        }
    }

    fn fail(&mut self, err: RelayError, outcome: StreamOutcome) -> OutboundEvent {
        tracing::warn!(error = %err, kind = err.kind(), "relay failed");
        self.error_kind = Some(err.kind());
        self.state = BridgeState::Closing(outcome);
        OutboundEvent::Error(err.client_message())
    }

    fn finish(&self, outcome: StreamOutcome) {
        let latency_ms = self.started.elapsed().as_millis() as u64;
        let span = tracing::Span::current();
        span.record(KEY_OUTCOME, outcome.as_str());
        span.record(KEY_EVENTS, self.content_events);
        span.record(KEY_LATENCY_MS, latency_ms);
        if let Some(kind) = self.error_kind {
            span.record(KEY_ERROR_KIND, kind);
        }
        tracing::info!(
            outcome = outcome.as_str(),
            events = self.content_events,
            latency_ms,
            "relay stream terminated"
        );
        telemetry::emit(
            RelayTrace::new(outcome)
                .provider(self.provider.name())
                .model(self.provider.model())
                .content_events(self.content_events)
                .latency_ms(latency_ms)
                .error_kind_opt(self.error_kind),
        );
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;

    use once_cell::sync::Lazy;

    use super::test_support::ScriptedProvider;
    use super::*;

    static TRACES: Lazy<Mutex<Vec<RelayTrace>>> = Lazy::new(|| Mutex::new(Vec::new()));

    struct TestSink;
    impl telemetry::TelemetrySink for TestSink {
        fn record(&self, trace: RelayTrace) {
            TRACES.lock().unwrap().push(trace);
        }
    }

    fn key() -> SecretString {
        SecretString::new("sk-test".into())
    }

    fn content(s: &str) -> OutboundEvent {
        OutboundEvent::Content(s.to_string())
    }

    async fn run(provider: ScriptedProvider) -> (Vec<OutboundEvent>, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let bridge = StreamBridge::new(provider.clone());
        let events = bridge.relay("hi".into(), key()).collect::<Vec<_>>().await;
        (events, provider)
    }

    fn done_count(events: &[OutboundEvent]) -> usize {
        events.iter().filter(|e| e.is_terminal()).count()
    }

    #[tokio::test]
    async fn relays_deltas_in_order_then_done() {
        let (events, provider) = run(ScriptedProvider::reads(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"He\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n",
            "data: [DONE]\n",
        ]))
        .await;
        assert_eq!(events, vec![content("He"), content("llo"), OutboundEvent::Done]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(provider.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unit_split_across_reads_is_decoded_once() {
        let (events, _) = run(ScriptedProvider::reads(&[
            "data: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"He\"}}]}\n\nda",
            "ta: [DO",
            "NE]\n",
        ]))
        .await;
        assert_eq!(events, vec![content("He"), OutboundEvent::Done]);
    }

    #[tokio::test]
    async fn eof_without_sentinel_still_terminates_once() {
        let (events, provider) = run(ScriptedProvider::reads(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
        ]))
        .await;
        assert_eq!(events, vec![content("a"), content("b"), OutboundEvent::Done]);
        assert!(provider.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn empty_upstream_body_yields_only_done() {
        let (events, _) = run(ScriptedProvider::reads(&[])).await;
        assert_eq!(events, vec![OutboundEvent::Done]);
    }

    #[tokio::test]
    async fn malformed_chunks_are_skipped_and_stream_continues() {
        let (events, _) = run(ScriptedProvider::reads(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
            "data: {not json}\n",
            ": ping\n",
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
            "data: {\"choices\":[]}\n",
            "\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
            "data: [DONE]\n",
        ]))
        .await;
        assert_eq!(events, vec![content("a"), content("b"), OutboundEvent::Done]);
    }

    #[tokio::test]
    async fn nothing_after_sentinel_is_relayed() {
        let (events, _) = run(ScriptedProvider::reads(&[
            "data: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
            "data: [DONE]\n",
        ]))
        .await;
        assert_eq!(events, vec![OutboundEvent::Done]);
    }

    #[tokio::test]
    async fn read_error_emits_error_then_done() {
        let (events, provider) = run(ScriptedProvider::with(
            Ok(vec![
                Ok(bytes::Bytes::from_static(
                    b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
                )),
                Err(std::io::Error::other("connection reset")),
            ]),
            false,
        ))
        .await;
        assert_eq!(
            events,
            vec![
                content("a"),
                OutboundEvent::Error("Error reading stream".into()),
                OutboundEvent::Done
            ]
        );
        assert!(provider.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn upstream_rejection_forwards_body() {
        let (events, _) = run(ScriptedProvider::with(
            Err(RelayError::UpstreamRejected {
                status: 401,
                body: "invalid api key".into(),
            }),
            false,
        ))
        .await;
        assert_eq!(
            events,
            vec![OutboundEvent::Error("invalid api key".into()), OutboundEvent::Done]
        );
    }

    #[tokio::test]
    async fn upstream_unavailable_uses_generic_message() {
        let (events, _) = run(ScriptedProvider::with(Err(RelayError::UpstreamUnavailable), false)).await;
        assert_eq!(
            events,
            vec![OutboundEvent::Error("API request failed".into()), OutboundEvent::Done]
        );
        assert_eq!(done_count(&events), 1);
    }

    #[tokio::test]
    async fn upstream_released_before_done_is_observed() {
        let provider = Arc::new(ScriptedProvider::reads(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n",
            "data: [DONE]\n",
            "data: trailing\n",
        ]));
        let bridge = StreamBridge::new(provider.clone());
        let mut s = bridge.relay("hi".into(), key());
        assert_eq!(s.next().await, Some(content("x")));
        assert!(!provider.released.load(Ordering::SeqCst));
        assert_eq!(s.next().await, Some(OutboundEvent::Done));
        assert!(provider.released.load(Ordering::SeqCst));
        assert_eq!(s.next().await, None);
        assert_eq!(s.next().await, None);
    }

    #[tokio::test]
    async fn terminated_stream_keeps_yielding_none() {
        let provider = Arc::new(ScriptedProvider::with(
            Err(RelayError::UpstreamUnavailable),
            false,
        ));
        let bridge = StreamBridge::new(provider.clone());
        let mut s = bridge.relay("hi".into(), key());
        assert_eq!(
            s.next().await,
            Some(OutboundEvent::Error("API request failed".into()))
        );
        assert_eq!(s.next().await, Some(OutboundEvent::Done));
        for _ in 0..3 {
            assert_eq!(s.next().await, None);
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_client_stream_releases_stalled_upstream() {
        let provider = Arc::new(ScriptedProvider::hanging(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n",
        ]));
        let bridge = StreamBridge::new(provider.clone());
        let mut s = bridge.relay("hi".into(), key());
        assert_eq!(s.next().await, Some(content("x")));
        // upstream now idles forever; the client goes away
        drop(s);
        assert!(provider.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn relay_is_lazy_until_polled() {
        let provider = Arc::new(ScriptedProvider::reads(&["data: [DONE]\n"]));
        let bridge = StreamBridge::new(provider.clone());
        let s = bridge.relay("hi".into(), key());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        drop(s);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reject_never_contacts_upstream() {
        let provider = Arc::new(ScriptedProvider::reads(&["data: [DONE]\n"]));
        let bridge = StreamBridge::new(provider.clone());
        let events: Vec<_> = bridge
            .reject(ValidationError::MissingApiKey)
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                OutboundEvent::Error("Missing OpenAI API key".into()),
                OutboundEvent::Done
            ]
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn terminal_trace_is_recorded() {
        let _ = telemetry::set_telemetry_sink(Arc::new(TestSink));
        telemetry::test_set_capture_enabled(true);
        TRACES.lock().unwrap().clear();

        let (_, _) = run(ScriptedProvider::with(
            Ok(vec![
                Ok(bytes::Bytes::from_static(
                    b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n",
                )),
                Err(std::io::Error::other("boom")),
            ]),
            false,
        ))
        .await;

        telemetry::test_set_capture_enabled(false);
        let traces = TRACES.lock().unwrap().clone();
        assert_eq!(traces.len(), 1, "expected one trace, got {:?}", traces);
        let t = &traces[0];
        assert_eq!(t.outcome, StreamOutcome::ReadError);
        assert_eq!(t.content_events, 1);
        assert_eq!(t.provider.as_deref(), Some("scripted"));
        assert_eq!(t.model.as_deref(), Some("test-model"));
        assert_eq!(t.error_kind.as_deref(), Some("upstream_read"));
        assert!(t.latency_ms.is_some());
    }
}
