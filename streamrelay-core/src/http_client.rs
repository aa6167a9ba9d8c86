use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::stream::Stream;
use reqwest::Client;
use serde::Serialize;

use crate::config::HttpCfg;
use crate::error::{CoreResult, RelayError};

/// One newline-delimited unit of an upstream event stream, delimiter removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseLine {
    pub line: String,
}

/// A boxed stream of `SseLine` results.
pub type SseStream = Pin<Box<dyn Stream<Item = CoreResult<SseLine>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    /// `request_timeout_ms` bounds the whole call, streamed body included.
    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| RelayError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("streamrelay/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    /// POST JSON and return the response body as a stream of lines.
    ///
    /// Connection failures map to `UpstreamUnavailable`; a non-success
    /// status maps to `UpstreamRejected` carrying the response body.
    pub async fn post_sse_lines<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<SseStream> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "text/event-stream");

        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req.send().await.map_err(|e| {
            tracing::warn!(error = %e, "upstream connection failed");
            RelayError::UpstreamUnavailable
        })?;

        let status = resp.status();
        if let Some(rid) = extract_request_id(resp.headers()) {
            tracing::debug!(upstream_request_id = %rid, status = status.as_u16(), "upstream responded");
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::UpstreamRejected {
                status: status.as_u16(),
                body,
            });
        }

        let byte_stream = resp.bytes_stream();
        Ok(Box::pin(LineStream::new(Box::pin(byte_stream))))
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 3] = ["x-request-id", "request-id", "openai-request-id"];
    CANDIDATES
        .iter()
        .find_map(|k| headers.get(*k).and_then(|v| v.to_str().ok()))
        .map(str::to_string)
}

/// Splits a byte stream into `\n`-terminated lines.
///
/// Bytes are buffered until a delimiter arrives, so a unit split across reads
/// (or a multi-byte character split across reads) is yielded whole. An
/// unterminated tail at end of input is dropped. After a read error the
/// stream yields that error once and then ends.
pub struct LineStream<S> {
    inner: S,
    buf: BytesMut,
    finished: bool,
}

impl<S> LineStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for LineStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = CoreResult<SseLine>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(idx) = this.buf.iter().position(|b| *b == b'\n') {
                let raw = this.buf.split_to(idx + 1);
                let mut end = idx;
                if end > 0 && raw[end - 1] == b'\r' {
                    end -= 1;
                }
                let line = String::from_utf8_lossy(&raw[..end]).into_owned();
                return Poll::Ready(Some(Ok(SseLine { line })));
            }

            if this.finished {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buf.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    this.buf.clear();
                    return Poll::Ready(Some(Err(RelayError::UpstreamRead(e.to_string()))));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    if !this.buf.is_empty() {
                        tracing::debug!(bytes = this.buf.len(), "dropping unterminated trailing unit");
                        this.buf.clear();
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
