//! HTTP surface: `POST|GET|OPTIONS /stream`.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use futures::StreamExt;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

use crate::bridge::StreamBridge;
use crate::config::{Config, Credentials, clone_secret};
use crate::error::{CoreResult, RelayError};
use crate::http_client::HttpClient;
use crate::providers::openai::OpenAI;
use crate::stream::BoxStreamEv;
use crate::validator::validate;

pub const STREAM_PATH: &str = "/stream";
pub const HEALTH_BODY: &str = "Streaming endpoint is live";

/// Shared, read-only per-process state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<RelayState>,
}

struct RelayState {
    bridge: StreamBridge,
    credentials: Credentials,
}

impl AppState {
    pub fn new(bridge: StreamBridge, credentials: Credentials) -> Self {
        Self {
            inner: Arc::new(RelayState {
                bridge,
                credentials,
            }),
        }
    }

    /// Wire the OpenAI-compatible upstream described by `cfg`.
    pub fn from_config(cfg: &Config, credentials: Credentials) -> CoreResult<Self> {
        let http = HttpClient::from_cfg(&cfg.http)?;
        let provider = Arc::new(OpenAI::new(http, &cfg.upstream));
        Ok(Self::new(StreamBridge::new(provider), credentials))
    }

    pub fn bridge(&self) -> &StreamBridge {
        &self.inner.bridge
    }

    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            STREAM_PATH,
            post(stream_handler)
                .get(health_handler)
                .options(preflight_handler)
                .head(method_not_allowed),
        )
        // No size cap: every prompt gets an event stream.
        .layer(DefaultBodyLimit::disable())
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("POST, OPTIONS"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(cfg: &Config, state: AppState, shutdown: F) -> CoreResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .map_err(|e| RelayError::Other(anyhow::anyhow!("invalid listen address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, upstream = %cfg.upstream.completions_url(), "streamrelay listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn stream_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let events = match validate(&body, state.credentials()) {
        Ok(valid) => {
            let api_key = clone_secret(valid.api_key);
            state.bridge().relay(valid.request.prompt, api_key)
        }
        Err(err) => state.bridge().reject(err),
    };
    sse_response(events)
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, HEALTH_BODY)
}

async fn preflight_handler() -> StatusCode {
    StatusCode::OK
}

/// `HEAD` would otherwise be served by the `GET` route.
async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "GET,POST,OPTIONS")],
    )
}

/// Commit a 200 event-stream response; each event becomes its own body chunk.
fn sse_response(events: BoxStreamEv) -> Response {
    let body_stream = events.map(|ev| Ok::<_, Infallible>(ev.to_frame()));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|e| {
            tracing::error!("Failed to build SSE response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}
