use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::CoreResult;
use crate::http_client::SseStream;

/// An upstream that can open a streaming completion for a single prompt.
///
/// Implementations return the raw line stream; decoding and re-framing
/// belong to the bridge. Errors from `open_stream` happen before any
/// content is read (`UpstreamUnavailable` / `UpstreamRejected`); errors
/// inside the returned stream are mid-stream read failures.
#[async_trait]
pub trait StreamingProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    async fn open_stream(&self, prompt: &str, api_key: &SecretString) -> CoreResult<SseStream>;
}
