use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::UpstreamCfg;
use crate::error::CoreResult;
use crate::http_client::{HttpClient, SseStream};
use crate::model::CompletionRequest;
use crate::provider::StreamingProvider;

/// OpenAI-compatible `/chat/completions` upstream.
#[derive(Debug, Clone)]
pub struct OpenAI {
    http: HttpClient,
    url: String,
    model: String,
    name: String, // usually "openai"
}

impl OpenAI {
    pub fn new(http: HttpClient, cfg: &UpstreamCfg) -> Self {
        Self {
            http,
            url: cfg.completions_url(),
            model: cfg.model.clone(),
            name: "openai".into(),
        }
    }

    #[cfg(test)]
    pub fn new_for_tests(server_base: &str) -> Self {
        let cfg = UpstreamCfg {
            base_url: server_base.to_string(),
            ..UpstreamCfg::default()
        };
        OpenAI::new(HttpClient::new_default().unwrap(), &cfg)
    }

    fn headers(&self, api_key: &SecretString) -> Vec<(String, String)> {
        // Content-Type comes from the JSON body builder.
        vec![(
            "Authorization".to_string(),
            format!("Bearer {}", api_key.expose_secret()),
        )]
    }
}

#[async_trait]
impl StreamingProvider for OpenAI {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn open_stream(&self, prompt: &str, api_key: &SecretString) -> CoreResult<SseStream> {
        let payload = CompletionRequest::streaming(&self.model, prompt);
        let owned_headers = self.headers(api_key);
        let hdrs: Vec<(&str, &str)> = owned_headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.http.post_sse_lines(&self.url, &payload, &hdrs).await
    }
}
