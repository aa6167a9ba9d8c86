use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

pub const DEFAULT_BASE_URL: &str = "https://aipipe.org/openai/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const PORT_ENV: &str = "PORT";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UpstreamCfg {
    /// Base URL of the OpenAI-compatible API; `/chat/completions` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable that contains the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for UpstreamCfg {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl UpstreamCfg {
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    9090
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerCfg {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total upstream call timeout in milliseconds, body reads included (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamCfg,
    #[serde(default)]
    pub server: ServerCfg,
    /// HTTP client configuration (timeouts, pooling). Missing in older configs → defaults.
    #[serde(default)]
    pub http: HttpCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::RelayError::from)?;
        let s =
            std::str::from_utf8(&bytes).map_err(|e| crate::error::RelayError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::RelayError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::RelayError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::RelayError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::RelayError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }

    /// Apply environment overrides (`OPENAI_BASE_URL`, `PORT`).
    ///
    /// Empty values count as unset. An unparsable port is an error rather
    /// than a silent fallback.
    pub fn with_env<F>(mut self, lookup: F) -> crate::error::CoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = non_empty(lookup(BASE_URL_ENV)) {
            self.upstream.base_url = base;
        }
        if let Some(port) = non_empty(lookup(PORT_ENV)) {
            self.server.port = port.trim().parse::<u16>().map_err(|e| {
                crate::error::RelayError::Other(anyhow::anyhow!("invalid {PORT_ENV} '{port}': {e}"))
            })?;
        }
        Ok(self)
    }

    pub fn with_process_env(self) -> crate::error::CoreResult<Self> {
        self.with_env(|k| std::env::var(k).ok())
    }
}

/// Credential resolved once at startup. Absence is not a startup error:
/// each request reports it in-band instead.
#[derive(Debug, Default)]
pub struct Credentials {
    api_key: Option<SecretString>,
}

impl Credentials {
    pub fn new(api_key: Option<SecretString>) -> Self {
        Self { api_key }
    }

    pub fn from_env<F>(cfg: &UpstreamCfg, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = non_empty(lookup(&cfg.api_key_env)).map(|k| SecretString::new(k.into()));
        Self { api_key }
    }

    pub fn from_process_env(cfg: &UpstreamCfg) -> Self {
        Self::from_env(cfg, |k| std::env::var(k).ok())
    }

    pub fn api_key(&self) -> Option<&SecretString> {
        self.api_key.as_ref()
    }
}

/// Owned copy of a secret for handing to a per-request task.
pub fn clone_secret(secret: &SecretString) -> SecretString {
    SecretString::new(secret.expose_secret().into())
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}
