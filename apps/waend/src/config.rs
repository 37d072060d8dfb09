use std::env;
use std::time::Duration;

use thiserror::Error;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:3000/api/v1";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 3;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid client configuration: {0}")]
    Invalid(String),
}

/// Where the client talks to and how.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    api_url: Url,
    notify_url: Option<Url>,
    bearer_token: Option<String>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl ClientConfig {
    /// Bare hosts get `http://` when they look local and `https://`
    /// otherwise.
    pub fn new(api_url: impl AsRef<str>) -> Result<Self, ConfigError> {
        let api_url = parse_base(api_url.as_ref(), "api url")?;
        Ok(Self {
            api_url,
            notify_url: None,
            bearer_token: None,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    /// Reads `WAEND_API_URL`, `WAEND_NOTIFY_URL`, `WAEND_TOKEN` and
    /// `WAEND_HTTP_TIMEOUT` (seconds).
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = non_empty_var("WAEND_API_URL")
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let mut config = Self::new(api_url)?
            .with_bearer_token(non_empty_var("WAEND_TOKEN"));
        if let Some(notify) = non_empty_var("WAEND_NOTIFY_URL") {
            config = config.with_notify_url(&notify)?;
        }
        let timeout = non_empty_var("WAEND_HTTP_TIMEOUT")
            .and_then(|secs| secs.parse::<u64>().ok());
        if let Some(secs) = timeout {
            config = config.with_request_timeout(Duration::from_secs(secs.max(1)));
        }
        Ok(config)
    }

    pub fn with_api_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        self.api_url = parse_base(raw, "api url")?;
        Ok(self)
    }

    pub fn with_notify_url(mut self, raw: &str) -> Result<Self, ConfigError> {
        let mut url = parse_base(raw, "notify url")?;
        let scheme = match url.scheme() {
            "http" => Some("ws"),
            "https" => Some("wss"),
            _ => None,
        };
        if let Some(scheme) = scheme {
            url.set_scheme(scheme)
                .map_err(|_| ConfigError::Invalid(format!("cannot use {raw} as a socket url")))?;
        }
        self.notify_url = Some(url);
        Ok(self)
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// API base without a trailing slash, ready for `/user/...` suffixes.
    pub fn api_base(&self) -> String {
        self.api_url.as_str().trim_end_matches('/').to_string()
    }

    pub fn notify_url(&self) -> Option<&Url> {
        self.notify_url.as_ref()
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_base(raw: &str, field: &str) -> Result<Url, ConfigError> {
    let mut base = raw.trim().to_string();
    if base.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} cannot be empty")));
    }
    if !base.contains("://") {
        base = format!("{}{base}", infer_scheme(&base));
    }
    Url::parse(&base).map_err(|err| ConfigError::Invalid(format!("invalid {field} '{raw}': {err}")))
}

fn infer_scheme(base: &str) -> &'static str {
    let host_part = base
        .split('/')
        .next()
        .unwrap_or(base)
        .trim_start_matches('[')
        .split(']')
        .next()
        .unwrap_or(base);
    let host_lower = host_part.to_ascii_lowercase();
    if host_lower.starts_with("localhost")
        || host_lower == "0.0.0.0"
        || host_lower.starts_with("127.")
        || host_lower == "::1"
        || host_lower.starts_with("10.")
        || host_lower.starts_with("192.168.")
    {
        "http://"
    } else {
        "https://"
    }
}
