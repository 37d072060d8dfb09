//! HTTP verbs returning futures of decoded JSON.
//!
//! [`Transport`] is the seam: [`ReqwestTransport`] talks to the real API,
//! [`mock::MockTransport`] answers from a script. Callers go through
//! [`HttpClient`], which adds the verb helpers and the parse hook.

pub mod mock;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::ClientConfig;

const JSON_CONTENT_TYPE: &str = "application/json; charset=\"utf-8\"";
const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
        }
    }

    fn carries_body(self) -> bool {
        matches!(self, Verb::Post | Verb::Put)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("{text}")]
    Status { status: u16, text: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("cannot encode request body: {0}")]
    Decode(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            return TransportError::InvalidUrl(err.to_string());
        }
        if err.is_timeout() {
            return TransportError::Network(format!("request timed out: {err}"));
        }
        TransportError::Network(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Bytes(Vec<u8>),
}

/// Called with `(length_computable, loaded, total)` as the body goes out.
pub type ProgressFn = Arc<dyn Fn(bool, u64, u64) + Send + Sync>;

#[derive(Clone, Default)]
pub struct RequestOptions {
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Body>,
    pub progress: Option<ProgressFn>,
}

impl RequestOptions {
    pub fn json(body: Value) -> Self {
        Self {
            body: Some(Body::Json(body)),
            ..Self::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
    }

    /// Bytes and content type of the outgoing body. Without an explicit
    /// `Content-Type` header the body is sent as JSON.
    pub fn encode_body(&self) -> Result<(String, Vec<u8>), TransportError> {
        let content_type = self.content_type();
        let bytes = match (&self.body, content_type) {
            (Some(Body::Bytes(bytes)), _) => bytes.clone(),
            (Some(Body::Json(Value::String(text))), Some(_)) => text.clone().into_bytes(),
            (Some(Body::Json(value)), _) => {
                serde_json::to_vec(value).map_err(|err| TransportError::Decode(err.to_string()))?
            }
            (None, Some(_)) => Vec::new(),
            (None, None) => b"null".to_vec(),
        };
        let content_type = match (content_type, &self.body) {
            (Some(explicit), _) => explicit.to_string(),
            (None, Some(Body::Bytes(_))) => "application/octet-stream".to_string(),
            (None, _) => JSON_CONTENT_TYPE.to_string(),
        };
        Ok((content_type, bytes))
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("params", &self.params)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub verb: Verb,
    pub url: String,
    pub options: RequestOptions,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: Request) -> Result<Value, TransportError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    bearer_token: Option<String>,
}

impl ReqwestTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            bearer_token: config.bearer_token().map(str::to_string),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: Request) -> Result<Value, TransportError> {
        let Request { verb, url, options } = request;
        let method = match verb {
            Verb::Get => reqwest::Method::GET,
            Verb::Post => reqwest::Method::POST,
            Verb::Put => reqwest::Method::PUT,
            Verb::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, url.as_str());
        if !options.params.is_empty() {
            builder = builder.query(&options.params);
        }
        for (key, value) in &options.headers {
            if key.eq_ignore_ascii_case("content-type") {
                continue;
            }
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if verb.carries_body() {
            let (content_type, bytes) = options.encode_body()?;
            builder = builder
                .header(CONTENT_TYPE, content_type)
                .header(CONTENT_LENGTH, bytes.len())
                .body(upload_body(bytes, options.progress.clone()));
        }

        let response = builder.send().await?;
        let status = response.status();
        debug!(
            target: "waend::transport",
            verb = %verb,
            url = %url,
            status = status.as_u16(),
            "response"
        );
        if status.is_client_error() || status.is_server_error() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                text: status.canonical_reason().unwrap_or("request failed").to_string(),
            });
        }
        let text = response.text().await?;
        Ok(decode_response(&text))
    }
}

fn upload_body(bytes: Vec<u8>, progress: Option<ProgressFn>) -> reqwest::Body {
    let Some(progress) = progress else {
        return reqwest::Body::from(bytes);
    };
    let total = bytes.len() as u64;
    let chunks: Vec<Vec<u8>> = bytes.chunks(UPLOAD_CHUNK_SIZE).map(<[u8]>::to_vec).collect();
    let mut loaded = 0u64;
    let stream = futures::stream::iter(chunks.into_iter().map(move |chunk| {
        loaded += chunk.len() as u64;
        progress(true, loaded, total);
        Ok::<_, std::io::Error>(chunk)
    }));
    reqwest::Body::wrap_stream(stream)
}

/// Empty bodies decode to `null`; bodies that are not JSON come back as a
/// JSON string.
pub fn decode_response(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Verb helpers over a shared [`Transport`].
#[derive(Clone)]
pub struct HttpClient {
    backend: Arc<dyn Transport>,
}

impl HttpClient {
    pub fn new(backend: Arc<dyn Transport>) -> Self {
        Self { backend }
    }

    pub async fn request(
        &self,
        verb: Verb,
        url: &str,
        options: RequestOptions,
    ) -> Result<Value, TransportError> {
        self.backend
            .execute(Request {
                verb,
                url: url.to_string(),
                options,
            })
            .await
    }

    /// Runs the request and hands the decoded body to `parse`; the future
    /// resolves with whatever `parse` returns.
    pub async fn request_with<T, E, F>(
        &self,
        verb: Verb,
        url: &str,
        options: RequestOptions,
        parse: F,
    ) -> Result<T, E>
    where
        E: From<TransportError>,
        F: FnOnce(Value) -> Result<T, E>,
    {
        let value = self.request(verb, url, options).await?;
        parse(value)
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<Value, TransportError> {
        self.request(Verb::Get, url, options).await
    }

    pub async fn post(&self, url: &str, options: RequestOptions) -> Result<Value, TransportError> {
        self.request(Verb::Post, url, options).await
    }

    pub async fn put(&self, url: &str, options: RequestOptions) -> Result<Value, TransportError> {
        self.request(Verb::Put, url, options).await
    }

    pub async fn del(&self, url: &str, options: RequestOptions) -> Result<Value, TransportError> {
        self.request(Verb::Delete, url, options).await
    }

    pub async fn get_with<T, E, F>(
        &self,
        url: &str,
        options: RequestOptions,
        parse: F,
    ) -> Result<T, E>
    where
        E: From<TransportError>,
        F: FnOnce(Value) -> Result<T, E>,
    {
        self.request_with(Verb::Get, url, options, parse).await
    }

    pub async fn post_with<T, E, F>(
        &self,
        url: &str,
        options: RequestOptions,
        parse: F,
    ) -> Result<T, E>
    where
        E: From<TransportError>,
        F: FnOnce(Value) -> Result<T, E>,
    {
        self.request_with(Verb::Post, url, options, parse).await
    }

    pub async fn put_with<T, E, F>(
        &self,
        url: &str,
        options: RequestOptions,
        parse: F,
    ) -> Result<T, E>
    where
        E: From<TransportError>,
        F: FnOnce(Value) -> Result<T, E>,
    {
        self.request_with(Verb::Put, url, options, parse).await
    }

    pub async fn del_with<T, E, F>(
        &self,
        url: &str,
        options: RequestOptions,
        parse: F,
    ) -> Result<T, E>
    where
        E: From<TransportError>,
        F: FnOnce(Value) -> Result<T, E>,
    {
        self.request_with(Verb::Delete, url, options, parse).await
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient").finish_non_exhaustive()
    }
}
