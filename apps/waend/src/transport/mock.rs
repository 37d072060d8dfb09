use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use url::Url;

use super::{Body, Request, Transport, TransportError, Verb};

#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Json(Value),
    Status { status: u16, text: String },
}

impl MockReply {
    pub fn json(value: Value) -> Self {
        MockReply::Json(value)
    }

    pub fn status(status: u16, text: impl Into<String>) -> Self {
        MockReply::Status {
            status,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub verb: Verb,
    pub url: String,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Default)]
struct Route {
    once: VecDeque<MockReply>,
    sticky: Option<MockReply>,
}

/// Scripted [`Transport`] keyed on verb and URL path. Unscripted routes
/// answer `404 Not Found`.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Verb, String), Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every matching request with `reply`.
    pub fn on(&self, verb: Verb, path: &str, reply: MockReply) {
        self.routes
            .lock()
            .entry((verb, path.to_string()))
            .or_default()
            .sticky = Some(reply);
    }

    /// Answers the next matching request with `reply`, ahead of any
    /// sticky reply.
    pub fn once(&self, verb: Verb, path: &str, reply: MockReply) {
        self.routes
            .lock()
            .entry((verb, path.to_string()))
            .or_default()
            .once
            .push_back(reply);
    }

    /// Holds every reply back for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self, verb: Verb, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.verb == verb && request.path == path)
            .count()
    }

    fn reply_for(&self, verb: Verb, path: &str) -> MockReply {
        let mut routes = self.routes.lock();
        let Some(route) = routes.get_mut(&(verb, path.to_string())) else {
            return MockReply::status(404, "Not Found");
        };
        route
            .once
            .pop_front()
            .or_else(|| route.sticky.clone())
            .unwrap_or_else(|| MockReply::status(404, "Not Found"))
    }
}

fn request_path(url: &str) -> String {
    Url::parse(url)
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: Request) -> Result<Value, TransportError> {
        let path = request_path(&request.url);
        let body = match &request.options.body {
            Some(Body::Json(value)) => Some(value.clone()),
            Some(Body::Bytes(bytes)) => {
                Some(Value::String(String::from_utf8_lossy(bytes).into_owned()))
            }
            None => None,
        };
        if let (Some(progress), Some(Body::Bytes(bytes))) =
            (&request.options.progress, &request.options.body)
        {
            let total = bytes.len() as u64;
            progress(true, total, total);
        }
        self.requests.lock().push(RecordedRequest {
            verb: request.verb,
            url: request.url.clone(),
            path: path.clone(),
            body,
        });

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.reply_for(request.verb, &path) {
            MockReply::Json(value) => Ok(value),
            MockReply::Status { status, text } => Err(TransportError::Status { status, text }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RequestOptions;
    use serde_json::json;

    fn request(verb: Verb, url: &str) -> Request {
        Request {
            verb,
            url: url.to_string(),
            options: RequestOptions::default(),
        }
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn once_replies_precede_sticky_ones() {
        let mock = MockTransport::new();
        mock.on(Verb::Get, "/auth", MockReply::json(json!({"id": "u1"})));
        mock.once(Verb::Get, "/auth", MockReply::status(500, "Internal Server Error"));

        let first = mock.execute(request(Verb::Get, "http://api.test/auth")).await;
        assert_eq!(first.unwrap_err().status(), Some(500));
        let second = mock.execute(request(Verb::Get, "http://api.test/auth?x=1")).await;
        assert_eq!(second.unwrap(), json!({"id": "u1"}));
        assert_eq!(mock.count(Verb::Get, "/auth"), 2);
    }
}
