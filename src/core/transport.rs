//! HTTP Transport
//!
//! HTTP client seam used by the token refresher, code exchange and revoker.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{CredentialError, NetworkError, ProtocolError};
use crate::types::DEFAULT_TIMEOUT_SECS;

/// Token endpoint responses are small; anything larger is not a token response.
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// HTTP request definition.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    /// Per-request timeout, overriding the transport default.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Build a form-encoded POST.
    pub fn form_post(url: impl Into<String>, params: &[(&str, &str)]) -> Self {
        let mut headers = HashMap::new();
        headers.insert(
            "content-type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        );
        headers.insert("accept".to_string(), "application/json".to_string());

        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers,
            body: Some(encode_form(params)),
            timeout: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Decoded form body, for assertions on recorded requests.
    pub fn form_params(&self) -> HashMap<String, String> {
        self.body
            .as_deref()
            .map(|body| {
                url::form_urlencoded::parse(body.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// HTTP response definition.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP transport interface (for dependency injection).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, CredentialError>;
}

/// Default reqwest-based HTTP transport.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
    max_response_size: usize,
}

impl ReqwestHttpTransport {
    /// Create a transport with the default timeout.
    pub fn new() -> Result<Self, CredentialError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, CredentialError> {
        Self::with_options(timeout, DEFAULT_MAX_RESPONSE_SIZE)
    }

    /// Create a transport with custom options.
    pub fn with_options(timeout: Duration, max_response_size: usize) -> Result<Self, CredentialError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            // Token endpoints never legitimately redirect.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| NetworkError::ClientSetup {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            default_timeout: timeout,
            max_response_size,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, CredentialError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                NetworkError::Timeout { timeout }
            } else {
                NetworkError::ConnectionFailed {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();

        if (300..400).contains(&status) {
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            return Err(ProtocolError::UnexpectedRedirect { location }.into());
        }

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.as_str().to_lowercase(), v.to_string());
            }
        }

        if let Some(len) = response.content_length() {
            let len = usize::try_from(len).unwrap_or(usize::MAX);
            if len > self.max_response_size {
                return Err(ProtocolError::ResponseTooLarge { size: len }.into());
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProtocolError::InvalidResponse {
                message: e.to_string(),
            })?;

        if body.len() > self.max_response_size {
            return Err(ProtocolError::ResponseTooLarge { size: body.len() }.into());
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Encode `application/x-www-form-urlencoded` pairs.
pub fn encode_form(params: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish()
}

/// Mock HTTP transport for testing. Responses are returned in the order queued.
#[derive(Default)]
pub struct MockHttpTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    request_history: Mutex<Vec<HttpRequest>>,
}

impl MockHttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_response(&self, status: u16, body: impl Into<String>) -> &Self {
        lock(&self.responses).push_back(HttpResponse {
            status,
            headers: HashMap::new(),
            body: body.into(),
        });
        self
    }

    /// Queue a JSON response.
    pub fn queue_json_response(&self, status: u16, body: &serde_json::Value) -> &Self {
        self.queue_response(status, body.to_string())
    }

    pub fn get_requests(&self) -> Vec<HttpRequest> {
        lock(&self.request_history).clone()
    }

    pub fn get_last_request(&self) -> Option<HttpRequest> {
        lock(&self.request_history).last().cloned()
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, CredentialError> {
        lock(&self.request_history).push(request);

        lock(&self.responses).pop_front().ok_or_else(|| {
            NetworkError::ConnectionFailed {
                message: "No mock response available".to_string(),
            }
            .into()
        })
    }
}

/// Lock a std mutex, recovering the data if a test thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_is_fifo() {
        let transport = MockHttpTransport::new();
        transport
            .queue_json_response(200, &serde_json::json!({"n": 1}))
            .queue_response(500, "second");

        let request = HttpRequest::form_post("https://example.com/token", &[("a", "b")]);
        let first = transport.send(request.clone()).await.unwrap();
        let second = transport.send(request).await.unwrap();

        assert!(first.is_success());
        assert_eq!(second.status, 500);
        assert!(transport.send(HttpRequest::form_post("x", &[])).await.is_err());
        assert_eq!(transport.get_requests().len(), 3);
    }

    #[test]
    fn test_form_encoding() {
        let request = HttpRequest::form_post(
            "https://example.com",
            &[("redirect_uri", "http://127.0.0.1:8080/"), ("scope", "a b")],
        );
        assert_eq!(
            request.body.as_deref(),
            Some("redirect_uri=http%3A%2F%2F127.0.0.1%3A8080%2F&scope=a+b")
        );
        assert_eq!(request.form_params()["scope"], "a b");
        assert_eq!(
            request.headers["content-type"],
            "application/x-www-form-urlencoded"
        );
    }

    #[test]
    fn test_http_method_as_str() {
        assert_eq!(HttpMethod::Get.as_str(), "GET");
        assert_eq!(HttpMethod::Post.as_str(), "POST");
    }
}
