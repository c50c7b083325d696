//! HTTP client abstraction used by the provider connectors.
//!
//! Connectors speak plain request/response structs through the `HttpClient`
//! trait so tests can substitute a mock transport and assert on the exact
//! URLs, headers, and bodies a vendor call produces.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{OssError, Result};

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
}

impl HttpMethod {
    /// Wire representation, as used in signature canonical strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// HTTP response
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Parse response body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| OssError::Parse(format!("JSON deserialization failed: {}", e)))
    }

    /// Get response body as UTF-8 string (lossy)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Get a response header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Async HTTP client trait.
///
/// The production implementation is [`ReqwestHttpClient`](crate::reqwest::ReqwestHttpClient);
/// tests use a `mockall` mock.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute an HTTP request.
    ///
    /// Non-2xx responses are returned as `Ok` — interpreting vendor status
    /// codes is the connector's job. Only transport-level failures become
    /// errors.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_request_builder() {
        let request = HttpRequest::new(HttpMethod::Put, "https://example.com/key")
            .header("Content-Type", "text/plain")
            .body(Bytes::from_static(b"hello"))
            .timeout(Duration::from_secs(30));

        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(
            request.headers.get("Content-Type"),
            Some(&"text/plain".to_string())
        );
        assert_eq!(request.body.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_http_response_helpers() {
        let mut headers = HashMap::new();
        headers.insert("Content-Length".to_string(), "4".to_string());
        let response = HttpResponse {
            status: 204,
            headers,
            body: Bytes::from_static(b"test"),
        };

        assert!(response.is_success());
        assert_eq!(response.header("content-length"), Some("4"));
        assert_eq!(response.text(), "test");
    }

    #[test]
    fn test_method_as_str() {
        assert_eq!(HttpMethod::Head.as_str(), "HEAD");
        assert_eq!(HttpMethod::Delete.as_str(), "DELETE");
    }
}
