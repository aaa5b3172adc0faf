//! HTTP client abstraction
//!
//! TigerStyle: abstract HTTP client trait for DST compatibility.
//!
//! The LLM and embedding providers sit on this trait rather than on a
//! concrete client, so simulation tests can fail requests underneath the
//! provider without mocking the provider itself.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Default request timeout in milliseconds.
pub const HTTP_TIMEOUT_MS_DEFAULT: u64 = 30_000;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
        }
    }
}

/// HTTP request configuration.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl HttpRequest {
    /// Create a new POST request.
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: Duration::from_millis(HTTP_TIMEOUT_MS_DEFAULT),
        }
    }

    /// Create a new GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: Duration::from_millis(HTTP_TIMEOUT_MS_DEFAULT),
        }
    }

    /// Set a JSON body and the matching content type.
    pub fn with_json_body(mut self, json: &Value) -> Self {
        self.body = Some(serde_json::to_string(json).unwrap_or_default());
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        self
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Check if the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// HTTP client errors.
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    #[error("HTTP request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("HTTP request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("fault injected: {fault}")]
    FaultInjected { fault: String },
}

pub type HttpResult<T> = Result<T, HttpError>;

/// Abstract HTTP client.
///
/// Production code uses [`ReqwestHttpClient`]; simulation tests substitute a
/// scripted client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute an HTTP request.
    async fn execute(&self, request: HttpRequest) -> HttpResult<HttpResponse>;

    /// Convenience: POST a JSON body.
    async fn post_json(&self, url: &str, body: &Value) -> HttpResult<HttpResponse> {
        self.execute(HttpRequest::post(url).with_json_body(body))
            .await
    }
}

/// Production HTTP client backed by reqwest.
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> HttpResult<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };

        builder = builder.timeout(request.timeout);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let timeout_ms = request.timeout.as_millis() as u64;
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout { timeout_ms }
            } else if e.is_connect() {
                HttpError::ConnectionFailed {
                    reason: e.to_string(),
                }
            } else {
                HttpError::RequestFailed {
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| HttpError::RequestFailed {
            reason: e.to_string(),
        })?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = HttpRequest::post("https://example.com/v1/chat/completions")
            .with_header("Authorization", "Bearer token")
            .with_timeout(Duration::from_secs(10));

        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(
            req.headers.get("Authorization"),
            Some(&"Bearer token".to_string())
        );
        assert_eq!(req.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let req = HttpRequest::post("https://example.com")
            .with_json_body(&serde_json::json!({"k": "v"}));

        assert_eq!(
            req.headers.get("Content-Type"),
            Some(&"application/json".to_string())
        );
        assert!(req.body.unwrap().contains("\"k\""));
    }

    #[test]
    fn test_response_success() {
        assert!(HttpResponse::new(200, "{}").is_success());
        assert!(!HttpResponse::new(429, "rate limited").is_success());
    }

    #[test]
    fn test_response_json() {
        let resp = HttpResponse::new(200, r#"{"key": "value"}"#);
        assert_eq!(resp.json().unwrap()["key"], "value");
    }
}
