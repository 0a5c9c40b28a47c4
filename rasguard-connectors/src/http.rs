//! HTTP/HTTPS client shared by the ThingsBoard and Pushover adapters
//!
//! ## Design Decisions
//!
//! `ureq` is a small blocking client with no async runtime of its own. Each
//! attempt runs on tokio's blocking pool via `spawn_blocking`, so a hung
//! socket never stalls the scheduler task; the scheduler's timeout around
//! the whole call still bounds how long it waits.
//!
//! ### Retries
//!
//! Transport errors, 5xx and 429 are retried with exponential backoff:
//!
//! ```text
//! delay(attempt) = retry_base * 2^attempt      (attempt >= 1)
//! ```
//!
//! Other 4xx answers are final: resending a request the server rejected as
//! malformed or unauthorized does not make it valid.
//!
//! ## Example Usage
//!
//! ```no_run
//! use rasguard_connectors::http::{HttpConnector, HttpConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HttpConfig::new("https://thingsboard.cloud")
//!     .timeout_secs(10)
//!     .max_retries(2)
//!     .header("X-Site", "hatchery-2");
//!
//! let http = HttpConnector::new(config)?;
//! http.post_json("/api/v1/TOKEN/telemetry", &serde_json::json!({ "ph": 7.1 })).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use rasguard_core::errors::CollaboratorError;
use serde::Serialize;
use thiserror::Error;

use crate::ConnectionStats;

/// HTTP-specific errors
#[derive(Debug, Error)]
pub enum HttpError {
    /// Network or request error
    #[error("Request failed: {0}")]
    Request(String),

    /// Server returned error status
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<HttpError> for CollaboratorError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Request(message) => CollaboratorError::Transport(message),
            HttpError::ServerError { status, message } => CollaboratorError::Rejected { status, message },
            HttpError::Serialization(message) => CollaboratorError::Serialization(message),
            HttpError::Config(message) => CollaboratorError::NotConfigured(message),
        }
    }
}

/// HTTP configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL, paths are appended to it
    pub base_url: String,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Authentication method
    pub auth: AuthMethod,
    /// Custom headers
    pub headers: Vec<(String, String)>,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff unit
    pub retry_base: Duration,
    /// User agent string
    pub user_agent: String,
}

/// Authentication methods
#[derive(Debug, Clone, PartialEq)]
pub enum AuthMethod {
    /// No authentication (ThingsBoard and Pushover carry tokens in path/body)
    None,
    /// Bearer token
    Bearer(String),
}

impl HttpConfig {
    /// Create new configuration with base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            timeout: Duration::from_secs(10),
            auth: AuthMethod::None,
            headers: Vec::new(),
            max_retries: 3,
            retry_base: Duration::from_millis(100),
            user_agent: format!("RASGuard/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Set bearer token authentication
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth = AuthMethod::Bearer(token.into());
        self
    }

    /// Set per-attempt timeout in seconds
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    /// Add custom header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Request body
#[derive(Debug, Clone)]
enum Body {
    Json(String),
    Form(Vec<(String, String)>),
}

impl Body {
    fn len(&self) -> usize {
        match self {
            Body::Json(json) => json.len(),
            Body::Form(pairs) => pairs.iter().map(|(k, v)| k.len() + v.len() + 2).sum(),
        }
    }
}

/// Result of one attempt
enum Attempt {
    Sent,
    Retryable(HttpError),
    Fatal(HttpError),
}

/// HTTP connector using lightweight ureq client
pub struct HttpConnector {
    config: HttpConfig,
    agent: ureq::Agent,
    stats: Arc<Mutex<ConnectionStats>>,
}

impl HttpConnector {
    /// Create new HTTP connector
    pub fn new(config: HttpConfig) -> Result<Self, HttpError> {
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            return Err(HttpError::Config("Base URL must start with http:// or https://".into()));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build();

        Ok(Self {
            config,
            agent,
            stats: Arc::new(Mutex::new(ConnectionStats::default())),
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// POST a JSON document to `path`
    pub async fn post_json<T: Serialize>(&self, path: &str, data: &T) -> Result<(), HttpError> {
        let json = serde_json::to_string(data).map_err(|e| HttpError::Serialization(e.to_string()))?;
        self.execute(path, Body::Json(json)).await
    }

    /// POST an `application/x-www-form-urlencoded` body to `path`
    pub async fn post_form(&self, path: &str, fields: Vec<(String, String)>) -> Result<(), HttpError> {
        self.execute(path, Body::Form(fields)).await
    }

    /// Delivery statistics so far
    pub fn stats(&self) -> ConnectionStats {
        self.stats.lock().map(|stats| stats.clone()).unwrap_or_default()
    }

    fn record(&self, update: impl FnOnce(&mut ConnectionStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    /// Build request with authentication and headers
    fn build_request(&self, path: &str) -> ureq::Request {
        let url = format!("{}{}", self.config.base_url, path);
        let mut request = self.agent.post(&url);

        if let AuthMethod::Bearer(token) = &self.config.auth {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }
        for (name, value) in &self.config.headers {
            request = request.set(name, value);
        }
        request.set("Accept", "application/json")
    }

    /// Execute request with retry logic
    async fn execute(&self, path: &str, body: Body) -> Result<(), HttpError> {
        let body = Arc::new(body);
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                // Exponential backoff
                let delay = self.config.retry_base * (1u32 << attempt.min(16));
                tokio::time::sleep(delay).await;
                self.record(|stats| stats.retries += 1);
            }

            let request = self.build_request(path);
            let attempt_body = Arc::clone(&body);
            let outcome = tokio::task::spawn_blocking(move || send_once(request, &attempt_body))
                .await
                .unwrap_or_else(|e| Attempt::Fatal(HttpError::Request(format!("request task failed: {e}"))));

            match outcome {
                Attempt::Sent => {
                    let bytes = body.len() as u64;
                    self.record(|stats| {
                        stats.messages_sent += 1;
                        stats.bytes_sent += bytes;
                    });
                    return Ok(());
                }
                Attempt::Retryable(e) => {
                    debug!("POST {} attempt {} failed: {}", redact(path), attempt + 1, e);
                    last_error = Some(e);
                }
                Attempt::Fatal(e) => {
                    self.fail(&e);
                    return Err(e);
                }
            }
        }

        // All retries exhausted
        let err = last_error.unwrap_or_else(|| HttpError::Request("Unknown error".into()));
        self.fail(&err);
        Err(err)
    }

    fn fail(&self, err: &HttpError) {
        let message = err.to_string();
        self.record(|stats| {
            stats.messages_failed += 1;
            stats.last_error = Some(message);
        });
    }
}

fn send_once(request: ureq::Request, body: &Body) -> Attempt {
    let response = match body {
        Body::Json(json) => request.set("Content-Type", "application/json").send_string(json),
        Body::Form(fields) => {
            let pairs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            request.send_form(&pairs)
        }
    };

    match response {
        Ok(resp) => {
            // drain so the connection can be reused
            let _ = resp.into_string();
            Attempt::Sent
        }
        Err(ureq::Error::Status(code, resp)) => {
            let err = HttpError::ServerError {
                status: code,
                message: resp.into_string().unwrap_or_default(),
            };
            if code >= 500 || code == 429 {
                Attempt::Retryable(err)
            } else {
                Attempt::Fatal(err)
            }
        }
        Err(ureq::Error::Transport(e)) => Attempt::Retryable(HttpError::Request(e.to_string())),
    }
}

/// Paths can carry device tokens; log only their first segment
fn redact(path: &str) -> String {
    let first = path.trim_start_matches('/').split('/').next().unwrap_or_default();
    format!("/{first}/...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = HttpConfig::new("https://thingsboard.cloud/")
            .bearer_token("test-token")
            .timeout_secs(60)
            .max_retries(5)
            .header("X-Custom", "value");

        assert_eq!(config.base_url, "https://thingsboard.cloud");
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.headers, vec![("X-Custom".to_owned(), "value".to_owned())]);
        assert_eq!(config.auth, AuthMethod::Bearer("test-token".into()));
    }

    #[test]
    fn test_url_validation() {
        assert!(HttpConnector::new(HttpConfig::new("not-a-url")).is_err());
        assert!(HttpConnector::new(HttpConfig::new("https://valid.url")).is_ok());
    }

    #[test]
    fn errors_map_to_collaborator_errors() {
        let rejected: CollaboratorError = HttpError::ServerError {
            status: 401,
            message: "bad token".into(),
        }
        .into();
        assert_eq!(
            rejected,
            CollaboratorError::Rejected {
                status: 401,
                message: "bad token".into()
            }
        );

        let transport: CollaboratorError = HttpError::Request("dns".into()).into();
        assert_eq!(transport, CollaboratorError::Transport("dns".into()));
    }

    #[test]
    fn redact_hides_tokens() {
        assert_eq!(redact("/api/v1/SECRET/telemetry"), "/api/...");
        assert_eq!(redact("/1/messages.json"), "/1/...");
    }

    #[tokio::test]
    async fn unreachable_host_exhausts_retries() {
        // port 9 (discard) on localhost refuses connections on a test host
        let config = HttpConfig::new("http://127.0.0.1:9")
            .max_retries(2)
            .retry_base(Duration::from_millis(1))
            .timeout_secs(1);
        let http = HttpConnector::new(config).unwrap();

        let result = http.post_json("/x", &serde_json::json!({ "v": 1 })).await;
        assert!(matches!(result, Err(HttpError::Request(_))));

        let stats = http.stats();
        assert_eq!(stats.messages_failed, 1);
        assert_eq!(stats.retries, 2);
        assert!(stats.last_error.is_some());
    }
}
