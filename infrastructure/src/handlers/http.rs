//! JSON-over-HTTP domain handler
//!
//! `invoke` POSTs the payload to `endpoint.url + invoke_path` and parses the
//! JSON response; `probe` GETs `endpoint.url + health_path`. Any non-2xx
//! status is a failure.

use async_trait::async_trait;
use civic_application::ports::domain_handler::{DomainHandler, HandlerError};
use civic_domain::DomainDescriptor;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("civicmind/", env!("CARGO_PKG_VERSION"));

/// Maximum response body size (1 MB)
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Longest body excerpt quoted in an error
const ERROR_EXCERPT: usize = 200;

#[derive(Debug, Clone)]
pub struct HttpDomainHandler {
    client: reqwest::Client,
}

impl HttpDomainHandler {
    pub fn new() -> Result<Self, HandlerError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| HandlerError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn send_error(e: reqwest::Error, timeout: Duration) -> HandlerError {
    if e.is_timeout() {
        HandlerError::Timeout(timeout)
    } else {
        HandlerError::Transport(e.to_string())
    }
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.len() > ERROR_EXCERPT {
        format!("{}...", &text[..text.floor_char_boundary(ERROR_EXCERPT)])
    } else {
        text.to_string()
    }
}

async fn read_body(response: reqwest::Response, timeout: Duration) -> Result<Vec<u8>, HandlerError> {
    let body = response.bytes().await.map_err(|e| send_error(e, timeout))?;
    if body.len() > MAX_BODY_SIZE {
        return Err(HandlerError::Rejected(format!(
            "Response too large: {} bytes (max: {} bytes)",
            body.len(),
            MAX_BODY_SIZE
        )));
    }
    Ok(body.to_vec())
}

fn check_status(status: reqwest::StatusCode, body: &[u8]) -> Result<(), HandlerError> {
    if status.is_success() {
        return Ok(());
    }
    Err(HandlerError::Rejected(format!(
        "HTTP {} {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown"),
        excerpt(body)
    )))
}

#[async_trait]
impl DomainHandler for HttpDomainHandler {
    async fn invoke(
        &self,
        domain: &DomainDescriptor,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, HandlerError> {
        let url = domain.endpoint.invoke_url();
        debug!(domain = %domain.id, url = %url, "POST");

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| send_error(e, timeout))?;
        let status = response.status();
        let body = read_body(response, timeout).await?;
        check_status(status, &body)?;

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|e| {
            HandlerError::Rejected(format!("Invalid JSON response ({}): {}", e, excerpt(&body)))
        })
    }

    async fn probe(&self, domain: &DomainDescriptor, timeout: Duration) -> Result<(), HandlerError> {
        let url = domain.endpoint.health_url();
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| send_error(e, timeout))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = read_body(response, timeout).await.unwrap_or_default();
        check_status(status, &body)
    }
}
