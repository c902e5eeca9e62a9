//! Domain handler port
//!
//! Defines how the orchestrator talks to the external service that handles
//! a domain. The core assumes nothing about transport: an adapter may speak
//! HTTP, call a local function, or echo the payload back in a dry run.

use async_trait::async_trait;
use civic_domain::DomainDescriptor;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by a domain handler.
///
/// Every variant counts as a failure for circuit-breaker purposes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),

    #[error("Handler rejected the request: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl HandlerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HandlerError::Timeout(_))
    }
}

/// Gateway to domain handlers
///
/// Implementations (adapters) live in the infrastructure layer.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    /// Send `payload` to the domain's handler and return its response.
    ///
    /// The caller also enforces `timeout`; adapters should pass it on to the
    /// transport so abandoned requests are cancelled at the source.
    async fn invoke(
        &self,
        domain: &DomainDescriptor,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, HandlerError>;

    /// Active health check against the domain's health endpoint.
    async fn probe(&self, domain: &DomainDescriptor, timeout: Duration) -> Result<(), HandlerError>;
}
