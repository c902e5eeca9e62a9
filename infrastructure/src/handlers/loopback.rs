//! In-process handler that acknowledges every request.

use async_trait::async_trait;
use civic_application::ports::domain_handler::{DomainHandler, HandlerError};
use civic_domain::DomainDescriptor;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Acknowledges every dispatch with a fresh `ticket_id` and echoes the
/// payload back. Probes always succeed.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackDomainHandler;

impl LoopbackDomainHandler {
    pub fn new() -> Self {
        Self
    }
}

fn ticket_id(domain: &DomainDescriptor) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", domain.id, &id[..8])
}

#[async_trait]
impl DomainHandler for LoopbackDomainHandler {
    async fn invoke(
        &self,
        domain: &DomainDescriptor,
        payload: Value,
        _timeout: Duration,
    ) -> Result<Value, HandlerError> {
        debug!(domain = %domain.id, url = %domain.endpoint.invoke_url(), "Loopback dispatch");
        Ok(json!({
            "handled_by": domain.id,
            "ticket_id": ticket_id(domain),
            "status": "received",
            "resolution_path": domain.resolution_path,
            "echo": payload,
        }))
    }

    async fn probe(&self, _domain: &DomainDescriptor, _timeout: Duration) -> Result<(), HandlerError> {
        Ok(())
    }
}
