//! Domain descriptor entity

use super::signature::Signature;
use crate::core::error::DomainError;
use serde::{Deserialize, Serialize};

/// Unique identifier of a civic service domain (e.g. `parking`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainId(String);

impl DomainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DomainId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DomainId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&DomainId> for DomainId {
    fn from(id: &DomainId) -> Self {
        id.clone()
    }
}

impl std::fmt::Display for DomainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a domain's handler lives. Opaque to the orchestration core; only
/// the handler adapter interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    #[serde(default = "default_invoke_path")]
    pub invoke_path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_invoke_path() -> String {
    "/analyze".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            invoke_path: default_invoke_path(),
            health_path: default_health_path(),
        }
    }

    pub fn invoke_url(&self) -> String {
        join_url(&self.url, &self.invoke_path)
    }

    pub fn health_url(&self) -> String {
        join_url(&self.url, &self.health_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// How a domain prefers issues to be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    /// Try neighbourly or community mediation before authorities
    CommunityFirst,
    /// Prepare forms and documents for an application
    Documents,
    /// Contact the responsible department directly
    #[default]
    LegalDirect,
}

impl ResolutionPath {
    pub fn as_str(&self) -> &str {
        match self {
            ResolutionPath::CommunityFirst => "community_first",
            ResolutionPath::Documents => "documents",
            ResolutionPath::LegalDirect => "legal_direct",
        }
    }
}

impl std::fmt::Display for ResolutionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered domain handler (Entity)
///
/// Immutable after registration; the signature can only change through an
/// explicit re-registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainDescriptor {
    pub id: DomainId,
    #[serde(default)]
    pub display_name: String,
    pub signature: Signature,
    pub endpoint: Endpoint,
    /// Alternate domains, tried in order when this one is unavailable
    #[serde(default)]
    pub fallback_ids: Vec<DomainId>,
    #[serde(default)]
    pub resolution_path: ResolutionPath,
}

impl DomainDescriptor {
    pub fn new(id: impl Into<DomainId>, signature: Signature, endpoint: Endpoint) -> Self {
        let id = id.into();
        Self {
            display_name: id.as_str().replace('_', " "),
            id,
            signature,
            endpoint,
            fallback_ids: Vec::new(),
            resolution_path: ResolutionPath::default(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_fallbacks<I, D>(mut self, fallbacks: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DomainId>,
    {
        self.fallback_ids = fallbacks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_resolution_path(mut self, path: ResolutionPath) -> Self {
        self.resolution_path = path;
        self
    }

    /// Check the descriptor in isolation (cross-domain checks belong to the registry).
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.id.as_str().trim().is_empty() {
            return Err(DomainError::InvalidDescriptor(
                "domain id cannot be empty".to_string(),
            ));
        }
        if self.fallback_ids.contains(&self.id) {
            return Err(DomainError::InvalidDescriptor(format!(
                "domain {} lists itself as a fallback",
                self.id
            )));
        }
        self.signature
            .validate()
            .map_err(|reason| DomainError::InvalidDescriptor(format!("{}: {}", self.id, reason)))
    }
}
