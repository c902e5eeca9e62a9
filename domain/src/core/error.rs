//! Domain error types

use thiserror::Error;

/// Domain-level errors raised while registering domains or validating input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Domain already registered: {0}")]
    DuplicateDomain(String),

    #[error("Domain not found: {0}")]
    NotFound(String),

    #[error("Invalid domain descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Invalid issue report: {0}")]
    InvalidIssue(String),
}

impl DomainError {
    /// Registration-time errors are the caller's fault and never retried.
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            DomainError::DuplicateDomain(_)
                | DomainError::NotFound(_)
                | DomainError::InvalidDescriptor(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_domain_display() {
        let error = DomainError::DuplicateDomain("parking".to_string());
        assert_eq!(error.to_string(), "Domain already registered: parking");
    }

    #[test]
    fn test_registration_error_classification() {
        assert!(DomainError::DuplicateDomain("a".into()).is_registration_error());
        assert!(DomainError::NotFound("a".into()).is_registration_error());
        assert!(!DomainError::InvalidIssue("short".into()).is_registration_error());
    }
}
