//! Core domain concepts shared across all subdomains.
//!
//! - [`issue::IssueReport`]: a validated civic issue report
//! - [`error::DomainError`]: domain-level errors

pub mod error;
pub mod issue;
