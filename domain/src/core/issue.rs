//! Issue report value object
//!
//! The free-text report a citizen submits, validated at the submission
//! boundary before classification.

use super::error::DomainError;
use serde::{Deserialize, Serialize};

/// Minimum number of characters in an issue description.
pub const MIN_ISSUE_CHARS: usize = 10;

/// Maximum number of characters in an issue description.
pub const MAX_ISSUE_CHARS: usize = 2000;

/// Urgency attached to an issue report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!(
                "Unknown priority: {}. Valid: low, medium, high, urgent",
                other
            )),
        }
    }
}

/// A civic issue raised by a citizen (Value Object)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReport {
    text: String,
    location: Option<String>,
    priority: Priority,
}

impl IssueReport {
    /// Validate and build a report. The text is trimmed first.
    pub fn new(text: impl Into<String>) -> Result<Self, DomainError> {
        let text = text.into().trim().to_string();
        let chars = text.chars().count();
        if chars < MIN_ISSUE_CHARS {
            return Err(DomainError::InvalidIssue(format!(
                "description too short ({} characters, minimum {})",
                chars, MIN_ISSUE_CHARS
            )));
        }
        if chars > MAX_ISSUE_CHARS {
            return Err(DomainError::InvalidIssue(format!(
                "description too long ({} characters, maximum {})",
                chars, MAX_ISSUE_CHARS
            )));
        }
        Ok(Self {
            text,
            location: None,
            priority: Priority::default(),
        })
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        let location = location.into();
        self.location = if location.trim().is_empty() {
            None
        } else {
            Some(location)
        };
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// JSON payload handed to the selected domain handler.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "description": self.text,
            "location": self.location,
            "priority": self.priority,
        })
    }
}
