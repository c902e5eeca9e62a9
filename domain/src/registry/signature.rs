//! Domain signatures
//!
//! A signature is what the classifier compares issue text against. Either a
//! set of weighted keywords/phrases, or an embedding vector produced by the
//! same embedder the classifier is configured with.

use serde::{Deserialize, Serialize};

fn default_weight() -> f64 {
    1.0
}

/// A keyword or multi-word phrase with a relative weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedKeyword {
    pub term: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl WeightedKeyword {
    pub fn new(term: impl Into<String>, weight: f64) -> Self {
        Self {
            term: term.into(),
            weight,
        }
    }
}

impl From<&str> for WeightedKeyword {
    fn from(term: &str) -> Self {
        Self::new(term, default_weight())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signature {
    Keywords { keywords: Vec<WeightedKeyword> },
    Embedding { vector: Vec<f32> },
}

impl Signature {
    /// Keyword signature where every term has weight 1.0.
    pub fn keywords<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Signature::Keywords {
            keywords: terms
                .into_iter()
                .map(|t| WeightedKeyword::from(t.as_ref()))
                .collect(),
        }
    }

    pub fn weighted(keywords: Vec<WeightedKeyword>) -> Self {
        Signature::Keywords { keywords }
    }

    /// A signature that never matches anything (used by the `general` domain).
    pub fn empty() -> Self {
        Signature::Keywords {
            keywords: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Signature::Keywords { keywords } => keywords.is_empty(),
            Signature::Embedding { vector } => vector.is_empty(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        match self {
            Signature::Keywords { keywords } => {
                for kw in keywords {
                    if kw.term.trim().is_empty() {
                        return Err("keyword cannot be empty".to_string());
                    }
                    if !kw.weight.is_finite() || kw.weight <= 0.0 {
                        return Err(format!("keyword '{}' has invalid weight {}", kw.term, kw.weight));
                    }
                }
                Ok(())
            }
            Signature::Embedding { vector } => {
                if vector.is_empty() {
                    return Err("embedding vector cannot be empty".to_string());
                }
                if vector.iter().any(|v| !v.is_finite()) {
                    return Err("embedding vector contains non-finite values".to_string());
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_helper_weights() {
        let sig = Signature::keywords(["park", "driveway"]);
        match sig {
            Signature::Keywords { keywords } => {
                assert_eq!(keywords.len(), 2);
                assert!(keywords.iter().all(|k| k.weight == 1.0));
            }
            _ => panic!("expected keywords"),
        }
    }

    #[test]
    fn test_invalid_weight() {
        let sig = Signature::weighted(vec![WeightedKeyword::new("park", 0.0)]);
        assert!(sig.validate().is_err());
    }

    #[test]
    fn test_empty_embedding_invalid() {
        let sig = Signature::Embedding { vector: vec![] };
        assert!(sig.validate().is_err());
    }

    #[test]
    fn test_tagged_serde() {
        let json = r#"{"kind":"keywords","keywords":[{"term":"noise"},{"term":"loud music","weight":2.0}]}"#;
        let sig: Signature = serde_json::from_str(json).unwrap();
        assert!(sig.validate().is_ok());
        assert!(!sig.is_empty());
    }
}
