//! Classifier configuration from TOML (`[classifier]` section)

use civic_domain::{ClassifierConfig, DomainId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileClassifierConfig {
    /// Candidates scoring below this are dropped
    pub min_score: f64,
    /// Domain that receives requests no other domain matches
    pub general_domain: String,
}

impl Default for FileClassifierConfig {
    fn default() -> Self {
        let defaults = ClassifierConfig::default();
        Self {
            min_score: defaults.min_score,
            general_domain: defaults.general_domain.to_string(),
        }
    }
}

impl FileClassifierConfig {
    pub fn to_classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            min_score: self.min_score,
            general_domain: DomainId::new(self.general_domain.clone()),
        }
    }
}
