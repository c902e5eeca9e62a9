//! Issue classifier
//!
//! Ranks every non-general domain in a registry snapshot by relevance to the
//! issue text. Domains below `min_score` are dropped; when nothing is left
//! the result is a single entry for the general domain.

use super::scoring::{DefaultScorer, SignatureScorer};
use super::text::AnalyzedText;
use crate::registry::descriptor::DomainId;
use crate::registry::snapshot::RegistrySnapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_MIN_SCORE: f64 = 0.15;
pub const DEFAULT_GENERAL_DOMAIN: &str = "general";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub min_score: f64,
    pub general_domain: DomainId,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_SCORE,
            general_domain: DomainId::new(DEFAULT_GENERAL_DOMAIN),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainScore {
    pub domain_id: DomainId,
    pub score: f64,
}

/// Ranked candidates for one issue; never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RankedCandidates")]
pub struct ClassificationResult {
    ranked: Vec<DomainScore>,
    /// True when no domain cleared the threshold
    general_fallback: bool,
}

#[derive(Deserialize)]
struct RankedCandidates {
    ranked: Vec<DomainScore>,
    #[serde(default)]
    general_fallback: bool,
}

impl TryFrom<RankedCandidates> for ClassificationResult {
    type Error = String;

    fn try_from(raw: RankedCandidates) -> Result<Self, Self::Error> {
        Self::new(raw.ranked, raw.general_fallback)
            .ok_or_else(|| "classification must rank at least one domain".to_string())
    }
}

impl ClassificationResult {
    /// `None` when `ranked` is empty.
    pub fn new(ranked: Vec<DomainScore>, general_fallback: bool) -> Option<Self> {
        if ranked.is_empty() {
            return None;
        }
        Some(Self {
            ranked,
            general_fallback,
        })
    }

    /// A one-entry result pinned to `domain_id` (used for fixed workflow steps).
    pub fn single(domain_id: DomainId) -> Self {
        Self {
            ranked: vec![DomainScore {
                domain_id,
                score: 1.0,
            }],
            general_fallback: false,
        }
    }

    pub fn top(&self) -> &DomainScore {
        // non-empty by construction
        &self.ranked[0]
    }

    pub fn ranked(&self) -> &[DomainScore] {
        &self.ranked
    }

    pub fn general_fallback(&self) -> bool {
        self.general_fallback
    }

    pub fn domain_ids(&self) -> impl Iterator<Item = &DomainId> {
        self.ranked.iter().map(|s| &s.domain_id)
    }
}

pub struct Classifier {
    scorer: Arc<dyn SignatureScorer>,
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(scorer: Arc<dyn SignatureScorer>, config: ClassifierConfig) -> Self {
        Self { scorer, config }
    }

    pub fn with_default_scorer(config: ClassifierConfig) -> Self {
        Self::new(Arc::new(DefaultScorer::default()), config)
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.name()
    }

    pub fn classify(&self, text: &str, snapshot: &RegistrySnapshot) -> ClassificationResult {
        let analyzed = AnalyzedText::new(text);
        let mut ranked: Vec<DomainScore> = Vec::new();

        if !analyzed.is_empty() {
            for descriptor in snapshot.all() {
                if descriptor.id == self.config.general_domain {
                    continue;
                }
                let score = self
                    .scorer
                    .score(&analyzed, descriptor, snapshot.corpus())
                    .clamp(0.0, 1.0);
                if score >= self.config.min_score && score > 0.0 {
                    ranked.push(DomainScore {
                        domain_id: descriptor.id.clone(),
                        score,
                    });
                }
            }
        }

        // Stable sort: equal scores keep registration order
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        if ranked.is_empty() {
            return ClassificationResult {
                ranked: vec![DomainScore {
                    domain_id: self.config.general_domain.clone(),
                    score: 0.0,
                }],
                general_fallback: true,
            };
        }

        ClassificationResult {
            ranked,
            general_fallback: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::descriptor::{DomainDescriptor, Endpoint};
    use crate::registry::signature::{Signature, WeightedKeyword};

    fn domain(id: &str, keywords: &[&str]) -> DomainDescriptor {
        DomainDescriptor::new(
            id,
            Signature::keywords(keywords.iter().copied()),
            Endpoint::new(format!("http://{}.local", id)),
        )
    }

    fn snapshot() -> RegistrySnapshot {
        RegistrySnapshot::from_descriptors([
            domain("parking", &["parking", "driveway", "car"]),
            domain("noise", &["noise", "loud", "music"]),
            domain("permits", &["permit", "license"]),
            DomainDescriptor::new("general", Signature::empty(), Endpoint::new("http://g")),
        ])
        .unwrap()
    }

    #[test]
    fn test_classify_picks_matching_domain() {
        let classifier = Classifier::with_default_scorer(ClassifierConfig::default());
        let result = classifier.classify("A car is blocking my driveway", &snapshot());
        assert!(!result.general_fallback());
        assert_eq!(result.top().domain_id.as_str(), "parking");
        assert!(result.top().score > 0.5);
    }

    #[test]
    fn test_ranking_is_descending() {
        let classifier = Classifier::with_default_scorer(ClassifierConfig::default());
        let result =
            classifier.classify("Loud music and a car parked across my driveway", &snapshot());
        let scores: Vec<f64> = result.ranked().iter().map(|s| s.score).collect();
        let mut sorted = scores.clone();
        sorted.sort_by(|a, b| b.total_cmp(a));
        assert_eq!(scores, sorted);
        assert_eq!(result.ranked().len(), 2);
    }

    #[test]
    fn test_ties_keep_registration_order() {
        let classifier = Classifier::with_default_scorer(ClassifierConfig::default());
        let snap = RegistrySnapshot::from_descriptors([
            domain("zoning", &["fence"]),
            domain("neighbor_dispute", &["hedge"]),
        ])
        .unwrap();
        let result = classifier.classify("hedge and fence trouble", &snap);
        let ids: Vec<&str> = result.domain_ids().map(|d| d.as_str()).collect();
        assert_eq!(ids, vec!["zoning", "neighbor_dispute"]);
    }

    #[test]
    fn test_no_match_falls_back_to_general() {
        let classifier = Classifier::with_default_scorer(ClassifierConfig::default());
        let result = classifier.classify("what is the weather like", &snapshot());
        assert!(result.general_fallback());
        assert_eq!(result.ranked().len(), 1);
        assert_eq!(result.top().domain_id.as_str(), "general");
        assert_eq!(result.top().score, 0.0);
    }

    #[test]
    fn test_empty_text_falls_back_to_general() {
        let classifier = Classifier::with_default_scorer(ClassifierConfig::default());
        let result = classifier.classify("", &snapshot());
        assert!(result.general_fallback());
    }

    #[test]
    fn test_threshold_filters_weak_matches() {
        let config = ClassifierConfig {
            min_score: 0.9,
            ..ClassifierConfig::default()
        };
        let classifier = Classifier::with_default_scorer(config);
        let result = classifier.classify("my car", &snapshot());
        assert!(result.general_fallback());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = Classifier::with_default_scorer(ClassifierConfig::default());
        let snap = snapshot();
        let a = classifier.classify("loud music from the parking lot", &snap);
        let b = classifier.classify("loud music from the parking lot", &snap);
        assert_eq!(a, b);
    }

    #[test]
    fn test_low_weight_keyword_still_wins_exclusive_match() {
        let classifier = Classifier::with_default_scorer(ClassifierConfig::default());
        let snap = RegistrySnapshot::from_descriptors([
            DomainDescriptor::new(
                "noise",
                Signature::weighted(vec![WeightedKeyword::new("barking", 0.2)]),
                Endpoint::new("http://noise.local"),
            ),
            domain("parking", &["driveway"]),
            DomainDescriptor::new("general", Signature::empty(), Endpoint::new("http://g")),
        ])
        .unwrap();
        let result = classifier.classify("dog barking all night", &snap);
        assert!(!result.general_fallback());
        assert_eq!(result.top().domain_id.as_str(), "noise");
        assert!(result.top().score >= 0.5);
    }

    #[test]
    fn test_empty_ranking_is_rejected() {
        assert!(ClassificationResult::new(Vec::new(), true).is_none());
        let err = serde_json::from_str::<ClassificationResult>(r#"{"ranked":[]}"#).unwrap_err();
        assert!(err.to_string().contains("at least one domain"));

        let parsed: ClassificationResult =
            serde_json::from_str(r#"{"ranked":[{"domain_id":"parking","score":0.5}]}"#).unwrap();
        assert_eq!(parsed.top().domain_id.as_str(), "parking");
        assert!(!parsed.general_fallback());
    }
}
