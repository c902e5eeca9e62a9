//! Signature scoring
//!
//! A [`SignatureScorer`] turns (issue text, domain signature) into a
//! relevance score in `[0, 1]`. Scorers are pure and deterministic: the same
//! text against the same registry snapshot always yields the same score.
//!
//! Keyword signatures are scored by specificity-weighted matching: a term
//! that appears in many domains' signatures (e.g. "permit") says less about
//! any one of them than a term only one domain claims ("driveway"). Weights
//! are relative within a signature: the raw sum is taken in units of the
//! signature's lightest keyword, then squashed with `1 - 2^-raw`, so any
//! single exclusive match scores at least 0.5 and further matches approach 1.
//!
//! Embedding signatures are compared by cosine similarity against the
//! configured [`TextEmbedder`].

use super::text::{AnalyzedText, stems};
use crate::registry::descriptor::DomainDescriptor;
use crate::registry::signature::{Signature, WeightedKeyword};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// How many registered keyword signatures mention each stemmed term.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignatureCorpus {
    document_frequency: HashMap<String, usize>,
}

impl SignatureCorpus {
    pub fn from_descriptors(descriptors: &[DomainDescriptor]) -> Self {
        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        for descriptor in descriptors {
            if let Signature::Keywords { keywords } = &descriptor.signature {
                let unique: HashSet<String> = keywords.iter().map(|k| term_key(&k.term)).collect();
                for key in unique {
                    *document_frequency.entry(key).or_insert(0) += 1;
                }
            }
        }
        Self { document_frequency }
    }

    /// Number of signatures containing `term` (after stemming).
    pub fn document_frequency(&self, term: &str) -> usize {
        self.document_frequency
            .get(&term_key(term))
            .copied()
            .unwrap_or(0)
    }

    /// `1 / df`, or 1.0 for terms the corpus has never seen.
    pub fn specificity(&self, term: &str) -> f64 {
        match self.document_frequency(term) {
            0 => 1.0,
            df => 1.0 / df as f64,
        }
    }
}

fn term_key(term: &str) -> String {
    stems(term).join(" ")
}

/// Scores issue text against one domain's signature.
pub trait SignatureScorer: Send + Sync {
    fn name(&self) -> &str;

    fn score(
        &self,
        text: &AnalyzedText,
        descriptor: &DomainDescriptor,
        corpus: &SignatureCorpus,
    ) -> f64;
}

/// Specificity-weighted keyword matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordScorer;

impl KeywordScorer {
    pub fn raw_score(
        &self,
        text: &AnalyzedText,
        keywords: &[WeightedKeyword],
        corpus: &SignatureCorpus,
    ) -> f64 {
        keywords
            .iter()
            .filter(|kw| text.contains(&stems(&kw.term)))
            .map(|kw| kw.weight * corpus.specificity(&kw.term))
            .sum()
    }

    /// [`raw_score`](Self::raw_score) measured in units of the lightest
    /// keyword weight.
    pub fn normalized_score(
        &self,
        text: &AnalyzedText,
        keywords: &[WeightedKeyword],
        corpus: &SignatureCorpus,
    ) -> f64 {
        let unit = keywords
            .iter()
            .map(|kw| kw.weight)
            .filter(|w| w.is_finite() && *w > 0.0)
            .fold(f64::INFINITY, f64::min);
        let raw = self.raw_score(text, keywords, corpus);
        if unit.is_finite() { raw / unit } else { raw }
    }
}

impl SignatureScorer for KeywordScorer {
    fn name(&self) -> &str {
        "keywords"
    }

    fn score(
        &self,
        text: &AnalyzedText,
        descriptor: &DomainDescriptor,
        corpus: &SignatureCorpus,
    ) -> f64 {
        match &descriptor.signature {
            Signature::Keywords { keywords } => {
                let raw = self.normalized_score(text, keywords, corpus);
                if raw <= 0.0 {
                    0.0
                } else {
                    1.0 - 2f64.powf(-raw)
                }
            }
            Signature::Embedding { .. } => 0.0,
        }
    }
}

/// Maps text into a vector space shared with embedding signatures.
pub trait TextEmbedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Deterministic feature-hashing embedder over stemmed tokens.
///
/// No model, no network: good enough to give embedding signatures a stable
/// meaning in tests and offline deployments.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSIONS: usize = 256;

    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Build an embedding signature from representative terms.
    pub fn signature_for<I, S>(&self, terms: I) -> Signature
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = terms
            .into_iter()
            .map(|t| t.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(" ");
        Signature::Embedding {
            vector: self.embed(&joined),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSIONS)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

impl TextEmbedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for stem in stems(text) {
            let bucket = (fnv1a(stem.as_bytes()) % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

/// Cosine similarity clamped to `[0, 1]`. Mismatched or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norm_a = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

#[derive(Clone)]
pub struct EmbeddingScorer {
    embedder: Arc<dyn TextEmbedder>,
}

impl EmbeddingScorer {
    pub fn new(embedder: Arc<dyn TextEmbedder>) -> Self {
        Self { embedder }
    }
}

impl SignatureScorer for EmbeddingScorer {
    fn name(&self) -> &str {
        "embedding"
    }

    fn score(
        &self,
        text: &AnalyzedText,
        descriptor: &DomainDescriptor,
        _corpus: &SignatureCorpus,
    ) -> f64 {
        match &descriptor.signature {
            Signature::Embedding { vector } => {
                cosine_similarity(&self.embedder.embed(text.raw()), vector)
            }
            Signature::Keywords { .. } => 0.0,
        }
    }
}

/// Dispatches on the signature kind so a registry can mix keyword and
/// embedding domains.
#[derive(Clone)]
pub struct DefaultScorer {
    keywords: KeywordScorer,
    embedding: EmbeddingScorer,
}

impl DefaultScorer {
    pub fn new(embedder: Arc<dyn TextEmbedder>) -> Self {
        Self {
            keywords: KeywordScorer,
            embedding: EmbeddingScorer::new(embedder),
        }
    }
}

impl Default for DefaultScorer {
    fn default() -> Self {
        Self::new(Arc::new(HashingEmbedder::default()))
    }
}

impl SignatureScorer for DefaultScorer {
    fn name(&self) -> &str {
        "default"
    }

    fn score(
        &self,
        text: &AnalyzedText,
        descriptor: &DomainDescriptor,
        corpus: &SignatureCorpus,
    ) -> f64 {
        match descriptor.signature {
            Signature::Keywords { .. } => self.keywords.score(text, descriptor, corpus),
            Signature::Embedding { .. } => self.embedding.score(text, descriptor, corpus),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::descriptor::Endpoint;

    fn keyword_domain(id: &str, keywords: &[&str]) -> DomainDescriptor {
        DomainDescriptor::new(
            id,
            Signature::keywords(keywords.iter().copied()),
            Endpoint::new("http://localhost"),
        )
    }

    #[test]
    fn test_single_exclusive_match_scores_half() {
        let parking = keyword_domain("parking", &["driveway"]);
        let corpus = SignatureCorpus::from_descriptors(std::slice::from_ref(&parking));
        let text = AnalyzedText::new("Someone blocked my driveway");
        let score = KeywordScorer.score(&text, &parking, &corpus);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_shared_terms_are_less_specific() {
        let permits = keyword_domain("permits", &["permit"]);
        let business = keyword_domain("business", &["permit", "restaurant"]);
        let corpus = SignatureCorpus::from_descriptors(&[permits.clone(), business.clone()]);
        assert_eq!(corpus.document_frequency("permits"), 2);

        let text = AnalyzedText::new("I need a permit for my restaurant");
        let permits_score = KeywordScorer.score(&text, &permits, &corpus);
        let business_score = KeywordScorer.score(&text, &business, &corpus);
        assert!(business_score > permits_score);
        assert!((permits_score - (1.0 - 2f64.powf(-0.5))).abs() < 1e-9);
    }

    #[test]
    fn test_no_match_scores_zero() {
        let noise = keyword_domain("noise", &["loud music"]);
        let corpus = SignatureCorpus::from_descriptors(std::slice::from_ref(&noise));
        let text = AnalyzedText::new("pothole on main street");
        assert_eq!(KeywordScorer.score(&text, &noise, &corpus), 0.0);
    }

    #[test]
    fn test_low_weight_exclusive_match_scores_half() {
        let noise = DomainDescriptor::new(
            "noise",
            Signature::weighted(vec![WeightedKeyword::new("barking", 0.2)]),
            Endpoint::new("http://localhost"),
        );
        let corpus = SignatureCorpus::from_descriptors(std::slice::from_ref(&noise));
        let text = AnalyzedText::new("dog barking all night");
        let score = KeywordScorer.score(&text, &noise, &corpus);
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_weights_are_relative_within_signature() {
        let noise = DomainDescriptor::new(
            "noise",
            Signature::weighted(vec![
                WeightedKeyword::new("barking", 0.5),
                WeightedKeyword::new("music", 2.0),
            ]),
            Endpoint::new("http://localhost"),
        );
        let corpus = SignatureCorpus::from_descriptors(std::slice::from_ref(&noise));
        let weak = KeywordScorer.score(&AnalyzedText::new("barking"), &noise, &corpus);
        let strong = KeywordScorer.score(&AnalyzedText::new("music"), &noise, &corpus);
        assert!((weak - 0.5).abs() < 1e-9);
        assert!((strong - (1.0 - 2f64.powf(-4.0))).abs() < 1e-9);
    }

    #[test]
    fn test_scores_stay_in_unit_range() {
        let heavy = DomainDescriptor::new(
            "noise",
            Signature::weighted(vec![
                WeightedKeyword::new("loud", 10.0),
                WeightedKeyword::new("music", 10.0),
                WeightedKeyword::new("party", 1.0),
            ]),
            Endpoint::new("http://localhost"),
        );
        let corpus = SignatureCorpus::from_descriptors(std::slice::from_ref(&heavy));
        let score = KeywordScorer.score(&AnalyzedText::new("loud music"), &heavy, &corpus);
        assert!(score > 0.99 && score <= 1.0);
    }

    #[test]
    fn test_hashing_embedder_is_deterministic_and_normalised() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("loud music at night");
        let b = embedder.embed("loud music at night");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_embedding_scorer_prefers_similar_text() {
        let embedder = Arc::new(HashingEmbedder::default());
        let noise = DomainDescriptor::new(
            "noise",
            embedder.signature_for(["loud", "music", "party", "night"]),
            Endpoint::new("http://localhost"),
        );
        let scorer = DefaultScorer::new(embedder);
        let corpus = SignatureCorpus::default();
        let close = scorer.score(&AnalyzedText::new("loud party music"), &noise, &corpus);
        let far = scorer.score(&AnalyzedText::new("tax assessment appeal"), &noise, &corpus);
        assert!(close > far);
        assert!((0.0..=1.0).contains(&close));
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
    }
}
