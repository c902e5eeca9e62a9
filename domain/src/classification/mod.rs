//! Issue classification
//!
//! Pure ranking of registered domains against free-text issue reports.
//! Nothing here performs I/O; the classifier only reads a registry snapshot.

pub mod classifier;
pub mod scoring;
pub mod text;

pub use classifier::{ClassificationResult, Classifier, ClassifierConfig, DomainScore};
pub use scoring::{
    DefaultScorer, EmbeddingScorer, HashingEmbedder, KeywordScorer, SignatureCorpus,
    SignatureScorer, TextEmbedder,
};
