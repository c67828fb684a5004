//! Per-bookmark topic and keyword derivation.
//!
//! Pipeline: raw page text is segmented into pseudo-documents, a sufficiency
//! gate decides whether topic modeling is viable, one of the analyzer
//! variants runs, and the result is normalized into the canonical
//! [`AnalysisResult`] shape. Every variant degrades to the token-frequency
//! fallback instead of surfacing errors.
//!
//! # Architecture
//!
//! - `segment`: splits text into bounded, deduplicated segments
//! - `vectorize`: count-vectorizer family (tokens, n-grams, stopwords)
//! - `embedder`: embedding backend seam (fastembed in production)
//! - `embedding`: embedding-cluster analyzer (primary)
//! - `decompose`: probabilistic decomposition analyzer
//! - `phrase`: phrase-extraction analyzer (keywords only)
//! - `llm`: hosted-LLM analyzer (keywords only, quota-gated)
//! - `fallback`: token-frequency keyword extractor
//! - `normalize`: coerces variant output into the canonical shape

pub mod decompose;
pub mod embedder;
pub mod embedding;
pub mod fallback;
pub mod llm;
pub mod normalize;
pub mod segment;
pub mod vectorize;

pub mod phrase;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::storage::StorageManager;

/// Upper bound on result keywords across every analyzer variant.
pub const MAX_RESULT_KEYWORDS: usize = 5;

/// A single weighted term inside a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicKeyword {
    pub word: String,
    pub score: f64,
}

/// A ranked cluster of co-occurring terms. `topic_id` is run-local and not
/// stable across reruns; `probability` is this topic's share of the total
/// evidence mass (sums to at most 1 across a document's topics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub topic_id: i32,
    pub probability: f64,
    pub keywords: Vec<TopicKeyword>,
    pub representation: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub keywords: Vec<String>,
    pub topics: Vec<Topic>,
}

impl AnalysisResult {
    pub fn empty() -> Self {
        AnalysisResult::default()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.topics.is_empty()
    }
}

/// Common contract for all analyzer variants. `extract` never propagates
/// internal fit or network failures; it degrades to the fallback extractor
/// (or an empty result) and logs a warning.
pub trait Analyzer: Send {
    fn name(&self) -> &str;
    fn extract(&self, text: &str, title: &str) -> AnalysisResult;
}

/// Registry key for the embedding-cluster analyzer.
pub const ANALYZER_EMBEDDING: &str = "embedding";
/// Registry key for the probabilistic decomposition analyzer.
pub const ANALYZER_DECOMPOSE: &str = "decompose";
/// Registry key for the phrase-extraction analyzer.
pub const ANALYZER_PHRASE: &str = "phrase";
/// Registry key for the hosted-LLM analyzer.
pub const ANALYZER_LLM: &str = "llm";

pub fn analyzer_names() -> &'static [&'static str] {
    &[
        ANALYZER_EMBEDDING,
        ANALYZER_DECOMPOSE,
        ANALYZER_PHRASE,
        ANALYZER_LLM,
    ]
}

/// Builds an analyzer from its registry key and the assembled configuration.
/// `base_dir` hosts the embedding model cache; the LLM variant needs a
/// storage handle for its persisted usage counters. Each variant ignores
/// what it does not use.
pub fn build_analyzer(
    name: &str,
    config: &AnalysisConfig,
    base_dir: &Path,
    store: Arc<dyn StorageManager>,
) -> anyhow::Result<Box<dyn Analyzer>> {
    match name {
        ANALYZER_EMBEDDING => Ok(Box::new(embedding::EmbeddingClusterAnalyzer::new(
            config.clone(),
            base_dir.to_path_buf(),
        ))),
        ANALYZER_DECOMPOSE => Ok(Box::new(decompose::DecompositionAnalyzer::new(
            config.clone(),
        ))),
        ANALYZER_PHRASE => Ok(Box::new(phrase::PhraseAnalyzer::new(
            config.clone(),
            base_dir.to_path_buf(),
        ))),
        ANALYZER_LLM => Ok(Box::new(llm::LlmAnalyzer::new(
            config.llm.clone(),
            store,
        )?)),
        other => anyhow::bail!(
            "unknown analyzer '{other}', expected one of: {}",
            analyzer_names().join(", ")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BackendLocal;

    #[test]
    fn test_registry_knows_all_variants() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(BackendLocal::new(tmp.path()).unwrap());
        let config = AnalysisConfig::default();

        for name in analyzer_names() {
            let analyzer = build_analyzer(name, &config, tmp.path(), store.clone());
            assert!(analyzer.is_ok(), "failed to build {name}");
        }
    }

    #[test]
    fn test_registry_rejects_unknown_key() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(BackendLocal::new(tmp.path()).unwrap());

        let result = build_analyzer("bogus", &AnalysisConfig::default(), tmp.path(), store);
        assert!(result.is_err());
    }
}
