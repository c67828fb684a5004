//! Phrase-extraction analyzer: embeds the whole document plus candidate
//! 1-3 gram phrases and keeps the candidates most similar to the document.
//! Produces keywords only, never topics.

use std::path::PathBuf;

use crate::analysis::embedder::{FastembedBackend, SegmentEmbedder};
use crate::analysis::vectorize::Vectorizer;
use crate::analysis::{fallback, AnalysisResult, MAX_RESULT_KEYWORDS};
use crate::config::AnalysisConfig;

/// Candidate phrases beyond this cap are dropped in first-seen order; a
/// single embedding batch stays bounded no matter the page size.
const MAX_CANDIDATES: usize = 400;

const NGRAM_MIN: usize = 1;
const NGRAM_MAX: usize = 3;

pub struct PhraseAnalyzer {
    vectorizer: Vectorizer,
    backend: Box<dyn SegmentEmbedder>,
}

impl PhraseAnalyzer {
    pub fn new(config: AnalysisConfig, base_dir: PathBuf) -> Self {
        let backend = Box::new(FastembedBackend::new(&config.embedding_model, base_dir));
        Self::with_backend(config, backend)
    }

    /// Constructor seam for tests: inject a stub embedding backend.
    pub fn with_backend(config: AnalysisConfig, backend: Box<dyn SegmentEmbedder>) -> Self {
        PhraseAnalyzer {
            vectorizer: Vectorizer::new(config.vectorizer.clone()),
            backend,
        }
    }

    fn fallback(&self, text: &str) -> AnalysisResult {
        fallback::extract_keywords(&self.vectorizer, text)
    }

    /// Unique candidate phrases in first-seen order, capped.
    fn candidates(&self, text: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for gram in self.vectorizer.ngrams(text, NGRAM_MIN, NGRAM_MAX) {
            if seen.insert(gram.clone()) {
                out.push(gram);
                if out.len() >= MAX_CANDIDATES {
                    break;
                }
            }
        }
        out
    }

    fn rank_candidates(&self, text: &str, candidates: Vec<String>) -> Option<Vec<String>> {
        let mut batch = Vec::with_capacity(candidates.len() + 1);
        batch.push(text.to_string());
        batch.extend(candidates.iter().cloned());

        let embeddings = match self.backend.embed_batch(&batch) {
            Ok(embeddings) => embeddings,
            Err(err) => {
                log::warn!("phrase embedding failed: {err}; falling back to keywords");
                return None;
            }
        };
        if embeddings.len() != batch.len() {
            return None;
        }

        let doc = &embeddings[0];
        let mut scored: Vec<(usize, f32)> = candidates
            .iter()
            .enumerate()
            .map(|(i, _)| (i, cosine_similarity(doc, &embeddings[i + 1])))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        Some(
            scored
                .into_iter()
                .take(MAX_RESULT_KEYWORDS)
                .map(|(i, _)| candidates[i].clone())
                .collect(),
        )
    }
}

impl super::Analyzer for PhraseAnalyzer {
    fn name(&self) -> &str {
        "phrase-extraction (per-bookmark)"
    }

    fn extract(&self, text: &str, title: &str) -> AnalysisResult {
        let clean = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if clean.is_empty() || clean.chars().count() < super::embedding::MIN_TEXT_CHARS {
            return self.fallback(if clean.is_empty() { title } else { &clean });
        }

        let candidates = self.candidates(&clean);
        if candidates.is_empty() {
            return self.fallback(&clean);
        }

        match self.rank_candidates(&clean, candidates) {
            Some(keywords) => AnalysisResult {
                keywords,
                topics: vec![],
            },
            None => self.fallback(&clean),
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}
