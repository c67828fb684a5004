//! Count-vectorizer family shared by the modeling variants and the fallback
//! extractor: one tokenizer (stopwords, token pattern, n-grams) and a
//! document-term matrix builder with document-frequency bounds.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::VectorizerConfig;

/// Alphabetic tokens of at least two characters, internal hyphens allowed.
static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[a-z][a-z\-]+\b").unwrap());

/// English stopwords removed before n-gram formation.
pub const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an",
    "and", "any", "are", "as", "at", "be", "because", "been", "before", "being",
    "below", "between", "both", "but", "by", "can", "cannot", "could", "did", "do",
    "does", "doing", "down", "during", "each", "etc", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "herself", "him", "himself", "his", "how", "however", "i", "if", "in", "into",
    "is", "it", "its", "itself", "just", "may", "me", "might", "more", "most",
    "must", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "onto", "or", "other", "our", "ours", "ourselves", "out", "over",
    "own", "per", "same", "shall", "she", "should", "so", "some", "such", "than",
    "that", "the", "their", "theirs", "them", "themselves", "then", "there",
    "these", "they", "this", "those", "through", "to", "too", "under", "until",
    "up", "upon", "us", "very", "was", "we", "were", "what", "when", "where",
    "which", "while", "who", "whom", "why", "will", "with", "within", "without",
    "would", "you", "your", "yours", "yourself", "yourselves",
];

fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Document-term count matrix. `counts[doc][term]` follows `vocab` order.
pub struct DocTermMatrix {
    pub vocab: Vec<String>,
    pub counts: Vec<Vec<f64>>,
}

impl DocTermMatrix {
    pub fn n_docs(&self) -> usize {
        self.counts.len()
    }

    pub fn n_terms(&self) -> usize {
        self.vocab.len()
    }
}

#[derive(Clone)]
pub struct Vectorizer {
    config: VectorizerConfig,
}

impl Vectorizer {
    pub fn new(config: VectorizerConfig) -> Self {
        Vectorizer { config }
    }

    /// Lowercased word tokens with stopwords removed, before n-gram
    /// formation.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        TOKEN
            .find_iter(&lower)
            .map(|m| m.as_str().to_string())
            .filter(|t| !is_stop_word(t))
            .collect()
    }

    /// Full analyzer: tokens expanded into the configured n-gram range,
    /// joined with single spaces.
    pub fn analyze(&self, text: &str) -> Vec<String> {
        self.ngrams(text, self.config.ngram_min, self.config.ngram_max)
    }

    pub fn ngrams(&self, text: &str, ngram_min: usize, ngram_max: usize) -> Vec<String> {
        let tokens = self.tokenize(text);
        let mut out = Vec::new();
        for n in ngram_min..=ngram_max {
            if n == 0 || n > tokens.len() {
                continue;
            }
            for window in tokens.windows(n) {
                out.push(window.join(" "));
            }
        }
        out
    }

    /// Builds a document-term matrix over `docs`, honoring `min_df` (absolute
    /// document count), `max_df` (fraction of documents), and
    /// `max_features` (kept by descending total frequency). Returns `None`
    /// when the bounds leave an empty vocabulary.
    pub fn fit(&self, docs: &[String]) -> Option<DocTermMatrix> {
        if docs.is_empty() {
            return None;
        }

        let analyzed: Vec<Vec<String>> = docs.iter().map(|d| self.analyze(d)).collect();

        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        let mut total_freq: HashMap<&str, usize> = HashMap::new();
        for doc in &analyzed {
            let mut seen = std::collections::HashSet::new();
            for term in doc {
                *total_freq.entry(term).or_default() += 1;
                if seen.insert(term.as_str()) {
                    *doc_freq.entry(term).or_default() += 1;
                }
            }
        }

        // min_df is an absolute document count; max_df a fraction of the
        // corpus. Over-aggressive pruning yields None and the caller degrades.
        let max_doc_count = self.config.max_df * docs.len() as f64;
        let mut kept: Vec<(&str, usize)> = doc_freq
            .iter()
            .filter(|(_, &df)| df >= self.config.min_df && df as f64 <= max_doc_count)
            .map(|(&term, _)| (term, total_freq[term]))
            .collect();

        // Highest-frequency terms first; ties broken alphabetically so the
        // vocabulary is deterministic.
        kept.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        kept.truncate(self.config.max_features);

        if kept.is_empty() {
            return None;
        }

        let mut vocab: Vec<String> = kept.iter().map(|(t, _)| t.to_string()).collect();
        vocab.sort();
        let index: HashMap<&str, usize> = vocab
            .iter()
            .enumerate()
            .map(|(i, t)| (t.as_str(), i))
            .collect();

        let counts = analyzed
            .iter()
            .map(|doc| {
                let mut row = vec![0.0; vocab.len()];
                for term in doc {
                    if let Some(&i) = index.get(term.as_str()) {
                        row[i] += 1.0;
                    }
                }
                row
            })
            .collect();

        Some(DocTermMatrix { vocab, counts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vectorizer() -> Vectorizer {
        Vectorizer::new(VectorizerConfig::default())
    }

    #[test]
    fn test_stop_words_sorted_for_binary_search() {
        let mut sorted = STOP_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, STOP_WORDS);
    }

    #[test]
    fn test_tokenize_filters_stop_words_and_short_tokens() {
        let tokens = vectorizer().tokenize("The quick brown fox is a fox");
        assert_eq!(tokens, vec!["quick", "brown", "fox", "fox"]);
    }

    #[test]
    fn test_tokenize_rejects_digits_and_single_chars() {
        let tokens = vectorizer().tokenize("version 42 of x y zz");
        assert_eq!(tokens, vec!["version", "zz"]);
    }

    #[test]
    fn test_tokenize_keeps_internal_hyphens() {
        let tokens = vectorizer().tokenize("state-of-the-art models");
        assert_eq!(tokens, vec!["state-of-the-art", "models"]);
    }

    #[test]
    fn test_analyze_produces_bigrams() {
        let grams = vectorizer().analyze("database indexing strategies");
        assert!(grams.contains(&"database indexing".to_string()));
        assert!(grams.contains(&"indexing strategies".to_string()));
        assert!(grams.contains(&"database".to_string()));
    }

    #[test]
    fn test_fit_counts_terms() {
        let docs = vec![
            "cats purr and cats sleep".to_string(),
            "databases index rows".to_string(),
        ];
        let matrix = vectorizer().fit(&docs).unwrap();

        assert_eq!(matrix.n_docs(), 2);
        let cats = matrix.vocab.iter().position(|t| t == "cats").unwrap();
        assert_eq!(matrix.counts[0][cats], 2.0);
        assert_eq!(matrix.counts[1][cats], 0.0);
    }

    #[test]
    fn test_fit_min_df_drops_rare_terms() {
        let config = VectorizerConfig {
            min_df: 2,
            ..Default::default()
        };
        let docs = vec![
            "shared rare".to_string(),
            "shared common".to_string(),
            "unrelated filler".to_string(),
        ];
        let matrix = Vectorizer::new(config).fit(&docs).unwrap();
        assert_eq!(matrix.vocab, vec!["shared"]);
    }

    #[test]
    fn test_fit_max_features_caps_vocabulary() {
        let config = VectorizerConfig {
            max_features: 2,
            ngram_max: 1,
            max_df: 1.0,
            ..Default::default()
        };
        let docs = vec!["alpha beta gamma alpha beta alpha".to_string()];
        let matrix = Vectorizer::new(config).fit(&docs).unwrap();
        assert_eq!(matrix.vocab, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_fit_empty_docs_returns_none() {
        assert!(vectorizer().fit(&[]).is_none());
        assert!(vectorizer().fit(&["".to_string()]).is_none());
        assert!(vectorizer().fit(&["the a of".to_string()]).is_none());
    }
}
