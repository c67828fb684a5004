//! Token-frequency keyword extraction, used whenever topic modeling is not
//! viable (too little text, too few segments) or a model fit fails.

use std::collections::HashMap;

use crate::analysis::{AnalysisResult, MAX_RESULT_KEYWORDS};
use crate::analysis::vectorize::Vectorizer;

/// How many candidates are ranked before truncating to the result cap.
const CANDIDATE_POOL: usize = 10;

/// Ranks the vectorizer's tokens by raw frequency and keeps the top five.
/// Never fails: empty or stopword-only input yields an empty result.
pub fn extract_keywords(vectorizer: &Vectorizer, text: &str) -> AnalysisResult {
    let tokens = vectorizer.analyze(text);
    if tokens.is_empty() {
        return AnalysisResult::empty();
    }

    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (pos, token) in tokens.iter().enumerate() {
        let entry = counts.entry(token).or_insert((0, pos));
        entry.0 += 1;
    }

    // Frequency descending, first occurrence as the tie-break so the
    // ranking is deterministic.
    let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then_with(|| a.1 .1.cmp(&b.1 .1)));

    let keywords = ranked
        .into_iter()
        .take(CANDIDATE_POOL)
        .take(MAX_RESULT_KEYWORDS)
        .map(|(token, _)| token.to_string())
        .collect();

    AnalysisResult {
        keywords,
        topics: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VectorizerConfig;

    fn vectorizer() -> Vectorizer {
        Vectorizer::new(VectorizerConfig::default())
    }

    #[test]
    fn test_empty_input_is_safe() {
        let result = extract_keywords(&vectorizer(), "");
        assert!(result.keywords.is_empty());
        assert!(result.topics.is_empty());
    }

    #[test]
    fn test_whitespace_only_input_is_safe() {
        let result = extract_keywords(&vectorizer(), "   \n\t  ");
        assert!(result.is_empty());
    }

    #[test]
    fn test_stopword_only_input_is_safe() {
        let result = extract_keywords(&vectorizer(), "the and of but");
        assert!(result.is_empty());
    }

    #[test]
    fn test_most_frequent_token_ranks_first() {
        let text = "kernel kernel kernel scheduler scheduler driver";
        let result = extract_keywords(&vectorizer(), text);
        assert_eq!(result.keywords[0], "kernel");
        assert_eq!(result.keywords[1], "scheduler");
    }

    #[test]
    fn test_caps_at_five_keywords() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let result = extract_keywords(&vectorizer(), text);
        assert_eq!(result.keywords.len(), MAX_RESULT_KEYWORDS);
    }

    #[test]
    fn test_topics_always_empty() {
        let result = extract_keywords(&vectorizer(), "rust async executors");
        assert!(result.topics.is_empty());
    }
}
