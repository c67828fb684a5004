//! Coerces every analyzer variant's raw output into the canonical
//! [`AnalysisResult`] shape: uniform caps, uniform ordering, representation
//! kept in sync with the keyword list.

use crate::analysis::{AnalysisResult, Topic, TopicKeyword, MAX_RESULT_KEYWORDS};

/// Enforces the result invariants regardless of which model vocabulary
/// (counts, masses, similarities) produced the input:
/// - at most five result keywords
/// - at most `top_n_words` keywords per topic
/// - probabilities clamped into [0, 1]
/// - topics sorted by probability descending
/// - `representation[i] == keywords[i].word`
pub fn normalize(mut result: AnalysisResult, top_n_words: usize) -> AnalysisResult {
    result.keywords.truncate(MAX_RESULT_KEYWORDS);

    for topic in &mut result.topics {
        topic.probability = topic.probability.clamp(0.0, 1.0);
        topic.keywords.truncate(top_n_words);
        topic.representation = topic.keywords.iter().map(|kw| kw.word.clone()).collect();
    }

    result
        .topics
        .sort_by(|a, b| b.probability.total_cmp(&a.probability));

    result
}

/// Turns label-only topics (the hosted-LLM variant) into canonical topics:
/// equal probability shares, the label itself as the single keyword.
pub fn topics_from_labels(labels: &[String]) -> Vec<Topic> {
    if labels.is_empty() {
        return vec![];
    }

    let share = 1.0 / labels.len() as f64;
    labels
        .iter()
        .enumerate()
        .map(|(i, label)| Topic {
            topic_id: i as i32,
            probability: share,
            keywords: vec![TopicKeyword {
                word: label.clone(),
                score: 1.0,
            }],
            representation: vec![label.clone()],
        })
        .collect()
}
