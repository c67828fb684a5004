//! Decomposition analyzer: factorizes the segment/term count matrix into
//! non-negative topic components via multiplicative updates. Cheaper than
//! the embedding-cluster variant and fully offline, at the cost of purely
//! count-based topics.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::analysis::vectorize::{DocTermMatrix, Vectorizer};
use crate::analysis::{fallback, normalize, segment};
use crate::analysis::{AnalysisResult, Topic, TopicKeyword, MAX_RESULT_KEYWORDS};
use crate::config::AnalysisConfig;

const FACTORIZATION_SEED: u64 = 42;
const UPDATE_ITERATIONS: usize = 200;
const EPS: f64 = 1e-9;

pub struct DecompositionAnalyzer {
    config: AnalysisConfig,
    vectorizer: Vectorizer,
}

impl DecompositionAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        let vectorizer = Vectorizer::new(config.vectorizer.clone());
        DecompositionAnalyzer { config, vectorizer }
    }

    fn fallback(&self, text: &str) -> AnalysisResult {
        fallback::extract_keywords(&self.vectorizer, text)
    }

    fn modeling_viable(&self, segment_count: usize) -> bool {
        segment_count
            >= self
                .config
                .min_segments_for_modeling
                .max(self.config.min_topic_size + 1)
    }

    /// The component count never exceeds the configured topic count and is
    /// clamped so a handful of segments cannot request more components than
    /// the matrix supports.
    pub(crate) fn component_count(&self, segment_count: usize) -> usize {
        self.config
            .n_topics
            .min(2.max(segment_count.saturating_sub(1)))
    }

    fn fit_topics(&self, segments: &[String]) -> Option<Vec<Topic>> {
        let matrix = self.vectorizer.fit(segments)?;
        if matrix.n_terms() < 2 {
            return None;
        }

        let k = self.component_count(segments.len());
        let (doc_topic, topic_term) = factorize(&matrix, k, FACTORIZATION_SEED);

        // Topic mass: how much of the corpus each component explains.
        let masses: Vec<f64> = (0..k)
            .map(|t| doc_topic.iter().map(|row| row[t]).sum())
            .collect();
        let total_mass: f64 = masses.iter().sum();
        if total_mass <= EPS {
            return Some(vec![]);
        }

        let mut ranked: Vec<usize> = (0..k).collect();
        ranked.sort_by(|&a, &b| masses[b].total_cmp(&masses[a]));

        let mut topics = Vec::with_capacity(k);
        for (rank, &component) in ranked.iter().enumerate() {
            if masses[component] <= EPS {
                continue;
            }
            let keywords = top_terms(&topic_term[component], &matrix, self.config.top_n_words);
            if keywords.is_empty() {
                continue;
            }
            let representation = keywords.iter().map(|kw| kw.word.clone()).collect();
            topics.push(Topic {
                topic_id: rank as i32,
                probability: masses[component] / total_mass,
                keywords,
                representation,
            });
        }

        Some(topics)
    }
}

impl super::Analyzer for DecompositionAnalyzer {
    fn name(&self) -> &str {
        "decomposition (per-bookmark)"
    }

    fn extract(&self, text: &str, title: &str) -> AnalysisResult {
        // Length gate runs on collapsed whitespace; segmentation still sees
        // the paragraph boundaries of the raw text.
        let clean = text.trim();
        let condensed = super::embedding::condensed_len(clean);
        if condensed < super::embedding::MIN_TEXT_CHARS {
            return self.fallback(if condensed == 0 { title } else { clean });
        }

        let segments = segment::segment(clean);
        if !self.modeling_viable(segments.len()) {
            return self.fallback(clean);
        }

        let topics = match self.fit_topics(&segments) {
            Some(topics) if !topics.is_empty() => topics,
            _ => return self.fallback(clean),
        };

        let keywords = topics[0]
            .representation
            .iter()
            .take(MAX_RESULT_KEYWORDS)
            .cloned()
            .collect();

        normalize::normalize(
            AnalysisResult { keywords, topics },
            self.config.top_n_words,
        )
    }
}

/// Non-negative factorization `V ~= W * H` with `k` components, seeded
/// uniform init, Frobenius multiplicative updates. Returns `(W, H)` as
/// row-major doc/topic and topic/term matrices.
fn factorize(matrix: &DocTermMatrix, k: usize, seed: u64) -> (Vec<Vec<f64>>, Vec<Vec<f64>>) {
    let n_docs = matrix.n_docs();
    let n_terms = matrix.n_terms();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut w: Vec<Vec<f64>> = (0..n_docs)
        .map(|_| (0..k).map(|_| rng.random::<f64>() + EPS).collect())
        .collect();
    let mut h: Vec<Vec<f64>> = (0..k)
        .map(|_| (0..n_terms).map(|_| rng.random::<f64>() + EPS).collect())
        .collect();

    for _ in 0..UPDATE_ITERATIONS {
        // H <- H * (W^T V) / (W^T W H)
        let wt_v = mat_tmul(&w, &matrix.counts, k, n_terms);
        let wt_w = gram(&w, k);
        let wt_w_h = mul(&wt_w, &h, k, n_terms);
        for t in 0..k {
            for j in 0..n_terms {
                h[t][j] *= wt_v[t][j] / (wt_w_h[t][j] + EPS);
            }
        }

        // W <- W * (V H^T) / (W H H^T)
        let v_ht = mul_bt(&matrix.counts, &h, n_docs, k);
        let h_ht = gram_rows(&h, k);
        let w_h_ht = mul(&w, &h_ht, n_docs, k);
        for d in 0..n_docs {
            for t in 0..k {
                w[d][t] *= v_ht[d][t] / (w_h_ht[d][t] + EPS);
            }
        }
    }

    (w, h)
}

/// `A^T * B` where A is (n x k) and B is (n x m); result is (k x m).
fn mat_tmul(a: &[Vec<f64>], b: &[Vec<f64>], k: usize, m: usize) -> Vec<Vec<f64>> {
    let mut out = vec![vec![0.0; m]; k];
    for (a_row, b_row) in a.iter().zip(b) {
        for (t, &av) in a_row.iter().enumerate() {
            if av == 0.0 {
                continue;
            }
            for (j, &bv) in b_row.iter().enumerate() {
                out[t][j] += av * bv;
            }
        }
    }
    out
}

/// `A^T * A` for A of shape (n x k).
fn gram(a: &[Vec<f64>], k: usize) -> Vec<Vec<f64>> {
    let mut out = vec![vec![0.0; k]; k];
    for row in a {
        for i in 0..k {
            for j in 0..k {
                out[i][j] += row[i] * row[j];
            }
        }
    }
    out
}

/// `H * H^T` for H of shape (k x m).
fn gram_rows(h: &[Vec<f64>], k: usize) -> Vec<Vec<f64>> {
    let mut out = vec![vec![0.0; k]; k];
    for i in 0..k {
        for j in 0..k {
            out[i][j] = h[i].iter().zip(&h[j]).map(|(x, y)| x * y).sum();
        }
    }
    out
}

/// `A * B` where A is (n x k) and B is (k x m).
fn mul(a: &[Vec<f64>], b: &[Vec<f64>], n: usize, m: usize) -> Vec<Vec<f64>> {
    let mut out = vec![vec![0.0; m]; n];
    for (out_row, a_row) in out.iter_mut().zip(a) {
        for (t, &av) in a_row.iter().enumerate() {
            if av == 0.0 {
                continue;
            }
            for (j, &bv) in b[t].iter().enumerate() {
                out_row[j] += av * bv;
            }
        }
    }
    out
}

/// `A * B^T` where A is (n x m) and B is (k x m); result is (n x k).
fn mul_bt(a: &[Vec<f64>], b: &[Vec<f64>], n: usize, k: usize) -> Vec<Vec<f64>> {
    let mut out = vec![vec![0.0; k]; n];
    for (out_row, a_row) in out.iter_mut().zip(a) {
        for (t, b_row) in b.iter().enumerate() {
            out_row[t] = a_row.iter().zip(b_row).map(|(x, y)| x * y).sum();
        }
    }
    out
}

fn top_terms(weights: &[f64], matrix: &DocTermMatrix, top_n: usize) -> Vec<TopicKeyword> {
    let mut scored: Vec<(usize, f64)> = weights
        .iter()
        .enumerate()
        .filter(|(_, &w)| w > EPS)
        .map(|(t, &w)| (t, w))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    scored
        .into_iter()
        .take(top_n)
        .map(|(t, score)| TopicKeyword {
            word: matrix.vocab[t].clone(),
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analyzer;
    use crate::config::VectorizerConfig;

    fn analyzer() -> DecompositionAnalyzer {
        let mut config = AnalysisConfig::default();
        config.vectorizer = VectorizerConfig {
            max_df: 1.0,
            ..VectorizerConfig::default()
        };
        DecompositionAnalyzer::new(config)
    }

    #[test]
    fn test_component_count_clamps_to_segments() {
        let a = analyzer();
        assert_eq!(a.component_count(3), 2);
        assert_eq!(a.component_count(4), 3);
        assert_eq!(a.component_count(100), a.config.n_topics);
    }

    #[test]
    fn test_factorize_deterministic() {
        let matrix = DocTermMatrix {
            vocab: vec!["alpha".into(), "beta".into(), "gamma".into()],
            counts: vec![
                vec![3.0, 0.0, 1.0],
                vec![0.0, 4.0, 0.0],
                vec![2.0, 0.0, 2.0],
            ],
        };
        let (w1, h1) = factorize(&matrix, 2, FACTORIZATION_SEED);
        let (w2, h2) = factorize(&matrix, 2, FACTORIZATION_SEED);
        assert_eq!(w1, w2);
        assert_eq!(h1, h2);
    }

    #[test]
    fn test_extract_short_text_uses_fallback() {
        let a = analyzer();
        let result = a.extract("tiny rust note", "");
        assert!(result.topics.is_empty());
        assert!(result.keywords.contains(&"rust".to_string()));
    }

    #[test]
    fn test_extract_whitespace_padded_short_text_uses_fallback() {
        let a = analyzer();
        let text = "rust      macros\n\n\n\n     and        hygiene      \t\t   explained";
        assert!(text.chars().count() > 50);

        let result = a.extract(text, "");
        assert!(result.topics.is_empty());
        assert!(result.keywords.contains(&"rust".to_string()));
    }

    #[test]
    fn test_extract_empty_text_uses_title() {
        let a = analyzer();
        let result = a.extract("", "database indexing primer");
        assert!(result.keywords.contains(&"database".to_string()));
    }

    fn two_theme_text() -> String {
        [
            "Simmer the tomato sauce slowly and season the pasta generously with salt. \
             Fresh basil and minced garlic lift the tomato sauce, while well salted water \
             keeps the pasta from sticking together during the long slow simmer on the stove.",
            "The kernel scheduler balances runnable threads across processor cores. \
             Preemption lets the scheduler interrupt a running thread so that other \
             threads make progress, and the kernel tracks runqueue latency for every core.",
            "Taste the sauce before serving and adjust the seasoning with more salt or a \
             pinch of sugar. Leftover pasta reheats well when a spoonful of the tomato \
             sauce is stirred through it, and grated cheese binds everything together.",
            "Interrupt handling stays outside the scheduler hot path so that device \
             drivers never delay a context switch. Load balancing migrates threads \
             between cores when one runqueue grows deeper than its neighbors.",
        ]
        .join("\n\n")
    }

    #[test]
    fn test_extract_two_themes_produces_topics() {
        let a = analyzer();
        let result = a.extract(&two_theme_text(), "");
        assert!(!result.topics.is_empty());
        assert!(result.keywords.len() <= MAX_RESULT_KEYWORDS);
        let total: f64 = result.topics.iter().map(|t| t.probability).sum();
        assert!(total <= 1.0 + 1e-9);
    }

    #[test]
    fn test_topic_probabilities_sorted_descending() {
        let a = analyzer();
        let result = a.extract(&two_theme_text(), "");
        assert!(!result.topics.is_empty());
        for pair in result.topics.windows(2) {
            assert!(pair[0].probability >= pair[1].probability);
        }
    }
}
