//! Embedding-cluster analyzer: embeds segments, reduces dimensionality with
//! a seeded random projection, clusters by average linkage over cosine
//! distance, and extracts per-cluster terms with class-based TF-IDF.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::analysis::embedder::{EmbedError, FastembedBackend, SegmentEmbedder};
use crate::analysis::vectorize::Vectorizer;
use crate::analysis::{fallback, normalize, segment};
use crate::analysis::{AnalysisResult, Topic, TopicKeyword, MAX_RESULT_KEYWORDS};
use crate::config::AnalysisConfig;

/// Fixed seed so projections (and therefore clusterings) are reproducible
/// within a run configuration.
const PROJECTION_SEED: u64 = 42;

/// Centroid pairs closer than this cosine distance are merged.
const MERGE_DISTANCE: f32 = 0.5;

/// Inputs shorter than this after whitespace normalization skip modeling.
pub(crate) const MIN_TEXT_CHARS: usize = 50;

/// Character count with whitespace runs collapsed to single spaces, i.e.
/// the length the input would have after whitespace normalization.
pub(crate) fn condensed_len(text: &str) -> usize {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0;
    }
    words.iter().map(|w| w.chars().count()).sum::<usize>() + words.len() - 1
}

#[derive(Debug, thiserror::Error)]
pub enum FitError {
    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error("vectorizer produced an empty vocabulary")]
    DegenerateVocabulary,

    #[error("embedding batch size mismatch")]
    ShapeMismatch,
}

/// Target dimensionality and neighborhood size derived from the segment
/// count. Keeps `2 <= n_components <= 5`, `2 <= n_neighbors <= 15`, and
/// `n_components < segment_count`, so tiny inputs cannot produce a
/// degenerate reduction.
pub(crate) fn reduction_params(segment_count: usize) -> (usize, usize) {
    let n_components = 5.min(2.max(segment_count.saturating_sub(2)));
    let n_neighbors = 15.min(2.max(segment_count.saturating_sub(1)));
    (n_components, n_neighbors)
}

pub struct EmbeddingClusterAnalyzer {
    config: AnalysisConfig,
    vectorizer: Vectorizer,
    backend: Box<dyn SegmentEmbedder>,
}

impl EmbeddingClusterAnalyzer {
    pub fn new(config: AnalysisConfig, base_dir: PathBuf) -> Self {
        let backend = Box::new(FastembedBackend::new(&config.embedding_model, base_dir));
        Self::with_backend(config, backend)
    }

    /// Constructor seam for tests: inject a stub embedding backend.
    pub fn with_backend(config: AnalysisConfig, backend: Box<dyn SegmentEmbedder>) -> Self {
        let vectorizer = Vectorizer::new(config.vectorizer.clone());
        EmbeddingClusterAnalyzer {
            config,
            vectorizer,
            backend,
        }
    }

    fn fallback(&self, text: &str) -> AnalysisResult {
        fallback::extract_keywords(&self.vectorizer, text)
    }

    /// Modeling gate: enough segments for the clustering to produce a valid
    /// low-dimensional manifold. Below the threshold a degenerate fit is
    /// expected, not exceptional, so the caller goes straight to fallback.
    fn modeling_viable(&self, segment_count: usize) -> bool {
        segment_count
            >= self
                .config
                .min_segments_for_modeling
                .max(self.config.min_topic_size + 1)
    }

    fn fit_topics(&self, segments: &[String]) -> Result<Vec<Topic>, FitError> {
        let embeddings = self.backend.embed_batch(segments)?;
        if embeddings.len() != segments.len() {
            return Err(FitError::ShapeMismatch);
        }

        let (n_components, n_neighbors) = reduction_params(segments.len());
        log::debug!(
            "clustering {} segments: n_components={n_components} n_neighbors={n_neighbors}",
            segments.len()
        );

        let reduced = random_projection(&embeddings, n_components, PROJECTION_SEED);
        let labels = agglomerate(&reduced, self.config.min_topic_size, n_neighbors);

        let clusters = non_outlier_clusters(&labels);
        if clusters.is_empty() {
            return Ok(vec![]);
        }

        let matrix = self
            .vectorizer
            .fit(segments)
            .ok_or(FitError::DegenerateVocabulary)?;

        let total_assigned: usize = clusters.iter().map(|c| c.len()).sum();
        let mut topics = Vec::with_capacity(clusters.len());
        for (rank, members) in clusters.iter().enumerate() {
            let keywords = class_tfidf_terms(&matrix, &clusters, rank, self.config.top_n_words);
            let representation = keywords.iter().map(|kw| kw.word.clone()).collect();
            topics.push(Topic {
                topic_id: rank as i32,
                probability: members.len() as f64 / total_assigned as f64,
                keywords,
                representation,
            });
        }

        Ok(topics)
    }
}

impl super::Analyzer for EmbeddingClusterAnalyzer {
    fn name(&self) -> &str {
        "embedding-cluster (per-bookmark)"
    }

    fn extract(&self, text: &str, title: &str) -> AnalysisResult {
        // Length gate runs on collapsed whitespace; segmentation still sees
        // the paragraph boundaries of the raw text.
        let clean = text.trim();
        let condensed = condensed_len(clean);
        if condensed < MIN_TEXT_CHARS {
            return self.fallback(if condensed == 0 { title } else { clean });
        }

        let segments = segment::segment(clean);
        if !self.modeling_viable(segments.len()) {
            return self.fallback(clean);
        }

        let topics = match self.fit_topics(&segments) {
            Ok(topics) => topics,
            Err(err) => {
                log::warn!("embedding-cluster fit failed: {err}; falling back to keywords");
                return self.fallback(clean);
            }
        };

        if topics.is_empty() {
            // Every segment landed in the outlier bucket.
            return self.fallback(clean);
        }

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

/// Projects embeddings onto `n_components` gaussian directions. The matrix
/// is seeded, so identical inputs reduce identically.
fn random_projection(embeddings: &[Vec<f32>], n_components: usize, seed: u64) -> Vec<Vec<f32>> {
    let Some(dim) = embeddings.first().map(|e| e.len()) else {
        return vec![];
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let mut directions = Vec::with_capacity(n_components);
    for _ in 0..n_components {
        let direction: Vec<f32> = (0..dim).map(|_| gaussian(&mut rng)).collect();
        directions.push(direction);
    }

    embeddings
        .iter()
        .map(|e| {
            directions
                .iter()
                .map(|d| e.iter().zip(d).map(|(a, b)| a * b).sum())
                .collect()
        })
        .collect()
}

/// Standard normal via Box-Muller.
fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f32 = rng.random::<f32>().max(f32::MIN_POSITIVE);
    let u2: f32 = rng.random();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na * nb)
}

/// Average-linkage agglomeration over cluster centroids. Each step merges
/// the closest centroid pair (candidate search bounded to the
/// `n_neighbors` nearest clusters) while the pair sits under
/// [`MERGE_DISTANCE`]. Clusters smaller than `min_topic_size` end up in the
/// outlier bucket, labeled -1.
fn agglomerate(points: &[Vec<f32>], min_topic_size: usize, n_neighbors: usize) -> Vec<i32> {
    let n = points.len();
    if n == 0 {
        return vec![];
    }

    let mut members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
    let mut centroids: Vec<Vec<f32>> = points.to_vec();

    loop {
        let mut best: Option<(usize, usize, f32)> = None;
        for a in 0..centroids.len() {
            // Bound the candidate scan to the nearest clusters.
            let mut dists: Vec<(usize, f32)> = (0..centroids.len())
                .filter(|&b| b != a)
                .map(|b| (b, cosine_distance(&centroids[a], &centroids[b])))
                .collect();
            dists.sort_by(|x, y| x.1.total_cmp(&y.1));
            for &(b, dist) in dists.iter().take(n_neighbors) {
                if best.map_or(true, |(_, _, d)| dist < d) {
                    best = Some((a.min(b), a.max(b), dist));
                }
            }
        }

        match best {
            Some((a, b, dist)) if dist <= MERGE_DISTANCE => {
                let merged_members = {
                    let mut m = members.remove(b);
                    members[a].append(&mut m);
                    members[a].clone()
                };
                centroids.remove(b);
                centroids[a] = centroid(points, &merged_members);
            }
            _ => break,
        }
    }

    // Largest clusters take the lowest ids; undersized ones are outliers.
    let mut order: Vec<usize> = (0..members.len()).collect();
    order.sort_by(|&a, &b| members[b].len().cmp(&members[a].len()));

    let mut labels = vec![-1i32; n];
    let mut next_id = 0;
    for idx in order {
        if members[idx].len() < min_topic_size {
            continue;
        }
        for &point in &members[idx] {
            labels[point] = next_id;
        }
        next_id += 1;
    }

    labels
}

fn centroid(points: &[Vec<f32>], members: &[usize]) -> Vec<f32> {
    let dim = points[members[0]].len();
    let mut out = vec![0.0f32; dim];
    for &m in members {
        for (o, v) in out.iter_mut().zip(&points[m]) {
            *o += v;
        }
    }
    let k = members.len() as f32;
    for o in &mut out {
        *o /= k;
    }
    out
}

/// Member indices per non-outlier cluster, ordered by cluster id (which is
/// already size-descending).
fn non_outlier_clusters(labels: &[i32]) -> Vec<Vec<usize>> {
    let max_label = labels.iter().copied().max().unwrap_or(-1);
    if max_label < 0 {
        return vec![];
    }

    let mut clusters = vec![Vec::new(); (max_label + 1) as usize];
    for (i, &label) in labels.iter().enumerate() {
        if label >= 0 {
            clusters[label as usize].push(i);
        }
    }
    clusters
}

/// Class-based TF-IDF: a term scores highly in a cluster when it is
/// frequent inside the cluster and rare across the others.
fn class_tfidf_terms(
    matrix: &crate::analysis::vectorize::DocTermMatrix,
    clusters: &[Vec<usize>],
    cluster: usize,
    top_n: usize,
) -> Vec<TopicKeyword> {
    let n_terms = matrix.n_terms();

    let mut class_tf: Vec<Vec<f64>> = Vec::with_capacity(clusters.len());
    for members in clusters {
        let mut tf = vec![0.0f64; n_terms];
        for &doc in members {
            for (t, &count) in matrix.counts[doc].iter().enumerate() {
                tf[t] += count;
            }
        }
        class_tf.push(tf);
    }

    let total_per_term: Vec<f64> = (0..n_terms)
        .map(|t| class_tf.iter().map(|tf| tf[t]).sum())
        .collect();
    let avg_class_mass: f64 = class_tf
        .iter()
        .map(|tf| tf.iter().sum::<f64>())
        .sum::<f64>()
        / clusters.len() as f64;

    let mut scored: Vec<(usize, f64)> = (0..n_terms)
        .filter(|&t| class_tf[cluster][t] > 0.0)
        .map(|t| {
            let idf = (1.0 + avg_class_mass / total_per_term[t].max(1.0)).ln();
            (t, class_tf[cluster][t] * idf)
        })
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

    #[test]
    fn test_reduction_params_bounds() {
        for n in [3usize, 5, 20, 500] {
            let (n_components, n_neighbors) = reduction_params(n);
            assert!((2..=5).contains(&n_components), "n={n}");
            assert!((2..=15).contains(&n_neighbors), "n={n}");
            assert!(n_components < n, "n_components must stay below n={n}");
        }
    }

    #[test]
    fn test_reduction_params_boundary_cases() {
        // The formulas are only loosely safe for very small n; pin the
        // boundary behavior explicitly.
        assert_eq!(reduction_params(3), (2, 2));
        assert_eq!(reduction_params(4), (2, 3));
        assert_eq!(reduction_params(5), (3, 4));
        assert_eq!(reduction_params(7), (5, 6));
        assert_eq!(reduction_params(20), (5, 15));
    }

    #[test]
    fn test_condensed_len_collapses_whitespace_runs() {
        assert_eq!(condensed_len(""), 0);
        assert_eq!(condensed_len("   \n\t "), 0);
        assert_eq!(condensed_len("one two"), 7);
        // Runs of whitespace count as a single separator.
        assert_eq!(condensed_len("one \n\n  two\t\tthree"), 13);
    }

    #[test]
    fn test_random_projection_deterministic() {
        let embeddings = vec![vec![1.0, 0.0, 0.5, -0.25], vec![0.0, 1.0, -0.5, 0.25]];
        let a = random_projection(&embeddings, 2, PROJECTION_SEED);
        let b = random_projection(&embeddings, 2, PROJECTION_SEED);
        assert_eq!(a, b);
    }

    #[test]
    fn test_random_projection_shape() {
        let embeddings = vec![vec![0.5; 16]; 6];
        let reduced = random_projection(&embeddings, 3, 1);
        assert_eq!(reduced.len(), 6);
        assert!(reduced.iter().all(|r| r.len() == 3));
    }

    #[test]
    fn test_agglomerate_two_opposed_groups() {
        // Two anti-parallel directions with mild scaling noise: any sane
        // threshold separates them.
        let mut points = Vec::new();
        for i in 0..4 {
            points.push(vec![1.0 + 0.01 * i as f32, 0.02 * i as f32]);
        }
        for i in 0..4 {
            points.push(vec![-1.0 - 0.01 * i as f32, -0.02 * i as f32]);
        }

        let labels = agglomerate(&points, 2, 15);
        assert!(labels.iter().all(|&l| l >= 0));
        assert_eq!(labels[0..4].iter().collect::<std::collections::HashSet<_>>().len(), 1);
        assert_eq!(labels[4..8].iter().collect::<std::collections::HashSet<_>>().len(), 1);
        assert_ne!(labels[0], labels[4]);
    }

    #[test]
    fn test_agglomerate_undersized_cluster_is_outlier() {
        let points = vec![
            vec![1.0, 0.0],
            vec![1.01, 0.01],
            vec![0.99, -0.01],
            // Lone opposed point cannot reach min_topic_size=2.
            vec![-1.0, 0.0],
        ];
        let labels = agglomerate(&points, 2, 15);
        assert_eq!(labels[3], -1);
        assert!(labels[0] >= 0 && labels[0] == labels[1] && labels[1] == labels[2]);
    }

    #[test]
    fn test_non_outlier_clusters_skips_outliers() {
        let clusters = non_outlier_clusters(&[0, 0, -1, 1, 0]);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0], vec![0, 1, 4]);
        assert_eq!(clusters[1], vec![3]);
    }

    #[test]
    fn test_non_outlier_clusters_all_outliers() {
        assert!(non_outlier_clusters(&[-1, -1]).is_empty());
    }
}
