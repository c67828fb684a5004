use serde::{Deserialize, Serialize};

use crate::analysis::{self};
use crate::storage::{BackendLocal, StorageManager};

const DEFAULT_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
const DEFAULT_USER_AGENT: &str = "marktopic/0.1 (bookmark topic analysis)";

/// Count-vectorizer knobs shared by the modeling variants and the fallback
/// extractor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VectorizerConfig {
    /// Terms appearing in fewer documents are dropped.
    #[serde(default = "default_min_df")]
    pub min_df: usize,

    /// Terms appearing in more than this fraction of documents are dropped.
    #[serde(default = "default_max_df")]
    pub max_df: f64,

    #[serde(default = "default_ngram_min")]
    pub ngram_min: usize,
    #[serde(default = "default_ngram_max")]
    pub ngram_max: usize,

    /// Vocabulary cap for the decomposition variant.
    #[serde(default = "default_max_features")]
    pub max_features: usize,
}

impl Default for VectorizerConfig {
    fn default() -> Self {
        VectorizerConfig {
            min_df: default_min_df(),
            max_df: default_max_df(),
            ngram_min: default_ngram_min(),
            ngram_max: default_ngram_max(),
            max_features: default_max_features(),
        }
    }
}

fn default_min_df() -> usize {
    1
}
fn default_max_df() -> f64 {
    0.95
}
fn default_ngram_min() -> usize {
    1
}
fn default_ngram_max() -> usize {
    2
}
fn default_max_features() -> usize {
    20_000
}

/// Hosted-LLM analyzer settings. The endpoint speaks a chat-completion style
/// JSON API; the key falls back to the MARKTOPIC_API_KEY environment variable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Input truncation before the prompt is built.
    #[serde(default = "default_llm_max_words")]
    pub max_words: usize,

    #[serde(default = "default_llm_top_keywords")]
    pub top_keywords: usize,

    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_requests_per_day")]
    pub requests_per_day: u32,
    #[serde(default = "default_tokens_per_minute")]
    pub tokens_per_minute: u64,
    #[serde(default = "default_tokens_per_day")]
    pub tokens_per_day: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            api_key: None,
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            max_words: default_llm_max_words(),
            top_keywords: default_llm_top_keywords(),
            max_retries: default_llm_max_retries(),
            requests_per_minute: default_requests_per_minute(),
            requests_per_day: default_requests_per_day(),
            tokens_per_minute: default_tokens_per_minute(),
            tokens_per_day: default_tokens_per_day(),
        }
    }
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_max_words() -> usize {
    1500
}
fn default_llm_top_keywords() -> usize {
    10
}
fn default_llm_max_retries() -> u32 {
    3
}
// Free-tier shaped defaults.
fn default_requests_per_minute() -> u32 {
    2
}
fn default_requests_per_day() -> u32 {
    50
}
fn default_tokens_per_minute() -> u64 {
    125_000
}
fn default_tokens_per_day() -> u64 {
    1_048_576
}

/// Configuration for the analyzer variants. Assembled once at startup and
/// passed by value into each analyzer's constructor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Smallest cluster that counts as a topic; anything smaller lands in
    /// the outlier bucket.
    #[serde(default = "default_min_topic_size")]
    pub min_topic_size: usize,

    /// Below this many segments the modeling variants take the fallback path.
    #[serde(default = "default_min_segments")]
    pub min_segments_for_modeling: usize,

    /// Fixed component count for the decomposition variant (clamped to the
    /// segment count at fit time).
    #[serde(default = "default_n_topics")]
    pub n_topics: usize,

    #[serde(default = "default_top_n_words")]
    pub top_n_words: usize,

    #[serde(default)]
    pub vectorizer: VectorizerConfig,

    #[serde(default)]
    pub llm: LlmConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            embedding_model: default_embedding_model(),
            min_topic_size: default_min_topic_size(),
            min_segments_for_modeling: default_min_segments(),
            n_topics: default_n_topics(),
            top_n_words: default_top_n_words(),
            vectorizer: VectorizerConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}
fn default_min_topic_size() -> usize {
    2
}
fn default_min_segments() -> usize {
    3
}
fn default_n_topics() -> usize {
    5
}
fn default_top_n_words() -> usize {
    10
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    /// Extracted text is capped at this many words.
    #[serde(default = "default_fetch_max_words")]
    pub max_words: usize,

    /// Politeness delay after each fetch.
    #[serde(default = "default_polite_delay_ms")]
    pub polite_delay_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            timeout_secs: default_fetch_timeout_secs(),
            max_words: default_fetch_max_words(),
            polite_delay_ms: default_polite_delay_ms(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    15
}
fn default_fetch_max_words() -> usize {
    3000
}
fn default_polite_delay_ms() -> u64 {
    250
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Flush the collection and content cache every N processed bookmarks.
    #[serde(default = "default_save_every")]
    pub save_every: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        ProcessorConfig {
            save_every: default_save_every(),
        }
    }
}

fn default_save_every() -> usize {
    20
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinksConfig {
    #[serde(default = "default_link_workers")]
    pub workers: usize,

    #[serde(default = "default_link_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LinksConfig {
    fn default() -> Self {
        LinksConfig {
            workers: default_link_workers(),
            timeout_secs: default_link_timeout_secs(),
        }
    }
}

fn default_link_workers() -> usize {
    20
}
fn default_link_timeout_secs() -> u64 {
    5
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Registry key of the analyzer driving `analyze`.
    #[serde(default = "default_analyzer")]
    pub analyzer: String,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub links: LinksConfig,
}

fn default_analyzer() -> String {
    analysis::ANALYZER_EMBEDDING.to_string()
}

const CONFIG_FILE: &str = "config.yaml";

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        if !analysis::analyzer_names().contains(&self.analyzer.as_str()) {
            anyhow::bail!(
                "analyzer must be one of: {}, got '{}'",
                analysis::analyzer_names().join(", "),
                self.analyzer
            );
        }

        let v = &self.analysis.vectorizer;
        if !(0.0..=1.0).contains(&v.max_df) {
            anyhow::bail!("vectorizer.max_df must be within 0.0..=1.0, got {}", v.max_df);
        }
        if v.ngram_min == 0 || v.ngram_max < v.ngram_min {
            anyhow::bail!(
                "vectorizer ngram range is invalid: ({}, {})",
                v.ngram_min,
                v.ngram_max
            );
        }

        if self.analysis.min_topic_size < 2 {
            anyhow::bail!("analysis.min_topic_size must be at least 2");
        }
        if self.analysis.n_topics < 2 {
            anyhow::bail!("analysis.n_topics must be at least 2");
        }
        if self.processor.save_every == 0 {
            anyhow::bail!("processor.save_every must be greater than 0");
        }
        if self.links.workers == 0 {
            anyhow::bail!("links.workers must be greater than 0");
        }

        Ok(())
    }

    /// Loads config.yaml from the base directory, writing defaults first if
    /// none exists. Unknown keys are ignored; missing keys take defaults.
    pub fn load_with(base_path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let store = BackendLocal::new(base_path)?;

        if !store.exists(CONFIG_FILE) {
            let defaults = serde_yml::to_string(&Self::preset())?;
            store.write(CONFIG_FILE, defaults.as_bytes())?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)?;
        let config: Self = serde_yml::from_str(&config_str)?;

        config.validate()?;

        Ok(config)
    }

    /// Default config with the analyzer key filled in (serde's Default
    /// derives empty strings for flattened string fields).
    fn preset() -> Self {
        Config {
            analyzer: default_analyzer(),
            ..Default::default()
        }
    }
}
