//! Hosted-LLM analyzer: asks a chat-completion endpoint for topic labels
//! and keywords, behind a persisted usage gate so a long batch run cannot
//! blow through request or token quotas. Quota refusals and missing
//! credentials produce an empty result; they are never retried.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::analysis::{normalize, AnalysisResult, MAX_RESULT_KEYWORDS};
use crate::config::LlmConfig;
use crate::storage::StorageManager;

const USAGE_IDENT: &str = "llm_usage.json";
const API_KEY_ENV: &str = "MARKTOPIC_API_KEY";

const DAY_SECS: u64 = 86_400;
const MINUTE_SECS: u64 = 60;

/// Most topic labels a single response may contribute.
const MAX_TOPIC_LABELS: usize = 3;

/// Rough chars-per-token ratio used to estimate prompt cost before sending.
const CHARS_PER_TOKEN: u64 = 4;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("endpoint returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("response contained no parsable JSON object")]
    NoJson,
}

/// One rolling quota window. `start` is epoch seconds; counters reset when
/// the window elapses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Window {
    start: u64,
    requests: u32,
    tokens: u64,
}

impl Window {
    fn refresh(&mut self, now: u64, span: u64) {
        if now.saturating_sub(self.start) >= span {
            self.start = now;
            self.requests = 0;
            self.tokens = 0;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UsageState {
    day: Window,
    minute: Window,
}

/// Persisted request/token accounting over day and minute windows. State
/// survives process restarts via the storage backend, so daily quotas hold
/// across separate runs.
pub struct UsageGate {
    config: LlmConfig,
    store: Arc<dyn StorageManager>,
    state: Mutex<UsageState>,
}

impl UsageGate {
    pub fn new(config: LlmConfig, store: Arc<dyn StorageManager>) -> Self {
        let state = match store.read(USAGE_IDENT) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                log::warn!("discarding unreadable usage state: {err}");
                UsageState::default()
            }),
            Err(_) => UsageState::default(),
        };
        UsageGate {
            config,
            store,
            state: Mutex::new(state),
        }
    }

    /// Reserves one request and `estimated_tokens` against every window.
    /// Returns false without mutating anything when a limit would be
    /// exceeded.
    pub fn try_acquire(&self, estimated_tokens: u64) -> bool {
        self.try_acquire_at(estimated_tokens, epoch_now())
    }

    fn try_acquire_at(&self, estimated_tokens: u64, now: u64) -> bool {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.day.refresh(now, DAY_SECS);
        state.minute.refresh(now, MINUTE_SECS);

        let fits = state.day.requests < self.config.requests_per_day
            && state.minute.requests < self.config.requests_per_minute
            && state.day.tokens + estimated_tokens <= self.config.tokens_per_day
            && state.minute.tokens + estimated_tokens <= self.config.tokens_per_minute;
        if !fits {
            return false;
        }

        state.day.requests += 1;
        state.minute.requests += 1;
        state.day.tokens += estimated_tokens;
        state.minute.tokens += estimated_tokens;
        self.persist(&state);
        true
    }

    /// Adds tokens the estimate missed, once the endpoint reports actual
    /// usage.
    pub fn record_extra_tokens(&self, extra: u64) {
        if extra == 0 {
            return;
        }
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.day.tokens += extra;
        state.minute.tokens += extra;
        self.persist(&state);
    }

    fn persist(&self, state: &UsageState) {
        match serde_json::to_vec_pretty(state) {
            Ok(bytes) => {
                if let Err(err) = self.store.write(USAGE_IDENT, &bytes) {
                    log::warn!("failed to persist llm usage state: {err}");
                }
            }
            Err(err) => log::warn!("failed to serialize llm usage state: {err}"),
        }
    }
}

fn epoch_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub struct LlmAnalyzer {
    config: LlmConfig,
    gate: UsageGate,
    client: reqwest::blocking::Client,
}

impl LlmAnalyzer {
    pub fn new(config: LlmConfig, store: Arc<dyn StorageManager>) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        let gate = UsageGate::new(config.clone(), store);
        Ok(LlmAnalyzer {
            config,
            gate,
            client,
        })
    }

    fn api_key(&self) -> Option<String> {
        self.config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
    }

    fn build_prompt(&self, text: &str, title: &str) -> String {
        let words: Vec<&str> = text.split_whitespace().collect();
        let truncated = if words.len() > self.config.max_words {
            words[..self.config.max_words].join(" ")
        } else {
            words.join(" ")
        };

        format!(
            "Analyze the following web page content and respond with a single JSON \
             object of the form {{\"topics\": [...], \"keywords\": [...]}}. \
             \"topics\" holds at most {MAX_TOPIC_LABELS} short topic labels, \
             \"keywords\" holds at most {} lowercase keywords. Respond with JSON only.\n\n\
             Title: {title}\n\nContent:\n{truncated}",
            self.config.top_keywords
        )
    }

    fn request(&self, api_key: &str, prompt: &str) -> Result<(String, Option<ChatUsage>), LlmError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.2,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()?;
        if !response.status().is_success() {
            return Err(LlmError::Status(response.status()));
        }

        let parsed: ChatResponse = response.json()?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(LlmError::NoJson)?;
        Ok((content, parsed.usage))
    }

    fn request_with_retries(
        &self,
        api_key: &str,
        prompt: &str,
    ) -> Result<(String, Option<ChatUsage>), LlmError> {
        let mut last_err = LlmError::NoJson;
        for attempt in 0..self.config.max_retries.max(1) {
            if attempt > 0 {
                let wait = Duration::from_secs(1 << attempt);
                log::debug!("llm retry {attempt} after {wait:?}");
                std::thread::sleep(wait);
            }
            match self.request(api_key, prompt) {
                Ok(result) => return Ok(result),
                Err(err) => {
                    log::warn!("llm request attempt {} failed: {err}", attempt + 1);
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }
}

impl super::Analyzer for LlmAnalyzer {
    fn name(&self) -> &str {
        "hosted-llm (per-bookmark)"
    }

    fn extract(&self, text: &str, title: &str) -> AnalysisResult {
        // An empty document has nothing to analyze; never spend quota on it.
        if text.trim().is_empty() {
            return AnalysisResult::empty();
        }

        let Some(api_key) = self.api_key() else {
            log::warn!("no API key configured ({API_KEY_ENV} unset); skipping llm analysis");
            return AnalysisResult::empty();
        };

        let prompt = self.build_prompt(text, title);
        let estimated_tokens = prompt.chars().count() as u64 / CHARS_PER_TOKEN + 1;
        if !self.gate.try_acquire(estimated_tokens) {
            log::info!("llm quota exhausted; skipping analysis for this bookmark");
            return AnalysisResult::empty();
        }

        let (content, usage) = match self.request_with_retries(&api_key, &prompt) {
            Ok(result) => result,
            Err(err) => {
                log::warn!("llm analysis failed after retries: {err}");
                return AnalysisResult::empty();
            }
        };

        if let Some(usage) = usage {
            let actual = usage.prompt_tokens + usage.completion_tokens;
            self.gate.record_extra_tokens(actual.saturating_sub(estimated_tokens));
        }

        match parse_analysis(&content, self.config.top_keywords) {
            Some(result) => result,
            None => {
                log::warn!("llm response contained no usable JSON object");
                AnalysisResult::empty()
            }
        }
    }
}

/// Pulls the first balanced `{...}` object out of the response (models wrap
/// JSON in markdown fences more often than not) and coerces it into an
/// [`AnalysisResult`]. Both the `topics` and `keywords` arrays must be
/// present; empty arrays are accepted, a missing key is not.
fn parse_analysis(content: &str, top_keywords: usize) -> Option<AnalysisResult> {
    let blob = extract_json_object(content)?;
    let value: serde_json::Value = serde_json::from_str(&blob).ok()?;
    let map = value.as_object()?;

    let (Some(topics_value), Some(keywords_value)) = (map.get("topics"), map.get("keywords"))
    else {
        return None;
    };

    let keywords: Vec<String> = string_items(keywords_value)
        .into_iter()
        .take(top_keywords)
        .collect();
    let labels: Vec<String> = string_items(topics_value)
        .into_iter()
        .take(MAX_TOPIC_LABELS)
        .collect();

    Some(AnalysisResult {
        keywords: keywords.into_iter().take(MAX_RESULT_KEYWORDS).collect(),
        topics: normalize::topics_from_labels(&labels),
    })
}

fn extract_json_object(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in content[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Accepts arrays of strings or numbers; anything else contributes nothing.
fn string_items(value: &serde_json::Value) -> Vec<String> {
    let serde_json::Value::Array(items) = value else {
        return vec![];
    };
    items
        .iter()
        .filter_map(|item| match item {
            serde_json::Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}
