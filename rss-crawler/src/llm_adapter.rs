use crate::config::LlmConfig;
use crate::types::{Result, SummarizeError, Summarizer};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You summarize news articles. Reply with a neutral summary of two to four \
sentences in the language of the article. Do not add commentary.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Default)]
struct Breaker {
    consecutive_failures: u32,
    open_until: Option<Instant>,
    // set while the single half-open trial request is running
    trial_in_flight: bool,
}

/// Summarizer backed by an OpenAI-compatible chat completions endpoint.
///
/// After `failure_threshold` consecutive failures the circuit opens and every
/// call answers `Unavailable` without touching the network until the cooldown
/// has passed.
pub struct LlmSummarizer {
    client: Client,
    config: LlmConfig,
    breaker: Mutex<Breaker>,
}

impl LlmSummarizer {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            client,
            config,
            breaker: Mutex::new(Breaker::default()),
        })
    }

    fn circuit_open(&self) -> bool {
        let mut breaker = self.breaker.lock().unwrap_or_else(|e| e.into_inner());
        match breaker.open_until {
            Some(until) if Instant::now() < until => true,
            Some(_) if breaker.trial_in_flight => true,
            Some(_) => {
                // half-open: exactly one caller gets through
                breaker.trial_in_flight = true;
                false
            }
            None => false,
        }
    }

    fn record_success(&self) {
        let mut breaker = self.breaker.lock().unwrap_or_else(|e| e.into_inner());
        breaker.consecutive_failures = 0;
        breaker.open_until = None;
        breaker.trial_in_flight = false;
    }

    fn record_failure(&self) {
        let mut breaker = self.breaker.lock().unwrap_or_else(|e| e.into_inner());
        if breaker.trial_in_flight {
            warn!("LLM trial request failed, pausing for {}s", self.config.cooldown_seconds);
            breaker.trial_in_flight = false;
            breaker.open_until = Some(Instant::now() + Duration::from_secs(self.config.cooldown_seconds));
            return;
        }

        breaker.consecutive_failures += 1;
        if self.config.failure_threshold > 0 && breaker.consecutive_failures >= self.config.failure_threshold {
            warn!(
                "LLM failed {} times in a row, pausing for {}s",
                breaker.consecutive_failures, self.config.cooldown_seconds
            );
            breaker.open_until = Some(Instant::now() + Duration::from_secs(self.config.cooldown_seconds));
            breaker.consecutive_failures = 0;
        }
    }

    async fn complete(&self, text: &str) -> std::result::Result<String, SummarizeError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            temperature: 0.2,
        };

        let mut builder = self.client.post(&self.config.api_url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SummarizeError::Unavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(SummarizeError::Unavailable(format!("LLM answered HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(SummarizeError::Transient(anyhow::anyhow!("LLM answered HTTP {}", status)));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| SummarizeError::Transient(anyhow::anyhow!("malformed LLM response: {}", e)))?;

        let summary = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .unwrap_or_default();

        if summary.is_empty() {
            return Err(SummarizeError::Transient(anyhow::anyhow!("LLM returned an empty summary")));
        }
        Ok(summary)
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, text: &str) -> std::result::Result<String, SummarizeError> {
        if self.circuit_open() {
            return Err(SummarizeError::Unavailable("circuit open".to_string()));
        }

        let input = truncate_chars(text, self.config.max_input_chars);
        debug!("Summarizing {} chars with {}", input.chars().count(), self.config.model);

        match self.complete(input).await {
            Ok(summary) => {
                self.record_success();
                Ok(summary)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Offline summarizer for development and tests: the first two sentences.
pub struct MockSummarizer {
    response_delay_ms: u64,
}

impl MockSummarizer {
    pub fn new() -> Self {
        Self { response_delay_ms: 0 }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.response_delay_ms = delay_ms;
        self
    }

    async fn simulate_processing(&self) {
        if self.response_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.response_delay_ms)).await;
        }
    }
}

impl Default for MockSummarizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, text: &str) -> std::result::Result<String, SummarizeError> {
        self.simulate_processing().await;

        let sentences: Vec<&str> = text
            .split_inclusive(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(2)
            .collect();

        if sentences.is_empty() {
            return Err(SummarizeError::Transient(anyhow::anyhow!("nothing to summarize")));
        }
        Ok(sentences.join(" "))
    }
}
