//! Collaborator traits: the generative text service, the durable result
//! store and the usage-tracking sink.
//!
//! Generators are implemented in `cbt-providers`, stores and sinks in
//! `cbt-store`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::ExamResult;

// ---------------------------------------------------------------------------
// Generative text service
// ---------------------------------------------------------------------------

/// A backend that turns a prompt into freeform text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Human-readable backend name (e.g. "openai").
    fn name(&self) -> &str;

    /// Generate text from a prompt.
    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse>;
}

/// Request to generate text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model identifier.
    pub model: String,
    /// The main prompt.
    pub prompt: String,
    /// Optional system prompt override.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Response from a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// The raw response content.
    pub content: String,
    /// Model that actually generated the response.
    pub model: String,
    /// Latency in milliseconds.
    pub latency_ms: u64,
}

/// Default system prompt for question synthesis.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You write multiple-choice exam questions for university students. Respond ONLY with a JSON array. Each element has the keys \"question\" (string), \"options\" (array of 4 strings) and \"correctAnswer\" (0-based index of the correct option). No prose, no markdown.";

// ---------------------------------------------------------------------------
// Durable store and usage sink
// ---------------------------------------------------------------------------

/// Append-only result storage plus the gamification counters attached to a
/// user profile.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Append a finished result. Records are never rewritten.
    async fn append_result(&self, result: &ExamResult) -> anyhow::Result<()>;

    /// Increment a user's contribution points.
    async fn add_points(&self, user_id: &str, points: u32) -> anyhow::Result<()>;

    /// Add an achievement badge to a user's badge set.
    async fn award_badge(&self, user_id: &str, badge: &str) -> anyhow::Result<()>;
}

/// Quota bookkeeping for successful generator calls.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record_generation(&self, model: &str) -> anyhow::Result<()>;
}

/// Usage sink that drops every event.
pub struct NoopUsage;

#[async_trait]
impl UsageSink for NoopUsage {
    async fn record_generation(&self, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON payload extraction
// ---------------------------------------------------------------------------

/// Pull the JSON payload out of a generator response.
///
/// Handles:
/// - ```json fenced blocks (preferred)
/// - Generic ``` blocks
/// - Prose around a bare array (the outermost `[` ... `]` span)
/// - A raw payload (returned trimmed)
pub fn extract_json_payload(response: &str) -> &str {
    let mut json_block = None;
    let mut generic_block = None;
    let mut offset = 0;
    let mut open: Option<(usize, bool)> = None;

    for line in response.split_inclusive('\n') {
        let trimmed = line.trim();
        let line_start = offset;
        offset += line.len();

        let state = open;
        match state {
            None if trimmed.starts_with("```") => {
                let lang = trimmed.trim_start_matches('`').trim().to_lowercase();
                open = Some((offset, lang == "json"));
            }
            Some((start, is_json)) if trimmed == "```" => {
                let body = &response[start..line_start];
                if is_json && json_block.is_none() {
                    json_block = Some(body);
                } else if !is_json && generic_block.is_none() {
                    generic_block = Some(body);
                }
                open = None;
            }
            _ => {}
        }
    }

    // Truncated (unclosed) fence: take what arrived
    if let Some((start, is_json)) = open {
        let body = &response[start.min(response.len())..];
        if is_json && json_block.is_none() {
            json_block = Some(body);
        } else if generic_block.is_none() {
            generic_block = Some(body);
        }
    }

    let candidate = json_block.or(generic_block).unwrap_or(response).trim();

    match (candidate.find('['), candidate.rfind(']')) {
        (Some(start), Some(end)) if start < end => &candidate[start..=end],
        _ => candidate,
    }
}
