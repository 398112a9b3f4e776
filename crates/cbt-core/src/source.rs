//! Question sourcing: synthesis through a text generator under a strict
//! timeout, with silent fallback sampling from the question bank.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::instrument;

use crate::bank::QuestionBank;
use crate::error::SourceError;
use crate::model::{Level, Mode, Question, QuestionRequest};
use crate::traits::{
    extract_json_payload, GenerateRequest, TextGenerator, UsageSink, DEFAULT_SYSTEM_PROMPT,
};

/// Settings for the synthesis call.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Model passed to the generator.
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Synthesis is abandoned after this long.
    pub timeout: Duration,
    /// Seed for fallback sampling; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4.1-mini".into(),
            temperature: 0.7,
            max_tokens: 16_000,
            timeout: Duration::from_secs(8),
            seed: None,
        }
    }
}

/// Where a question set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Synthesized,
    Fallback,
}

/// A question set of exactly the mode's length.
#[derive(Debug, Clone)]
pub struct QuestionSet {
    pub questions: Vec<Question>,
    pub provenance: Provenance,
}

/// Supplies questions for a session. Never fails outwardly.
pub struct QuestionSource {
    generator: Option<Arc<dyn TextGenerator>>,
    bank: Arc<QuestionBank>,
    usage: Arc<dyn UsageSink>,
    config: SourceConfig,
    rng: Mutex<StdRng>,
}

impl QuestionSource {
    pub fn new(
        generator: Option<Arc<dyn TextGenerator>>,
        bank: Arc<QuestionBank>,
        usage: Arc<dyn UsageSink>,
        config: SourceConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let bank = if bank.is_empty() {
            tracing::warn!("question bank is empty, using the built-in bank");
            Arc::new(QuestionBank::builtin())
        } else {
            bank
        };
        Self {
            generator,
            bank,
            usage,
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Bank-only source with no generator.
    pub fn offline(bank: Arc<QuestionBank>, seed: Option<u64>) -> Self {
        Self::new(
            None,
            bank,
            Arc::new(crate::traits::NoopUsage),
            SourceConfig {
                seed,
                ..SourceConfig::default()
            },
        )
    }

    pub fn bank(&self) -> &QuestionBank {
        &self.bank
    }

    /// Acquire exactly `request.count()` questions.
    #[instrument(skip(self), fields(mode = %request.mode, level = %request.level))]
    pub async fn acquire(&self, request: &QuestionRequest) -> QuestionSet {
        let count = request.count();

        match self.synthesize(request).await {
            Ok(mut questions) => {
                tracing::info!("synthesized {} questions", questions.len());
                self.track_usage();
                if questions.len() > count {
                    questions.truncate(count);
                } else if questions.len() < count {
                    let missing = count - questions.len();
                    tracing::debug!("topping up {missing} synthesized questions from the bank");
                    questions.extend(self.sample(request.level, missing));
                }
                QuestionSet {
                    questions,
                    provenance: Provenance::Synthesized,
                }
            }
            Err(e) => {
                match e {
                    SourceError::Unavailable => tracing::debug!("{e}; sampling from the bank"),
                    _ => tracing::warn!("{e}; falling back to the question bank"),
                }
                QuestionSet {
                    questions: self.sample(request.level, count),
                    provenance: Provenance::Fallback,
                }
            }
        }
    }

    /// One synthesis attempt raced against the timeout. No retries.
    async fn synthesize(&self, request: &QuestionRequest) -> Result<Vec<Question>, SourceError> {
        let generator = self.generator.as_ref().ok_or(SourceError::Unavailable)?;

        let generate = GenerateRequest {
            model: self.config.model.clone(),
            prompt: build_prompt(request),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = tokio::time::timeout(self.config.timeout, generator.generate(&generate))
            .await
            .map_err(|_| SourceError::Timeout(self.config.timeout))?
            .map_err(|e| SourceError::Transport(format!("{e:#}")))?;

        parse_questions(&response.content, request)
    }

    fn sample(&self, level: Level, count: usize) -> Vec<Question> {
        match self.rng.lock() {
            Ok(mut rng) => sample_fallback(&self.bank, level, count, &mut *rng),
            Err(poisoned) => sample_fallback(&self.bank, level, count, &mut *poisoned.into_inner()),
        }
    }

    fn track_usage(&self) {
        let usage = Arc::clone(&self.usage);
        let model = self.config.model.clone();
        tokio::spawn(async move {
            if let Err(e) = usage.record_generation(&model).await {
                tracing::warn!("failed to record generator usage: {e:#}");
            }
        });
    }
}

/// Draw `count` questions for `level` from the bank.
///
/// The eligible pool (same level, or `General`) is shuffled and truncated.
/// If it is too small, the whole bank is used instead; if even the whole
/// bank is too small, the shuffled bank is repeated.
pub fn sample_fallback<R: Rng + ?Sized>(
    bank: &QuestionBank,
    level: Level,
    count: usize,
    rng: &mut R,
) -> Vec<Question> {
    let mut pool = bank.eligible(level);
    if pool.len() < count {
        tracing::debug!(
            "only {} eligible questions for level {level}, sampling the whole bank",
            pool.len()
        );
        pool = bank.questions().iter().collect();
    }
    if pool.is_empty() {
        tracing::error!("question bank is empty, cannot sample {count} questions");
        return Vec::new();
    }

    pool.shuffle(rng);
    pool.iter()
        .cycle()
        .take(count)
        .map(|q| (*q).clone())
        .collect()
}

/// The synthesis prompt for a request.
pub fn build_prompt(request: &QuestionRequest) -> String {
    let count = request.count();
    let level = request.level;
    let scope = match (request.mode, request.topic.as_deref()) {
        (Mode::Topic, Some(topic)) => {
            format!("on the topic \"{topic}\" for a {level}-level university computer science course")
        }
        (Mode::Game, _) => format!(
            "as rapid-fire trivia spanning computing and general knowledge, pitched at {level}-level university students"
        ),
        _ => format!(
            "covering the full {level}-level computer science curriculum, as a balanced mock examination"
        ),
    };
    format!(
        "Generate exactly {count} multiple-choice questions {scope}. \
         Each question must have exactly 4 options and one correct answer. \
         Return a JSON array of {count} objects with the keys \"question\", \"options\" and \"correctAnswer\" \
         (the 0-based index of the correct option)."
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedQuestion {
    #[serde(alias = "text")]
    question: Option<String>,
    options: Option<Vec<String>>,
    #[serde(alias = "correct_answer", alias = "answer")]
    correct_answer: Option<serde_json::Value>,
}

/// Validate a generator response and turn it into questions.
pub fn parse_questions(
    content: &str,
    request: &QuestionRequest,
) -> Result<Vec<Question>, SourceError> {
    let payload = extract_json_payload(content);
    let items: Vec<serde_json::Value> = serde_json::from_str(payload)
        .map_err(|e| SourceError::Validation(format!("response is not a JSON array: {e}")))?;
    if items.is_empty() {
        return Err(SourceError::Validation("response array is empty".into()));
    }

    let topic = match (request.mode, request.topic.as_deref()) {
        (Mode::Topic, Some(topic)) => topic.to_string(),
        _ => crate::model::GENERAL_TOPIC.to_string(),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let generated: GeneratedQuestion = serde_json::from_value(item)
                .map_err(|e| SourceError::Validation(format!("item {i}: {e}")))?;
            let text = generated
                .question
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| SourceError::Validation(format!("item {i}: missing question text")))?;
            let options = generated
                .options
                .ok_or_else(|| SourceError::Validation(format!("item {i}: missing options")))?;
            let correct_index = generated
                .correct_answer
                .as_ref()
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| {
                    SourceError::Validation(format!("item {i}: correctAnswer is not an integer index"))
                })?;
            let correct_index = usize::try_from(correct_index).map_err(|_| {
                SourceError::Validation(format!("item {i}: correctAnswer {correct_index} is out of range"))
            })?;

            let question = Question {
                id: format!("ai-{}", i + 1),
                text,
                options,
                correct_index,
                level: request.level,
                topic: topic.clone(),
            };
            question
                .check()
                .map_err(|reason| SourceError::Validation(format!("item {i}: {reason}")))?;
            Ok(question)
        })
        .collect()
}
