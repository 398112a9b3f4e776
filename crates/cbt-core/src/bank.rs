//! The static question bank.
//!
//! Loads question records from TOML, rejects records that break the
//! question invariants, and answers level-eligibility queries for fallback
//! sampling.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::{Level, Question};

const BUILTIN_BANK: &str = include_str!("../data/bank.toml");

/// Intermediate TOML structure for bank files.
#[derive(Debug, Deserialize)]
struct TomlBankFile {
    #[serde(default)]
    questions: Vec<TomlQuestion>,
}

#[derive(Debug, Deserialize)]
struct TomlQuestion {
    id: String,
    text: String,
    #[serde(default)]
    options: Vec<String>,
    answer: i64,
    level: u16,
    #[serde(default = "default_topic")]
    topic: String,
}

fn default_topic() -> String {
    crate::model::GENERAL_TOPIC.to_string()
}

/// A record that was dropped while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub id: String,
    pub reason: String,
}

/// Outcome of loading a bank: the usable questions plus what was dropped.
#[derive(Debug, Clone)]
pub struct BankLoad {
    pub bank: QuestionBank,
    pub rejected: Vec<Rejection>,
}

/// A fixed pool of pre-authored questions.
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    questions: Vec<Question>,
}

impl QuestionBank {
    /// Build a bank from already-validated questions. Invalid ones are dropped.
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            questions: questions.into_iter().filter(|q| q.check().is_ok()).collect(),
        }
    }

    /// The bank compiled into this crate.
    pub fn builtin() -> Self {
        match Self::from_toml_str(BUILTIN_BANK, Path::new("<builtin>")) {
            Ok(load) => load.bank,
            Err(e) => {
                tracing::error!("built-in question bank is unreadable: {e:#}");
                Self::default()
            }
        }
    }

    /// Load a bank from a TOML file.
    pub fn load(path: &Path) -> Result<BankLoad> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read question bank: {}", path.display()))?;
        Self::from_toml_str(&content, path)
    }

    /// Parse a TOML string into a bank (useful for testing).
    pub fn from_toml_str(content: &str, source_path: &Path) -> Result<BankLoad> {
        let parsed: TomlBankFile = toml::from_str(content)
            .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

        let mut seen = HashSet::new();
        let mut questions = Vec::with_capacity(parsed.questions.len());
        let mut rejected = Vec::new();

        for record in parsed.questions {
            let id = record.id.clone();
            match convert(record) {
                Ok(question) if !seen.insert(question.id.clone()) => {
                    rejected.push(Rejection {
                        id,
                        reason: "duplicate id".into(),
                    });
                }
                Ok(question) => questions.push(question),
                Err(reason) => rejected.push(Rejection { id, reason }),
            }
        }

        for r in &rejected {
            tracing::warn!(
                "rejected question '{}' in {}: {}",
                r.id,
                source_path.display(),
                r.reason
            );
        }

        Ok(BankLoad {
            bank: Self { questions },
            rejected,
        })
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Questions usable for a session at `level`: same level, or `General`.
    pub fn eligible(&self, level: Level) -> Vec<&Question> {
        self.questions
            .iter()
            .filter(|q| q.level == level || q.is_general())
            .collect()
    }

    /// Count of questions per level, plus the `General` pool size.
    pub fn summary(&self) -> BankSummary {
        let mut per_level = BTreeMap::new();
        for level in Level::ALL {
            per_level.insert(level, 0);
        }
        let mut general = 0;
        for q in &self.questions {
            *per_level.entry(q.level).or_insert(0) += 1;
            if q.is_general() {
                general += 1;
            }
        }
        BankSummary {
            total: self.questions.len(),
            per_level,
            general,
        }
    }
}

/// Per-level counts for a bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankSummary {
    pub total: usize,
    pub per_level: BTreeMap<Level, usize>,
    pub general: usize,
}

fn convert(record: TomlQuestion) -> Result<Question, String> {
    let level = Level::try_from(record.level)?;
    let correct_index = usize::try_from(record.answer)
        .map_err(|_| format!("answer index {} is negative", record.answer))?;
    let question = Question {
        id: record.id,
        text: record.text,
        options: record.options,
        correct_index,
        level,
        topic: record.topic,
    };
    question.check()?;
    Ok(question)
}
