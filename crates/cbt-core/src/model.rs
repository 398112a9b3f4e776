//! Core data model types for the assessment engine.
//!
//! Questions, exam modes and levels, the live session, and the immutable
//! result record handed to persistence.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topic tag for questions that are eligible at every level.
pub const GENERAL_TOPIC: &str = "General";

/// A single multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Stable identifier (bank id, or `ai-N` for synthesized questions).
    pub id: String,
    /// The question prompt shown to the student.
    pub text: String,
    /// Answer options in display order.
    pub options: Vec<String>,
    /// Index into `options` of the correct answer.
    pub correct_index: usize,
    /// Course level the question belongs to.
    pub level: Level,
    /// Topic tag (e.g. "Data Structures" or "General").
    pub topic: String,
}

impl Question {
    /// Check the record invariants. Returns a reason on violation.
    pub fn check(&self) -> Result<(), String> {
        if self.text.trim().is_empty() {
            return Err("question text is empty".into());
        }
        if self.options.len() < 2 {
            return Err(format!(
                "needs at least 2 options, found {}",
                self.options.len()
            ));
        }
        if self.options.iter().any(|o| o.trim().is_empty()) {
            return Err("contains an empty option".into());
        }
        if self.correct_index >= self.options.len() {
            return Err(format!(
                "correct index {} out of range for {} options",
                self.correct_index,
                self.options.len()
            ));
        }
        Ok(())
    }

    pub fn is_correct(&self, option: usize) -> bool {
        option == self.correct_index
    }

    /// Whether the question belongs to the cross-level `General` pool.
    pub fn is_general(&self) -> bool {
        self.topic.eq_ignore_ascii_case(GENERAL_TOPIC)
    }
}

/// Course level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Level {
    L100,
    L200,
    L300,
    L400,
}

impl Level {
    pub const ALL: [Level; 4] = [Level::L100, Level::L200, Level::L300, Level::L400];

    pub fn as_u16(self) -> u16 {
        match self {
            Level::L100 => 100,
            Level::L200 => 200,
            Level::L300 => 300,
            Level::L400 => 400,
        }
    }
}

impl TryFrom<u16> for Level {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            100 => Ok(Level::L100),
            200 => Ok(Level::L200),
            300 => Ok(Level::L300),
            400 => Ok(Level::L400),
            other => Err(format!("unknown level: {other}")),
        }
    }
}

impl From<Level> for u16 {
    fn from(level: Level) -> Self {
        level.as_u16()
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u16 = s
            .trim()
            .trim_end_matches(['l', 'L'])
            .parse()
            .map_err(|_| format!("unknown level: {s}"))?;
        Level::try_from(value)
    }
}

/// Exam mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Topic-focused practice.
    Topic,
    /// Full mock exam.
    Mock,
    /// Rapid-fire trivia with lives.
    Game,
}

impl Mode {
    /// Fixed number of questions per session.
    pub fn question_count(self) -> usize {
        match self {
            Mode::Topic => 20,
            Mode::Mock => 30,
            Mode::Game => 50,
        }
    }

    /// Topic and mock sessions are scored once, as a percentage.
    pub fn is_standard(self) -> bool {
        !matches!(self, Mode::Game)
    }

    pub fn requires_topic(self) -> bool {
        matches!(self, Mode::Topic)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Topic => write!(f, "topic"),
            Mode::Mock => write!(f, "mock"),
            Mode::Game => write!(f, "game"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "topic" => Ok(Mode::Topic),
            "mock" => Ok(Mode::Mock),
            "game" | "trivia" => Ok(Mode::Game),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// Stage of the exam lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Menu,
    Setup,
    Loading,
    Exam,
    Result,
    Review,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Menu => "menu",
            Stage::Setup => "setup",
            Stage::Loading => "loading",
            Stage::Exam => "exam",
            Stage::Result => "result",
            Stage::Review => "review",
        };
        f.write_str(name)
    }
}

/// Parameters of a session request, as chosen during setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRequest {
    pub mode: Mode,
    pub level: Level,
    #[serde(default)]
    pub topic: Option<String>,
}

impl QuestionRequest {
    pub fn count(&self) -> usize {
        self.mode.question_count()
    }
}

/// One assessment attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub mode: Mode,
    pub level: Level,
    #[serde(default)]
    pub topic: Option<String>,
    pub questions: Vec<Question>,
    /// Question index → chosen option index.
    pub answers: BTreeMap<usize, usize>,
    /// When the running countdown reaches zero.
    pub deadline: DateTime<Utc>,
    pub stage: Stage,
}

impl Session {
    pub fn new(request: &QuestionRequest, questions: Vec<Question>, time_limit: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode: request.mode,
            level: request.level,
            topic: request.topic.clone(),
            questions,
            answers: BTreeMap::new(),
            deadline: deadline_after(time_limit),
            stage: Stage::Exam,
        }
    }

    pub fn total(&self) -> usize {
        self.questions.len()
    }

    /// Number of answered questions whose chosen option is correct.
    pub fn correct_count(&self) -> usize {
        self.answers
            .iter()
            .filter(|&(&index, &option)| {
                self.questions
                    .get(index)
                    .is_some_and(|q| q.is_correct(option))
            })
            .count()
    }

    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }
}

pub(crate) fn deadline_after(limit: Duration) -> DateTime<Utc> {
    let limit = chrono::Duration::from_std(limit).unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() + limit
}

/// The immutable record of a finished standard session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamResult {
    pub id: Uuid,
    pub user_id: String,
    /// Percentage score, 0–100.
    pub score: u8,
    pub total_questions: usize,
    pub level: Level,
    pub mode: Mode,
    pub timestamp: DateTime<Utc>,
}

/// Contribution points and achievements earned by a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Reward {
    pub points: u32,
    pub perfect_score: bool,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Outcome {
    Standard {
        score: u8,
        correct: usize,
        total: usize,
        reward: Reward,
    },
    Game {
        points: u32,
        lives_left: u8,
        answered: usize,
        total: usize,
    },
}

/// One row of the post-exam review.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewItem<'a> {
    pub index: usize,
    pub question: &'a Question,
    pub chosen: Option<usize>,
}

impl ReviewItem<'_> {
    pub fn is_correct(&self) -> bool {
        self.chosen.is_some_and(|c| self.question.is_correct(c))
    }
}
