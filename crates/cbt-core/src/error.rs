//! Engine error types.
//!
//! `SourceError` never leaves the question source: every variant is recovered
//! by fallback sampling. `PersistenceError` is logged by the result recorder
//! and dropped. `ControllerError` reports caller misuse of the state machine.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::model::{Mode, Stage};

/// Why question synthesis was abandoned.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Synthesis did not settle before the deadline.
    #[error("question synthesis timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The generator call itself failed.
    #[error("generator failed: {0}")]
    Transport(String),

    /// The generator answered, but not with usable questions.
    #[error("invalid synthesized questions: {0}")]
    Validation(String),

    /// No generator is configured.
    #[error("no question generator configured")]
    Unavailable,
}

/// A durable-store write after finalize failed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to append result {result_id}: {message}")]
    AppendResult { result_id: Uuid, message: String },

    #[error("failed to grant {points} points to {user_id}: {message}")]
    GrantPoints {
        user_id: String,
        points: u32,
        message: String,
    },

    #[error("failed to award badge '{badge}' to {user_id}: {message}")]
    AwardBadge {
        user_id: String,
        badge: String,
        message: String,
    },
}

/// Caller misuse of the session controller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("cannot {action} while in the {stage} stage")]
    InvalidTransition { stage: Stage, action: &'static str },

    #[error("topic mode requires a topic")]
    MissingTopic,

    #[error("{action} is not available in {mode} mode")]
    WrongMode { mode: Mode, action: &'static str },

    #[error("question {index} out of range (session has {len} questions)")]
    QuestionOutOfRange { index: usize, len: usize },

    #[error("option {option} out of range (question has {len} options)")]
    OptionOutOfRange { option: usize, len: usize },
}
