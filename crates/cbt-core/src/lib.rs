//! cbt-core: Assessment session engine.
//!
//! This crate defines the exam data model, the question bank, the question
//! source with its fallback contract, the countdown, the session state
//! machine, scoring, and the result persistence adapter.

pub mod bank;
pub mod controller;
pub mod error;
pub mod model;
pub mod persistence;
pub mod scoring;
pub mod source;
pub mod timer;
pub mod traits;

pub use controller::{EngineConfig, SessionController, StageEvent, TickOutcome};
pub use error::{ControllerError, PersistenceError, SourceError};
pub use source::{QuestionSource, SourceConfig};
