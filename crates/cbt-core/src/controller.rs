//! The session controller: an explicit state machine over exam stages.
//!
//! Stage changes go through the pure [`transition`] function. The controller
//! owns the live session, the game state and the countdown; user input and
//! timer ticks are both applied through `&mut self`, one at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::ControllerError;
use crate::model::{
    deadline_after, ExamResult, Level, Mode, Outcome, Question, QuestionRequest, ReviewItem,
    Session, Stage,
};
use crate::persistence::ResultRecorder;
use crate::scoring::{score_standard, Feedback, GameRules, GameState};
use crate::source::{Provenance, QuestionSource};
use crate::timer::{Countdown, Tick};

/// Timing and game tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub topic_time_limit: Duration,
    pub mock_time_limit: Duration,
    /// Per-question limit in game mode; re-armed on every advance.
    pub game_question_time: Duration,
    pub game_rules: GameRules,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            topic_time_limit: Duration::from_secs(20 * 60),
            mock_time_limit: Duration::from_secs(40 * 60),
            game_question_time: Duration::from_secs(30),
            game_rules: GameRules::default(),
        }
    }
}

impl EngineConfig {
    /// Countdown armed when an exam of `mode` starts.
    pub fn time_limit(&self, mode: Mode) -> Duration {
        match mode {
            Mode::Topic => self.topic_time_limit,
            Mode::Mock => self.mock_time_limit,
            Mode::Game => self.game_question_time,
        }
    }
}

/// Inputs to the stage machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    ChooseMode,
    StartExam,
    QuestionsReady,
    Finish,
    OpenReview,
    ReturnToMenu,
}

/// The stage reached from `stage` on `event`, or `None` if the event is not
/// accepted there.
pub fn transition(stage: Stage, event: StageEvent) -> Option<Stage> {
    use Stage::*;
    use StageEvent::*;

    match (stage, event) {
        (Menu, ChooseMode) => Some(Setup),
        (Setup, StartExam) => Some(Loading),
        (Loading, QuestionsReady) => Some(Exam),
        (Exam, Finish) => Some(Result),
        (Result, OpenReview) => Some(Review),
        (Setup | Loading | Exam | Result | Review, ReturnToMenu) => Some(Menu),
        _ => None,
    }
}

/// What a timer tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The countdown moved on.
    Running { remaining_secs: u64 },
    /// Game feedback was cleared and the next question is up.
    NextQuestion { index: usize },
    /// A game question timed out and cost a life.
    LifeLost { feedback: Feedback, lives: u8 },
    /// The exam ended on this tick.
    Finished(Outcome),
}

struct ExamState {
    session: Session,
    game: Option<GameState>,
    cursor: usize,
    provenance: Provenance,
}

/// Drives one user's exam sessions.
pub struct SessionController {
    user_id: String,
    source: Arc<QuestionSource>,
    recorder: ResultRecorder,
    config: EngineConfig,
    stage: Stage,
    mode: Option<Mode>,
    exam: Option<ExamState>,
    countdown: Option<Countdown>,
    outcome: Option<Outcome>,
    result: Option<ExamResult>,
    pending_write: Option<JoinHandle<()>>,
}

impl SessionController {
    pub fn new(
        user_id: impl Into<String>,
        source: Arc<QuestionSource>,
        recorder: ResultRecorder,
        config: EngineConfig,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            source,
            recorder,
            config,
            stage: Stage::Menu,
            mode: None,
            exam: None,
            countdown: None,
            outcome: None,
            result: None,
            pending_write: None,
        }
    }

    // -----------------------------------------------------------------------
    // Stage changes
    // -----------------------------------------------------------------------

    /// menu → setup.
    pub fn choose_mode(&mut self, mode: Mode) -> Result<(), ControllerError> {
        self.apply(StageEvent::ChooseMode, "choose a mode")?;
        self.mode = Some(mode);
        Ok(())
    }

    /// setup → loading → exam. Acquires questions and arms the countdown.
    pub async fn start_exam(
        &mut self,
        level: Level,
        topic: Option<String>,
    ) -> Result<&Session, ControllerError> {
        let mode = match (transition(self.stage, StageEvent::StartExam), self.mode) {
            (Some(_), Some(mode)) => mode,
            _ => {
                return Err(ControllerError::InvalidTransition {
                    stage: self.stage,
                    action: "start an exam",
                })
            }
        };

        let topic = if mode.requires_topic() {
            let topic = topic
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .ok_or(ControllerError::MissingTopic)?;
            Some(topic)
        } else {
            None
        };

        self.discard_session();
        self.apply(StageEvent::StartExam, "start an exam")?;

        let request = QuestionRequest { mode, level, topic };
        let set = self.source.acquire(&request).await;

        let limit = self.config.time_limit(mode);
        let session = Session::new(&request, set.questions, limit);
        let game = (mode == Mode::Game)
            .then(|| GameState::new(session.total(), self.config.game_rules));
        tracing::info!(
            "session {} started: {mode} mode, level {level}, {} questions ({:?})",
            session.id,
            session.total(),
            set.provenance
        );

        self.exam = Some(ExamState {
            session,
            game,
            cursor: 0,
            provenance: set.provenance,
        });
        self.apply(StageEvent::QuestionsReady, "begin the exam")?;
        self.countdown = Some(Countdown::start(limit));

        if self.game().is_some_and(GameState::is_over) {
            self.finalize();
        }

        self.session().ok_or(ControllerError::InvalidTransition {
            stage: self.stage,
            action: "start an exam",
        })
    }

    /// exam → result.
    pub fn submit(&mut self) -> Result<Outcome, ControllerError> {
        self.require_stage(Stage::Exam, "submit")?;
        self.finalize().ok_or(ControllerError::InvalidTransition {
            stage: self.stage,
            action: "submit",
        })
    }

    /// result → review.
    pub fn open_review(&mut self) -> Result<(), ControllerError> {
        self.apply(StageEvent::OpenReview, "open the review")?;
        Ok(())
    }

    /// Back to the menu, discarding the session and its countdown.
    pub fn return_to_menu(&mut self) -> Result<(), ControllerError> {
        self.apply(StageEvent::ReturnToMenu, "return to the menu")?;
        self.discard_session();
        self.mode = None;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Standard-mode input
    // -----------------------------------------------------------------------

    /// Record or replace the answer to question `index`.
    pub fn select_answer(&mut self, index: usize, option: usize) -> Result<(), ControllerError> {
        let exam = self.standard_exam("answer a question")?;
        let question = question_at(&exam.session, index)?;
        check_option(question, option)?;
        exam.session.answers.insert(index, option);
        Ok(())
    }

    /// Remove the answer to question `index`, if any.
    pub fn clear_answer(&mut self, index: usize) -> Result<(), ControllerError> {
        let exam = self.standard_exam("clear an answer")?;
        question_at(&exam.session, index)?;
        exam.session.answers.remove(&index);
        Ok(())
    }

    pub fn go_to(&mut self, index: usize) -> Result<(), ControllerError> {
        let exam = self.standard_exam("navigate")?;
        question_at(&exam.session, index)?;
        exam.cursor = index;
        Ok(())
    }

    pub fn next_question(&mut self) -> Result<usize, ControllerError> {
        let exam = self.standard_exam("navigate")?;
        exam.cursor = (exam.cursor + 1).min(exam.session.total().saturating_sub(1));
        Ok(exam.cursor)
    }

    pub fn previous_question(&mut self) -> Result<usize, ControllerError> {
        let exam = self.standard_exam("navigate")?;
        exam.cursor = exam.cursor.saturating_sub(1);
        Ok(exam.cursor)
    }

    // -----------------------------------------------------------------------
    // Game-mode input
    // -----------------------------------------------------------------------

    /// Answer the current game question.
    ///
    /// Returns `Ok(None)` when input is ignored because feedback is showing.
    pub fn answer_game(&mut self, option: usize) -> Result<Option<Feedback>, ControllerError> {
        self.require_stage(Stage::Exam, "answer a question")?;
        let exam = self.exam.as_mut().ok_or(ControllerError::InvalidTransition {
            stage: Stage::Exam,
            action: "answer a question",
        })?;
        let Some(game) = exam.game.as_mut() else {
            return Err(ControllerError::WrongMode {
                mode: exam.session.mode,
                action: "answer_game",
            });
        };

        let index = game.current_index;
        if !game.accepts_input() {
            tracing::debug!("ignoring input on question {index} while feedback is visible");
            return Ok(None);
        }
        let question = question_at(&exam.session, index)?;
        check_option(question, option)?;

        let Some(feedback) = game.answer(question, Some(option)) else {
            return Ok(None);
        };
        exam.session.answers.insert(index, option);

        if game.is_over() {
            self.finalize();
        }
        Ok(Some(feedback))
    }

    // -----------------------------------------------------------------------
    // Timer
    // -----------------------------------------------------------------------

    /// Wait for the next one-second tick and apply it to the current state.
    ///
    /// Never resolves while no countdown is armed. Cancel-safe: state only
    /// changes after the tick has fired.
    pub async fn tick(&mut self) -> TickOutcome {
        let feedback_visible = self
            .game()
            .is_some_and(|g| g.feedback.is_some() && !g.is_over());

        let Some(countdown) = self.countdown.as_mut() else {
            return std::future::pending().await;
        };

        if feedback_visible {
            countdown.hold().await;
            return self.next_game_question();
        }

        let tick = countdown.tick().await;
        match tick {
            Tick::Running { remaining_secs } => {
                if remaining_secs % 60 == 0 || remaining_secs <= 10 {
                    tracing::debug!("{remaining_secs}s remaining");
                }
                TickOutcome::Running { remaining_secs }
            }
            Tick::Expired => self.expire(),
        }
    }

    fn expire(&mut self) -> TickOutcome {
        let Some(exam) = self.exam.as_mut() else {
            self.countdown = None;
            return TickOutcome::Running { remaining_secs: 0 };
        };

        let Some(game) = exam.game.as_mut() else {
            tracing::info!(
                "time is up for session {} with {} of {} answered",
                exam.session.id,
                exam.session.answered_count(),
                exam.session.total()
            );
            return self.finish_on_tick();
        };

        let index = game.current_index;
        let Some(question) = exam.session.questions.get(index) else {
            return self.finish_on_tick();
        };
        let feedback = game.answer(question, None);
        let lives = game.lives;
        tracing::debug!("game question {index} timed out, {lives} lives left");

        match feedback {
            Some(feedback) if !game.is_over() => TickOutcome::LifeLost { feedback, lives },
            _ => self.finish_on_tick(),
        }
    }

    fn finish_on_tick(&mut self) -> TickOutcome {
        match self.finalize() {
            Some(outcome) => TickOutcome::Finished(outcome),
            None => TickOutcome::Running { remaining_secs: 0 },
        }
    }

    fn next_game_question(&mut self) -> TickOutcome {
        let question_time = self.config.game_question_time;
        let Some(exam) = self.exam.as_mut() else {
            return TickOutcome::Running { remaining_secs: 0 };
        };
        let Some(game) = exam.game.as_mut() else {
            return TickOutcome::Running { remaining_secs: 0 };
        };

        game.advance();
        exam.session.deadline = deadline_after(question_time);
        if let Some(countdown) = self.countdown.as_mut() {
            countdown.reset(question_time);
        }
        TickOutcome::NextQuestion {
            index: game.current_index,
        }
    }

    // -----------------------------------------------------------------------
    // Finalize and persistence
    // -----------------------------------------------------------------------

    /// Close the exam: score it, enter `result`, then hand off persistence.
    fn finalize(&mut self) -> Option<Outcome> {
        if self.stage != Stage::Exam {
            return None;
        }
        let exam = self.exam.as_ref()?;
        let session = &exam.session;

        let outcome = match &exam.game {
            Some(game) => game.outcome(),
            None => score_standard(session),
        };
        let result = match outcome {
            Outcome::Standard { score, reward, .. } => Some((
                ExamResult {
                    id: Uuid::new_v4(),
                    user_id: self.user_id.clone(),
                    score,
                    total_questions: session.total(),
                    level: session.level,
                    mode: session.mode,
                    timestamp: chrono::Utc::now(),
                },
                reward,
            )),
            Outcome::Game { .. } => None,
        };
        tracing::info!("session {} finished: {outcome:?}", session.id);

        self.apply(StageEvent::Finish, "finish").ok()?;
        self.outcome = Some(outcome);

        if let Some((result, reward)) = result {
            self.result = Some(result.clone());
            self.pending_write = Some(self.recorder.record(result, reward));
        }
        Some(outcome)
    }

    /// Wait for the most recent persistence task to finish.
    pub async fn flush_persistence(&mut self) {
        if let Some(handle) = self.pending_write.take() {
            if let Err(e) = handle.await {
                tracing::error!("persistence task failed: {e}");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session(&self) -> Option<&Session> {
        self.exam.as_ref().map(|e| &e.session)
    }

    pub fn game(&self) -> Option<&GameState> {
        self.exam.as_ref().and_then(|e| e.game.as_ref())
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn result(&self) -> Option<&ExamResult> {
        self.result.as_ref()
    }

    /// Time left on the running countdown.
    pub fn remaining(&self) -> Option<Duration> {
        self.countdown.as_ref().map(Countdown::remaining)
    }

    /// The question currently shown.
    pub fn current_index(&self) -> Option<usize> {
        let exam = self.exam.as_ref()?;
        Some(match &exam.game {
            Some(game) => game.current_index,
            None => exam.cursor,
        })
    }

    pub fn current_question(&self) -> Option<&Question> {
        let index = self.current_index()?;
        self.session()?.questions.get(index)
    }

    /// Whether the running session's questions came from the bank.
    pub fn question_source_was_fallback(&self) -> Option<bool> {
        self.exam
            .as_ref()
            .map(|e| e.provenance == Provenance::Fallback)
    }

    /// Per-question review rows; empty until the session is finished.
    pub fn review_items(&self) -> Vec<ReviewItem<'_>> {
        if !matches!(self.stage, Stage::Result | Stage::Review) {
            return Vec::new();
        }
        let Some(session) = self.session() else {
            return Vec::new();
        };
        session
            .questions
            .iter()
            .enumerate()
            .map(|(index, question)| ReviewItem {
                index,
                question,
                chosen: session.answers.get(&index).copied(),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn apply(&mut self, event: StageEvent, action: &'static str) -> Result<Stage, ControllerError> {
        let next = transition(self.stage, event).ok_or(ControllerError::InvalidTransition {
            stage: self.stage,
            action,
        })?;
        self.enter(next);
        Ok(next)
    }

    fn enter(&mut self, next: Stage) {
        tracing::debug!("stage {} -> {next}", self.stage);
        if next != Stage::Exam {
            self.countdown = None;
        }
        self.stage = next;
        if let Some(exam) = self.exam.as_mut() {
            exam.session.stage = next;
        }
    }

    fn discard_session(&mut self) {
        self.countdown = None;
        self.exam = None;
        self.outcome = None;
        self.result = None;
    }

    fn require_stage(&self, stage: Stage, action: &'static str) -> Result<(), ControllerError> {
        if self.stage == stage {
            Ok(())
        } else {
            Err(ControllerError::InvalidTransition {
                stage: self.stage,
                action,
            })
        }
    }

    fn standard_exam(&mut self, action: &'static str) -> Result<&mut ExamState, ControllerError> {
        self.require_stage(Stage::Exam, action)?;
        let stage = self.stage;
        let exam = self
            .exam
            .as_mut()
            .ok_or(ControllerError::InvalidTransition { stage, action })?;
        if exam.game.is_some() {
            return Err(ControllerError::WrongMode {
                mode: exam.session.mode,
                action,
            });
        }
        Ok(exam)
    }
}

fn question_at(session: &Session, index: usize) -> Result<&Question, ControllerError> {
    session
        .questions
        .get(index)
        .ok_or(ControllerError::QuestionOutOfRange {
            index,
            len: session.total(),
        })
}

fn check_option(question: &Question, option: usize) -> Result<(), ControllerError> {
    if option < question.options.len() {
        Ok(())
    } else {
        Err(ControllerError::OptionOutOfRange {
            option,
            len: question.options.len(),
        })
    }
}
