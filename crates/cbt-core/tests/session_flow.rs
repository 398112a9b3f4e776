//! End-to-end session tests: question sourcing, the stage machine, timer
//! expiry, game mode, and persistence hand-off.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use cbt_core::bank::QuestionBank;
use cbt_core::model::{ExamResult, Level, Mode, Outcome, Stage};
use cbt_core::persistence::ResultRecorder;
use cbt_core::scoring::{GameRules, Verdict};
use cbt_core::source::{Provenance, QuestionSource, SourceConfig};
use cbt_core::traits::{GenerateRequest, GenerateResponse, ResultStore, TextGenerator, UsageSink};
use cbt_core::{ControllerError, EngineConfig, SessionController, TickOutcome};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

enum Behaviour {
    Respond(String),
    Hang,
    Fail,
}

struct FakeGenerator {
    behaviour: Behaviour,
    calls: AtomicU32,
}

impl FakeGenerator {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    fn name(&self) -> &str {
        "fake"
    }

    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Respond(content) => Ok(GenerateResponse {
                content: content.clone(),
                model: request.model.clone(),
                latency_ms: 1,
            }),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                anyhow::bail!("should have been abandoned")
            }
            Behaviour::Fail => anyhow::bail!("connection refused"),
        }
    }
}

#[derive(Default)]
struct CountingUsage {
    count: AtomicU32,
}

#[async_trait]
impl UsageSink for CountingUsage {
    async fn record_generation(&self, _: &str) -> anyhow::Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct MemStore {
    fail: bool,
    results: Mutex<Vec<ExamResult>>,
    points: Mutex<u32>,
    badges: Mutex<Vec<String>>,
}

#[async_trait]
impl ResultStore for MemStore {
    async fn append_result(&self, result: &ExamResult) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("store offline");
        }
        self.results.lock().unwrap().push(result.clone());
        Ok(())
    }

    async fn add_points(&self, _: &str, points: u32) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("store offline");
        }
        *self.points.lock().unwrap() += points;
        Ok(())
    }

    async fn award_badge(&self, _: &str, badge: &str) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("store offline");
        }
        self.badges.lock().unwrap().push(badge.to_string());
        Ok(())
    }
}

fn generated_json(n: usize) -> String {
    let items: Vec<_> = (0..n)
        .map(|i| {
            serde_json::json!({
                "question": format!("Synthesized question {i}?"),
                "options": ["w", "x", "y", "z"],
                "correctAnswer": i % 4,
            })
        })
        .collect();
    serde_json::to_string(&items).unwrap()
}

fn source_with(generator: Option<Arc<dyn TextGenerator>>, usage: Arc<CountingUsage>) -> QuestionSource {
    QuestionSource::new(
        generator,
        Arc::new(QuestionBank::builtin()),
        usage,
        SourceConfig {
            seed: Some(2024),
            ..SourceConfig::default()
        },
    )
}

fn controller(store: Arc<MemStore>, config: EngineConfig) -> SessionController {
    let source = QuestionSource::offline(Arc::new(QuestionBank::builtin()), Some(7));
    SessionController::new(
        "student-1",
        Arc::new(source),
        ResultRecorder::new(store),
        config,
    )
}

async fn start(ctl: &mut SessionController, mode: Mode, level: Level) {
    ctl.choose_mode(mode).unwrap();
    let topic = mode.requires_topic().then(|| "Data Structures".to_string());
    ctl.start_exam(level, topic).await.unwrap();
    assert_eq!(ctl.stage(), Stage::Exam);
}

/// Answer `correct` of the first `answered` questions correctly, the rest wrongly.
fn answer_standard(ctl: &mut SessionController, answered: usize, correct: usize) {
    let keys: Vec<(usize, usize)> = ctl
        .session()
        .unwrap()
        .questions
        .iter()
        .map(|q| (q.correct_index, q.options.len()))
        .collect();
    for (i, (right, len)) in keys.into_iter().take(answered).enumerate() {
        let option = if i < correct { right } else { (right + 1) % len };
        ctl.select_answer(i, option).unwrap();
    }
}

fn wrong_option(ctl: &SessionController) -> usize {
    let q = ctl.current_question().unwrap();
    (q.correct_index + 1) % q.options.len()
}

// ---------------------------------------------------------------------------
// Question source
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_mode_gets_its_fixed_count() {
    let usage = Arc::new(CountingUsage::default());
    let offline = source_with(None, usage.clone());
    let synthesized = source_with(
        Some(FakeGenerator::new(Behaviour::Respond(generated_json(50)))),
        usage,
    );

    for mode in [Mode::Topic, Mode::Mock, Mode::Game] {
        for source in [&offline, &synthesized] {
            let request = cbt_core::model::QuestionRequest {
                mode,
                level: Level::L200,
                topic: Some("Algorithms".into()),
            };
            let set = source.acquire(&request).await;
            assert_eq!(set.questions.len(), mode.question_count(), "{mode}");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn hanging_synthesis_falls_back_after_eight_seconds() {
    let usage = Arc::new(CountingUsage::default());
    let generator = FakeGenerator::new(Behaviour::Hang);
    let source = source_with(Some(generator.clone()), usage.clone());
    let request = cbt_core::model::QuestionRequest {
        mode: Mode::Topic,
        level: Level::L300,
        topic: Some("Operating Systems".into()),
    };

    let started = tokio::time::Instant::now();
    let set = source.acquire(&request).await;

    assert_eq!(started.elapsed(), Duration::from_secs(8));
    assert_eq!(set.provenance, Provenance::Fallback);
    assert_eq!(set.questions.len(), 20);
    assert!(set
        .questions
        .iter()
        .all(|q| q.level == Level::L300 || q.is_general()));
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(usage.count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failing_or_malformed_synthesis_falls_back_silently() {
    let request = cbt_core::model::QuestionRequest {
        mode: Mode::Mock,
        level: Level::L100,
        topic: None,
    };
    for behaviour in [
        Behaviour::Fail,
        Behaviour::Respond("I cannot help with that.".into()),
        Behaviour::Respond("[]".into()),
        Behaviour::Respond(r#"[{"question": "q", "options": ["a", "b"], "correctAnswer": 5}]"#.into()),
    ] {
        let usage = Arc::new(CountingUsage::default());
        let generator = FakeGenerator::new(behaviour);
        let source = source_with(Some(generator.clone()), usage.clone());
        let set = source.acquire(&request).await;
        assert_eq!(set.provenance, Provenance::Fallback);
        assert_eq!(set.questions.len(), 30);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1, "no retry");
        tokio::task::yield_now().await;
        assert_eq!(usage.count.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn successful_synthesis_tracks_usage() {
    let usage = Arc::new(CountingUsage::default());
    let source = source_with(
        Some(FakeGenerator::new(Behaviour::Respond(generated_json(20)))),
        usage.clone(),
    );
    let request = cbt_core::model::QuestionRequest {
        mode: Mode::Topic,
        level: Level::L200,
        topic: Some("Data Structures".into()),
    };
    let set = source.acquire(&request).await;
    assert_eq!(set.provenance, Provenance::Synthesized);
    assert!(set.questions.iter().all(|q| q.id.starts_with("ai-")));

    for _ in 0..10 {
        if usage.count.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(usage.count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn short_and_long_synthesis_are_resized() {
    let request = cbt_core::model::QuestionRequest {
        mode: Mode::Topic,
        level: Level::L400,
        topic: Some("Distributed Systems".into()),
    };

    let usage = Arc::new(CountingUsage::default());
    let short = source_with(
        Some(FakeGenerator::new(Behaviour::Respond(generated_json(5)))),
        usage.clone(),
    );
    let set = short.acquire(&request).await;
    assert_eq!(set.provenance, Provenance::Synthesized);
    assert_eq!(set.questions.len(), 20);
    assert_eq!(
        set.questions.iter().filter(|q| q.id.starts_with("ai-")).count(),
        5
    );

    let long = source_with(
        Some(FakeGenerator::new(Behaviour::Respond(generated_json(25)))),
        usage,
    );
    let set = long.acquire(&request).await;
    assert_eq!(set.questions.len(), 20);
    assert!(set.questions.iter().all(|q| q.id.starts_with("ai-")));
}

// ---------------------------------------------------------------------------
// Standard modes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn topic_mode_fifteen_of_twenty_scores_75() {
    let store = Arc::new(MemStore::default());
    let mut ctl = controller(store.clone(), EngineConfig::default());
    start(&mut ctl, Mode::Topic, Level::L200).await;
    assert_eq!(ctl.session().unwrap().total(), 20);
    assert_eq!(ctl.question_source_was_fallback(), Some(true));

    answer_standard(&mut ctl, 20, 15);
    let outcome = ctl.submit().unwrap();
    assert!(matches!(outcome, Outcome::Standard { score: 75, correct: 15, total: 20, .. }));
    assert_eq!(ctl.stage(), Stage::Result);
    assert!(ctl.remaining().is_none());

    ctl.flush_persistence().await;
    let results = store.results.lock().unwrap().clone();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].score, 75);
    assert_eq!(results[0].user_id, "student-1");
    assert_eq!(results[0].mode, Mode::Topic);
    assert_eq!(*store.points.lock().unwrap(), 2);
    assert!(store.badges.lock().unwrap().is_empty());
}

#[tokio::test]
async fn perfect_score_earns_points_and_badge() {
    let store = Arc::new(MemStore::default());
    let mut ctl = controller(store.clone(), EngineConfig::default());
    start(&mut ctl, Mode::Topic, Level::L100).await;
    answer_standard(&mut ctl, 20, 20);
    ctl.submit().unwrap();
    ctl.flush_persistence().await;

    assert_eq!(*store.points.lock().unwrap(), 5);
    assert_eq!(*store.badges.lock().unwrap(), vec!["perfect_score".to_string()]);
}

#[tokio::test]
async fn answers_can_be_changed_and_cleared() {
    let mut ctl = controller(Arc::new(MemStore::default()), EngineConfig::default());
    start(&mut ctl, Mode::Topic, Level::L100).await;

    let right = ctl.session().unwrap().questions[0].correct_index;
    ctl.select_answer(0, (right + 1) % 4).unwrap();
    ctl.select_answer(0, right).unwrap();
    ctl.select_answer(1, 0).unwrap();
    ctl.clear_answer(1).unwrap();
    assert_eq!(ctl.session().unwrap().answered_count(), 1);

    assert_eq!(ctl.next_question().unwrap(), 1);
    ctl.go_to(19).unwrap();
    assert_eq!(ctl.next_question().unwrap(), 19);
    assert_eq!(ctl.previous_question().unwrap(), 18);
    assert_eq!(
        ctl.go_to(20),
        Err(ControllerError::QuestionOutOfRange { index: 20, len: 20 })
    );
    assert_eq!(
        ctl.select_answer(0, 9),
        Err(ControllerError::OptionOutOfRange { option: 9, len: 4 })
    );

    match ctl.submit().unwrap() {
        Outcome::Standard { correct, score, .. } => {
            assert_eq!(correct, 1);
            assert_eq!(score, 5);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    // the snapshot is frozen once in result
    assert!(matches!(
        ctl.select_answer(2, 0),
        Err(ControllerError::InvalidTransition { stage: Stage::Result, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn mock_timer_expiry_scores_partial_answers() {
    let store = Arc::new(MemStore::default());
    let mut ctl = controller(store.clone(), EngineConfig::default());
    start(&mut ctl, Mode::Mock, Level::L300).await;
    assert_eq!(ctl.session().unwrap().total(), 30);
    assert_eq!(ctl.remaining(), Some(Duration::from_secs(40 * 60)));

    answer_standard(&mut ctl, 10, 7);

    let started = tokio::time::Instant::now();
    let outcome = loop {
        match ctl.tick().await {
            TickOutcome::Running { .. } => continue,
            TickOutcome::Finished(outcome) => break outcome,
            other => panic!("unexpected tick {other:?}"),
        }
    };

    assert_eq!(started.elapsed(), Duration::from_secs(40 * 60));
    assert!(matches!(outcome, Outcome::Standard { score: 23, correct: 7, total: 30, .. }));
    assert_eq!(ctl.stage(), Stage::Result);

    ctl.flush_persistence().await;
    assert_eq!(store.results.lock().unwrap()[0].score, 23);
    assert_eq!(*store.points.lock().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn expiry_reads_answers_given_just_before_it() {
    let config = EngineConfig {
        topic_time_limit: Duration::from_secs(3),
        ..EngineConfig::default()
    };
    let mut ctl = controller(Arc::new(MemStore::default()), config);
    start(&mut ctl, Mode::Topic, Level::L100).await;

    assert_eq!(ctl.tick().await, TickOutcome::Running { remaining_secs: 2 });
    assert_eq!(ctl.tick().await, TickOutcome::Running { remaining_secs: 1 });
    answer_standard(&mut ctl, 4, 4);

    match ctl.tick().await {
        TickOutcome::Finished(Outcome::Standard { correct, score, .. }) => {
            assert_eq!(correct, 4);
            assert_eq!(score, 20);
        }
        other => panic!("unexpected tick {other:?}"),
    }
}

#[tokio::test]
async fn persistence_failure_does_not_block_result() {
    let store = Arc::new(MemStore {
        fail: true,
        ..MemStore::default()
    });
    let mut ctl = controller(store, EngineConfig::default());
    start(&mut ctl, Mode::Topic, Level::L100).await;
    answer_standard(&mut ctl, 20, 20);

    ctl.submit().unwrap();
    assert_eq!(ctl.stage(), Stage::Result);
    assert_eq!(ctl.result().unwrap().score, 100);
    ctl.flush_persistence().await;
    assert_eq!(ctl.stage(), Stage::Result);
}

// ---------------------------------------------------------------------------
// Game mode
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn three_wrong_answers_end_the_game() {
    let store = Arc::new(MemStore::default());
    let mut ctl = controller(store.clone(), EngineConfig::default());
    start(&mut ctl, Mode::Game, Level::L100).await;
    assert_eq!(ctl.session().unwrap().total(), 50);
    assert_eq!(ctl.game().unwrap().lives, 3);
    assert_eq!(ctl.remaining(), Some(Duration::from_secs(30)));

    for expected_lives in [2u8, 1] {
        let feedback = ctl.answer_game(wrong_option(&ctl)).unwrap().unwrap();
        assert_eq!(feedback.verdict, Verdict::Wrong);
        assert_eq!(ctl.game().unwrap().lives, expected_lives);

        // input is ignored while feedback is showing, even an invalid key
        assert_eq!(ctl.answer_game(0).unwrap(), None);
        assert_eq!(ctl.answer_game(99).unwrap(), None);
        assert_eq!(ctl.game().unwrap().lives, expected_lives);

        let next = 3 - usize::from(expected_lives);
        assert_eq!(ctl.tick().await, TickOutcome::NextQuestion { index: next });
        assert_eq!(ctl.remaining(), Some(Duration::from_secs(30)));
    }

    let feedback = ctl.answer_game(wrong_option(&ctl)).unwrap().unwrap();
    assert_eq!(feedback.verdict, Verdict::Wrong);
    assert_eq!(ctl.stage(), Stage::Result);
    assert_eq!(ctl.game().unwrap().lives, 0);
    assert_eq!(
        ctl.outcome(),
        Some(&Outcome::Game {
            points: 0,
            lives_left: 0,
            answered: 3,
            total: 50
        })
    );

    // game sessions do not produce a percentage result
    ctl.flush_persistence().await;
    assert!(ctl.result().is_none());
    assert!(store.results.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn correct_game_answers_add_ten_points() {
    let mut ctl = controller(Arc::new(MemStore::default()), EngineConfig::default());
    start(&mut ctl, Mode::Game, Level::L200).await;

    for i in 0..3 {
        let right = ctl.current_question().unwrap().correct_index;
        let feedback = ctl.answer_game(right).unwrap().unwrap();
        assert_eq!(feedback.verdict, Verdict::Correct);
        assert_eq!(feedback.revealed_correct_index, right);
        assert_eq!(ctl.tick().await, TickOutcome::NextQuestion { index: i + 1 });
    }
    let game = ctl.game().unwrap();
    assert_eq!(game.score, 30);
    assert_eq!(game.lives, 3);

    assert!(matches!(
        ctl.select_answer(0, 0),
        Err(ControllerError::WrongMode { mode: Mode::Game, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn game_ends_after_the_last_question() {
    let config = EngineConfig {
        game_rules: GameRules {
            lives: 3,
            ..GameRules::default()
        },
        ..EngineConfig::default()
    };
    let mut ctl = controller(Arc::new(MemStore::default()), config);
    start(&mut ctl, Mode::Game, Level::L300).await;

    for i in 0..50 {
        let right = ctl.current_question().unwrap().correct_index;
        let feedback = ctl.answer_game(right).unwrap().unwrap();
        assert_eq!(feedback.verdict, Verdict::Correct);
        if i < 49 {
            assert_eq!(ctl.stage(), Stage::Exam);
            assert_eq!(ctl.tick().await, TickOutcome::NextQuestion { index: i + 1 });
        }
    }

    assert_eq!(ctl.stage(), Stage::Result);
    assert!(ctl.remaining().is_none());
    assert_eq!(
        ctl.outcome(),
        Some(&Outcome::Game {
            points: 500,
            lives_left: 3,
            answered: 50,
            total: 50
        })
    );
}

#[tokio::test(start_paused = true)]
async fn game_question_timeout_costs_a_life() {
    let mut ctl = controller(Arc::new(MemStore::default()), EngineConfig::default());
    start(&mut ctl, Mode::Game, Level::L400).await;

    let started = tokio::time::Instant::now();
    let (feedback, lives) = loop {
        match ctl.tick().await {
            TickOutcome::Running { .. } => continue,
            TickOutcome::LifeLost { feedback, lives } => break (feedback, lives),
            other => panic!("unexpected tick {other:?}"),
        }
    };
    assert_eq!(started.elapsed(), Duration::from_secs(30));
    assert_eq!(lives, 2);
    assert_eq!(feedback.verdict, Verdict::Wrong);
    assert_eq!(feedback.chosen, None);

    assert_eq!(ctl.tick().await, TickOutcome::NextQuestion { index: 1 });
    assert_eq!(ctl.remaining(), Some(Duration::from_secs(30)));
}

#[tokio::test(start_paused = true)]
async fn game_runs_out_of_time_three_times() {
    let mut ctl = controller(Arc::new(MemStore::default()), EngineConfig::default());
    start(&mut ctl, Mode::Game, Level::L100).await;

    let outcome = loop {
        if let TickOutcome::Finished(outcome) = ctl.tick().await {
            break outcome;
        }
    };
    assert_eq!(
        outcome,
        Outcome::Game {
            points: 0,
            lives_left: 0,
            answered: 3,
            total: 50
        }
    );
}

// ---------------------------------------------------------------------------
// Stage machine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_bank_still_fills_the_session() {
    let store = Arc::new(MemStore::default());
    let source = QuestionSource::offline(Arc::new(QuestionBank::default()), Some(1));
    assert!(!source.bank().is_empty());
    let mut ctl = SessionController::new(
        "student-1",
        Arc::new(source),
        ResultRecorder::new(store.clone()),
        EngineConfig::default(),
    );
    start(&mut ctl, Mode::Topic, Level::L200).await;
    assert_eq!(ctl.session().unwrap().total(), 20);
    assert_eq!(ctl.question_source_was_fallback(), Some(true));

    let outcome = ctl.submit().unwrap();
    assert!(matches!(outcome, Outcome::Standard { total: 20, .. }));
    ctl.flush_persistence().await;
    assert_eq!(store.results.lock().unwrap()[0].total_questions, 20);
}

#[tokio::test]
async fn invalid_actions_are_rejected() {
    let mut ctl = controller(Arc::new(MemStore::default()), EngineConfig::default());

    assert!(matches!(
        ctl.submit(),
        Err(ControllerError::InvalidTransition { stage: Stage::Menu, .. })
    ));
    assert!(ctl.start_exam(Level::L100, None).await.is_err());

    ctl.choose_mode(Mode::Topic).unwrap();
    assert_eq!(
        ctl.start_exam(Level::L100, Some("   ".into())).await.err(),
        Some(ControllerError::MissingTopic)
    );
    assert_eq!(ctl.stage(), Stage::Setup);
    assert!(ctl.open_review().is_err());
}

#[tokio::test(start_paused = true)]
async fn leaving_the_exam_cancels_the_timer() {
    let store = Arc::new(MemStore::default());
    let mut ctl = controller(store.clone(), EngineConfig::default());
    start(&mut ctl, Mode::Mock, Level::L200).await;

    ctl.return_to_menu().unwrap();
    assert_eq!(ctl.stage(), Stage::Menu);
    assert!(ctl.session().is_none());
    assert!(ctl.remaining().is_none());

    let waited = tokio::time::timeout(Duration::from_secs(3600), ctl.tick()).await;
    assert!(waited.is_err(), "no tick may fire after leaving the exam");
    assert!(store.results.lock().unwrap().is_empty());
}

#[tokio::test]
async fn review_then_new_session_starts_fresh() {
    let mut ctl = controller(Arc::new(MemStore::default()), EngineConfig::default());
    start(&mut ctl, Mode::Topic, Level::L200).await;
    answer_standard(&mut ctl, 5, 3);
    let first_id = ctl.session().unwrap().id;
    assert!(ctl.review_items().is_empty());

    ctl.submit().unwrap();
    ctl.open_review().unwrap();
    assert_eq!(ctl.stage(), Stage::Review);

    let items = ctl.review_items();
    assert_eq!(items.len(), 20);
    assert_eq!(items.iter().filter(|i| i.chosen.is_some()).count(), 5);
    assert_eq!(items.iter().filter(|i| i.is_correct()).count(), 3);
    assert_eq!(ctl.session().unwrap().stage, Stage::Review);

    ctl.return_to_menu().unwrap();
    start(&mut ctl, Mode::Topic, Level::L200).await;
    let session = ctl.session().unwrap();
    assert_ne!(session.id, first_id);
    assert!(session.answers.is_empty());
    assert!(ctl.outcome().is_none());
}
