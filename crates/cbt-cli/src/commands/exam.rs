//! The `cbt exam` command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use cbt_core::model::{Level, Mode, Outcome, Stage};
use cbt_core::persistence::ResultRecorder;
use cbt_core::scoring::{Feedback, Verdict, PERFECT_SCORE_BADGE};
use cbt_core::{EngineConfig, QuestionSource, SessionController, TickOutcome};
use cbt_providers::config::load_config_from;
use cbt_store::FileStore;

use super::{load_bank, option_letter, parse_option};

pub struct ExamArgs {
    pub mode: Mode,
    pub level: Level,
    pub topic: Option<String>,
    pub user: String,
    pub offline: bool,
    pub seed: Option<u64>,
    pub config: Option<PathBuf>,
    pub store: Option<PathBuf>,
    pub bank: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub async fn execute(args: ExamArgs) -> Result<()> {
    let config = load_config_from(args.config.as_deref())?;
    let bank = load_bank(args.bank.as_deref().or(config.bank_path.as_deref()))?;
    let store_dir = args.store.unwrap_or_else(|| config.store_dir.clone());
    let store = Arc::new(FileStore::open(&store_dir).await?);

    let generator = if args.offline {
        None
    } else {
        config.default_generator()?
    };
    let mut source_config = config.source_config();
    if args.seed.is_some() {
        source_config.seed = args.seed;
    }
    let source = QuestionSource::new(generator, Arc::new(bank), store.clone(), source_config);

    let mut controller = SessionController::new(
        args.user.clone(),
        Arc::new(source),
        ResultRecorder::new(store.clone()),
        EngineConfig::default(),
    );

    controller.choose_mode(args.mode)?;
    println!(
        "Preparing a {} exam at level {} ({} questions)...",
        args.mode,
        args.level,
        args.mode.question_count()
    );
    let session = controller.start_exam(args.level, args.topic).await?;
    println!(
        "{} questions ready. Time limit: {}.",
        session.total(),
        time_limit_label(args.mode)
    );
    print_help(args.mode);

    if controller.stage() == Stage::Exam {
        show_current(&controller);
    }
    run_loop(&mut controller).await?;

    if controller.stage() != Stage::Result {
        println!("Exam abandoned; nothing was recorded.");
        return Ok(());
    }

    if let Some(outcome) = controller.outcome().copied() {
        print_outcome(&outcome);
    }
    controller.open_review()?;
    print_review(&controller);
    controller.flush_persistence().await;

    match store.profile(&args.user).await {
        Ok(Some(profile)) => println!(
            "\n{} has {} points and {} badge(s). Results are stored in {}",
            profile.user_id,
            profile.points,
            profile.badges.len(),
            store_dir.display()
        ),
        Ok(None) => {}
        Err(e) => tracing::warn!("could not read profile: {e:#}"),
    }
    Ok(())
}

/// Feed stdin lines and timer ticks to the controller until the exam ends.
async fn run_loop(controller: &mut SessionController) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while controller.stage() == Stage::Exam {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if handle_line(controller, line.trim()) == Flow::Quit {
                        controller.return_to_menu()?;
                    }
                }
                None => {
                    println!("End of input, submitting.");
                    controller.submit()?;
                }
            },
            tick = controller.tick() => render_tick(controller, tick),
        }
    }
    Ok(())
}

fn handle_line(controller: &mut SessionController, input: &str) -> Flow {
    let command = input.to_lowercase();
    match command.as_str() {
        "" => Flow::Continue,
        "quit" | "exit" => Flow::Quit,
        "help" | "?" => {
            print_help(controller.mode().unwrap_or(Mode::Topic));
            Flow::Continue
        }
        "submit" => {
            if let Err(e) = controller.submit() {
                println!("{e}");
            }
            Flow::Continue
        }
        _ if controller.mode() == Some(Mode::Game) => {
            handle_game(controller, &command);
            Flow::Continue
        }
        _ => {
            handle_standard(controller, &command);
            Flow::Continue
        }
    }
}

fn handle_standard(controller: &mut SessionController, command: &str) {
    let Some(current) = controller.current_index() else {
        return;
    };

    let result = if command == "next" || command == "n" {
        controller.next_question().map(|_| true)
    } else if command == "prev" || command == "p" {
        controller.previous_question().map(|_| true)
    } else if command == "clear" {
        controller.clear_answer(current).map(|_| true)
    } else if command == "status" {
        print_status(controller);
        Ok(false)
    } else if let Some(arg) = command.strip_prefix("goto ") {
        match arg.trim().parse::<usize>() {
            Ok(n) if n >= 1 => controller.go_to(n - 1).map(|_| true),
            _ => {
                println!("usage: goto <question number>");
                Ok(false)
            }
        }
    } else if let Some(option) = parse_option(command) {
        answer_and_advance(controller, current, option)
    } else {
        println!("Unrecognised input '{command}'. Type help for commands.");
        Ok(false)
    };

    match result {
        Ok(true) => show_current(controller),
        Ok(false) => {}
        Err(e) => println!("{e}"),
    }
}

fn answer_and_advance(
    controller: &mut SessionController,
    current: usize,
    option: usize,
) -> Result<bool, cbt_core::ControllerError> {
    controller.select_answer(current, option)?;
    let total = controller.session().map_or(0, |s| s.total());
    if current + 1 < total {
        controller.next_question()?;
        return Ok(true);
    }
    println!("Last question answered. Type submit to finish, or prev/goto to revisit.");
    print_status(controller);
    Ok(false)
}

fn handle_game(controller: &mut SessionController, command: &str) {
    let Some(option) = parse_option(command) else {
        println!("Answer with a letter, or type quit.");
        return;
    };
    match controller.answer_game(option) {
        Ok(Some(feedback)) => print_feedback(controller, &feedback),
        Ok(None) => {}
        Err(e) => println!("{e}"),
    }
}

fn render_tick(controller: &SessionController, tick: TickOutcome) {
    match tick {
        TickOutcome::Running { remaining_secs } => {
            if matches!(remaining_secs, 60 | 10 | 5) || remaining_secs % 300 == 0 {
                println!("[{} left]", format_secs(remaining_secs));
            }
        }
        TickOutcome::NextQuestion { .. } => show_current(controller),
        TickOutcome::LifeLost { feedback, lives } => println!(
            "Time's up! The answer was ({}). {lives} lives left.",
            option_letter(feedback.revealed_correct_index)
        ),
        TickOutcome::Finished(_) => println!("Time's up!"),
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn time_limit_label(mode: Mode) -> String {
    let limit = EngineConfig::default().time_limit(mode);
    match mode {
        Mode::Game => format!("{}s per question", limit.as_secs()),
        _ => format!("{} minutes", limit.as_secs() / 60),
    }
}

fn print_help(mode: Mode) {
    match mode {
        Mode::Game => println!("Answer with a-f. Three wrong answers end the game. quit to abandon."),
        _ => println!(
            "Answer with a-f. Commands: next, prev, goto N, clear, status, submit, quit."
        ),
    }
}

fn show_current(controller: &SessionController) {
    let (Some(session), Some(index), Some(question)) = (
        controller.session(),
        controller.current_index(),
        controller.current_question(),
    ) else {
        return;
    };

    let remaining = controller
        .remaining()
        .map(|d| format_secs(d.as_secs()))
        .unwrap_or_default();
    match controller.game() {
        Some(game) => println!(
            "\nQuestion {}/{}  lives {}  points {}  [{remaining}]",
            index + 1,
            session.total(),
            game.lives,
            game.score
        ),
        None => println!(
            "\nQuestion {}/{}  answered {}/{}  [{remaining} left]",
            index + 1,
            session.total(),
            session.answered_count(),
            session.total()
        ),
    }
    println!("{}", question.text);

    let chosen = session.answers.get(&index).copied();
    for (i, option) in question.options.iter().enumerate() {
        let marker = if chosen == Some(i) { '*' } else { ' ' };
        println!(" {marker}({}) {option}", option_letter(i));
    }
}

fn print_status(controller: &SessionController) {
    let Some(session) = controller.session() else {
        return;
    };
    let unanswered: Vec<String> = (0..session.total())
        .filter(|i| !session.answers.contains_key(i))
        .map(|i| (i + 1).to_string())
        .collect();
    let remaining = controller.remaining().unwrap_or(Duration::ZERO);
    println!(
        "{}/{} answered, {} left.",
        session.answered_count(),
        session.total(),
        format_secs(remaining.as_secs())
    );
    if !unanswered.is_empty() {
        println!("Unanswered: {}", unanswered.join(", "));
    }
}

fn print_feedback(controller: &SessionController, feedback: &Feedback) {
    let (lives, points) = controller.game().map_or((0, 0), |g| (g.lives, g.score));
    match feedback.verdict {
        Verdict::Correct => println!("Correct! {points} points."),
        Verdict::Wrong => println!(
            "Wrong. The answer was ({}). {lives} lives left.",
            option_letter(feedback.revealed_correct_index)
        ),
    }
}

fn print_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Standard {
            score,
            correct,
            total,
            reward,
        } => {
            println!("\nScore: {score}% ({correct}/{total} correct)");
            if reward.points > 0 {
                println!("+{} points", reward.points);
            }
            if reward.perfect_score {
                println!("Perfect score! Badge earned: {PERFECT_SCORE_BADGE}");
            }
        }
        Outcome::Game {
            points,
            lives_left,
            answered,
            total,
        } => println!(
            "\nGame over: {points} points ({answered}/{total} answered, {lives_left} lives left)"
        ),
    }
}

fn print_review(controller: &SessionController) {
    let items = controller.review_items();
    let shown = controller.game().map_or(items.len(), |g| g.answered());

    println!("\nReview");
    for item in items.iter().take(shown) {
        let question = item.question;
        let mark = match item.chosen {
            None => "unanswered",
            Some(_) if item.is_correct() => "correct",
            Some(_) => "wrong",
        };
        println!("{:>2}. [{mark}] {}", item.index + 1, question.text);
        if let Some(chosen) = item.chosen.filter(|_| !item.is_correct()) {
            if let Some(text) = question.options.get(chosen) {
                println!("    your answer:    ({}) {text}", option_letter(chosen));
            }
        }
        if let Some(text) = question.options.get(question.correct_index) {
            println!(
                "    correct answer: ({}) {text}",
                option_letter(question.correct_index)
            );
        }
    }
}

fn format_secs(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
