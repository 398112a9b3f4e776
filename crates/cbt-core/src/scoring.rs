//! Scoring: one-shot percentage scoring for standard modes, the incremental
//! lives/points loop for game mode, and the reward thresholds applied after
//! a standard session.

use serde::{Deserialize, Serialize};

use crate::model::{Outcome, Question, Reward, Session};

/// Badge granted for a 100% standard session.
pub const PERFECT_SCORE_BADGE: &str = "perfect_score";

/// `round(100 * correct / total)`, rounding halves up.
///
/// Integer arithmetic: `floor((200c + t) / 2t)` equals `floor(100c/t + 1/2)`.
pub fn percentage(correct: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let correct = correct.min(total);
    ((200 * correct + total) / (2 * total)) as u8
}

/// Contribution points and achievements for a standard score.
pub fn reward_for(score: u8) -> Reward {
    let points = match score {
        80.. => 5,
        50..=79 => 2,
        _ => 0,
    };
    Reward {
        points,
        perfect_score: score == 100,
    }
}

/// Score a finished standard session. Unanswered questions count as wrong.
pub fn score_standard(session: &Session) -> Outcome {
    let total = session.total();
    let correct = session.correct_count();
    let score = percentage(correct, total);
    Outcome::Standard {
        score,
        correct,
        total,
        reward: reward_for(score),
    }
}

// ---------------------------------------------------------------------------
// Game mode
// ---------------------------------------------------------------------------

/// Tunables for game mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameRules {
    pub lives: u8,
    pub points_per_correct: u32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            lives: 3,
            points_per_correct: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Correct,
    Wrong,
}

/// Transient feedback shown after a game answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub verdict: Verdict,
    pub revealed_correct_index: usize,
    /// `None` when the question timed out.
    pub chosen: Option<usize>,
}

/// Live state of a game-mode session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub lives: u8,
    pub score: u32,
    pub current_index: usize,
    pub feedback: Option<Feedback>,
    total: usize,
    answered: usize,
    points_per_correct: u32,
    over: bool,
}

impl GameState {
    pub fn new(total: usize, rules: GameRules) -> Self {
        Self {
            lives: rules.lives,
            score: 0,
            current_index: 0,
            feedback: None,
            total,
            answered: 0,
            points_per_correct: rules.points_per_correct,
            over: total == 0 || rules.lives == 0,
        }
    }

    /// Whether new input is accepted right now.
    pub fn accepts_input(&self) -> bool {
        !self.over && self.feedback.is_none()
    }

    /// Score an answer to the current question; `None` means it timed out.
    ///
    /// Returns `None` (and changes nothing) while feedback is visible or
    /// after the game ended.
    pub fn answer(&mut self, question: &Question, chosen: Option<usize>) -> Option<Feedback> {
        if !self.accepts_input() {
            return None;
        }

        let verdict = match chosen {
            Some(option) if question.is_correct(option) => {
                self.score += self.points_per_correct;
                Verdict::Correct
            }
            _ => {
                self.lives = self.lives.saturating_sub(1);
                Verdict::Wrong
            }
        };
        self.answered += 1;

        let feedback = Feedback {
            verdict,
            revealed_correct_index: question.correct_index,
            chosen,
        };
        self.feedback = Some(feedback);

        if self.lives == 0 || self.current_index + 1 >= self.total {
            self.over = true;
        }
        Some(feedback)
    }

    /// Clear visible feedback and move to the next question.
    ///
    /// Returns `false` if there was nothing to advance past.
    pub fn advance(&mut self) -> bool {
        if self.over || self.feedback.take().is_none() {
            return false;
        }
        self.current_index += 1;
        true
    }

    pub fn is_over(&self) -> bool {
        self.over
    }

    pub fn answered(&self) -> usize {
        self.answered
    }

    pub fn outcome(&self) -> Outcome {
        Outcome::Game {
            points: self.score,
            lives_left: self.lives,
            answered: self.answered,
            total: self.total,
        }
    }
}
