//! Result persistence adapter.
//!
//! Hands a finished result to the durable store on a detached task. Every
//! failure is logged and dropped; none of them can reach the exam flow.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::PersistenceError;
use crate::model::{ExamResult, Reward};
use crate::scoring::PERFECT_SCORE_BADGE;
use crate::traits::ResultStore;

/// Fire-and-forget writer of results and gamification effects.
#[derive(Clone)]
pub struct ResultRecorder {
    store: Arc<dyn ResultStore>,
}

impl ResultRecorder {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    /// Spawn the writes for one result. The returned handle may be ignored.
    pub fn record(&self, result: ExamResult, reward: Reward) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            for error in write_all(store.as_ref(), &result, reward).await {
                tracing::error!("{error}");
            }
        })
    }
}

/// Perform every write, collecting failures instead of stopping at the first.
pub async fn write_all(
    store: &dyn ResultStore,
    result: &ExamResult,
    reward: Reward,
) -> Vec<PersistenceError> {
    let mut errors = Vec::new();

    if let Err(e) = store.append_result(result).await {
        errors.push(PersistenceError::AppendResult {
            result_id: result.id,
            message: format!("{e:#}"),
        });
    }

    if reward.points > 0 {
        if let Err(e) = store.add_points(&result.user_id, reward.points).await {
            errors.push(PersistenceError::GrantPoints {
                user_id: result.user_id.clone(),
                points: reward.points,
                message: format!("{e:#}"),
            });
        }
    }

    if reward.perfect_score {
        if let Err(e) = store.award_badge(&result.user_id, PERFECT_SCORE_BADGE).await {
            errors.push(PersistenceError::AwardBadge {
                user_id: result.user_id.clone(),
                badge: PERFECT_SCORE_BADGE.to_string(),
                message: format!("{e:#}"),
            });
        }
    }

    if errors.is_empty() {
        tracing::debug!(
            "persisted result {} (score {}, +{} points)",
            result.id,
            result.score,
            reward.points
        );
    }
    errors
}
