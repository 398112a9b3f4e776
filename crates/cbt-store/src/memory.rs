//! In-process store for embedding and tests.

use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;

use cbt_core::model::ExamResult;
use cbt_core::traits::{ResultStore, UsageSink};

use crate::profile::{Profile, ProfileBook, UsageLedger};

#[derive(Default)]
struct Inner {
    results: Vec<ExamResult>,
    profiles: ProfileBook,
    usage: UsageLedger,
}

/// Keeps results, profiles and usage counters in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn results(&self) -> Vec<ExamResult> {
        self.lock().results.clone()
    }

    /// A user's results, newest first.
    pub fn results_for(&self, user_id: &str) -> Vec<ExamResult> {
        let mut results: Vec<_> = self
            .lock()
            .results
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        results
    }

    pub fn profile(&self, user_id: &str) -> Option<Profile> {
        self.lock().profiles.get(user_id).cloned()
    }

    pub fn leaderboard(&self, limit: usize) -> Vec<Profile> {
        self.lock().profiles.leaderboard(limit)
    }

    pub fn usage(&self) -> UsageLedger {
        self.lock().usage.clone()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn append_result(&self, result: &ExamResult) -> Result<()> {
        self.lock().results.push(result.clone());
        Ok(())
    }

    async fn add_points(&self, user_id: &str, points: u32) -> Result<()> {
        self.lock().profiles.add_points(user_id, points);
        Ok(())
    }

    async fn award_badge(&self, user_id: &str, badge: &str) -> Result<()> {
        self.lock().profiles.award_badge(user_id, badge);
        Ok(())
    }
}

#[async_trait]
impl UsageSink for MemoryStore {
    async fn record_generation(&self, model: &str) -> Result<()> {
        self.lock().usage.record(model);
        Ok(())
    }
}
