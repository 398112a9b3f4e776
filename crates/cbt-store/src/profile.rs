//! Per-user gamification state and generator usage counters.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's accumulated points and badges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub points: u32,
    #[serde(default)]
    pub badges: BTreeSet<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// All profiles, keyed by user id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileBook {
    profiles: BTreeMap<String, Profile>,
}

impl ProfileBook {
    fn entry(&mut self, user_id: &str) -> &mut Profile {
        let profile = self
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Profile {
                user_id: user_id.to_string(),
                ..Profile::default()
            });
        profile.updated_at = Some(Utc::now());
        profile
    }

    /// Increment a user's points, creating the profile if needed.
    pub fn add_points(&mut self, user_id: &str, points: u32) -> u32 {
        let profile = self.entry(user_id);
        profile.points = profile.points.saturating_add(points);
        profile.points
    }

    /// Add a badge; returns `false` if the user already had it.
    pub fn award_badge(&mut self, user_id: &str, badge: &str) -> bool {
        self.entry(user_id).badges.insert(badge.to_string())
    }

    pub fn get(&self, user_id: &str) -> Option<&Profile> {
        self.profiles.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// The top `limit` profiles by points, ties broken by user id.
    pub fn leaderboard(&self, limit: usize) -> Vec<Profile> {
        let mut ranked: Vec<_> = self.profiles.values().cloned().collect();
        ranked.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.user_id.cmp(&b.user_id)));
        ranked.truncate(limit);
        ranked
    }
}

/// Successful generations per model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLedger {
    #[serde(default)]
    pub generations: BTreeMap<String, u64>,
}

impl UsageLedger {
    pub fn record(&mut self, model: &str) -> u64 {
        let count = self.generations.entry(model.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn count(&self, model: &str) -> u64 {
        self.generations.get(model).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.generations.values().sum()
    }
}
