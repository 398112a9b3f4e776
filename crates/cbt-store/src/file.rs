//! Directory-backed store.
//!
//! Layout under the root directory:
//! - `results.jsonl`: one `ExamResult` per line, append-only
//! - `profiles.json`: points and badges per user
//! - `usage.json`: successful generations per model

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use cbt_core::model::ExamResult;
use cbt_core::traits::{ResultStore, UsageSink};

use crate::profile::{Profile, ProfileBook, UsageLedger};

const RESULTS_FILE: &str = "results.jsonl";
const PROFILES_FILE: &str = "profiles.json";
const USAGE_FILE: &str = "usage.json";

/// JSON files under one directory. All writes go through one async lock.
pub struct FileStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create store directory {}", root.display()))?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }

    /// Every stored result, oldest first. Unreadable lines are skipped.
    pub async fn results(&self) -> Result<Vec<ExamResult>> {
        let path = self.path(RESULTS_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()))
            }
        };

        let mut results = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ExamResult>(line) {
                Ok(result) => results.push(result),
                Err(e) => tracing::warn!(
                    "skipping malformed record at {}:{}: {e}",
                    path.display(),
                    line_no + 1
                ),
            }
        }
        Ok(results)
    }

    /// A user's results, newest first.
    pub async fn results_for(&self, user_id: &str) -> Result<Vec<ExamResult>> {
        let mut results: Vec<_> = self
            .results()
            .await?
            .into_iter()
            .filter(|r| r.user_id == user_id)
            .collect();
        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(results)
    }

    pub async fn profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let book: ProfileBook = self.read_json(PROFILES_FILE).await?;
        Ok(book.get(user_id).cloned())
    }

    pub async fn leaderboard(&self, limit: usize) -> Result<Vec<Profile>> {
        let book: ProfileBook = self.read_json(PROFILES_FILE).await?;
        Ok(book.leaderboard(limit))
    }

    pub async fn usage(&self) -> Result<UsageLedger> {
        self.read_json(USAGE_FILE).await
    }

    async fn read_json<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T> {
        let path = self.path(file);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    /// Replace `file` via a temporary sibling and a rename.
    async fn write_json<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.path(file);
        let tmp = self.path(&format!("{file}.tmp"));
        let json = serde_json::to_string_pretty(value)
            .with_context(|| format!("failed to serialize {file}"))?;
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    async fn update_profiles<R>(&self, f: impl FnOnce(&mut ProfileBook) -> R) -> Result<R> {
        let _guard = self.lock.lock().await;
        let mut book: ProfileBook = self.read_json(PROFILES_FILE).await?;
        let out = f(&mut book);
        self.write_json(PROFILES_FILE, &book).await?;
        Ok(out)
    }
}

#[async_trait]
impl ResultStore for FileStore {
    async fn append_result(&self, result: &ExamResult) -> Result<()> {
        let mut line = serde_json::to_string(result).context("failed to serialize result")?;
        line.push('\n');

        let path = self.path(RESULTS_FILE);
        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to append to {}", path.display()))?;
        file.flush().await?;
        tracing::debug!("appended result {} to {}", result.id, path.display());
        Ok(())
    }

    async fn add_points(&self, user_id: &str, points: u32) -> Result<()> {
        let total = self
            .update_profiles(|book| book.add_points(user_id, points))
            .await?;
        tracing::debug!("{user_id} now has {total} points");
        Ok(())
    }

    async fn award_badge(&self, user_id: &str, badge: &str) -> Result<()> {
        let added = self
            .update_profiles(|book| book.award_badge(user_id, badge))
            .await?;
        if added {
            tracing::info!("{user_id} earned the {badge} badge");
        }
        Ok(())
    }
}

#[async_trait]
impl UsageSink for FileStore {
    async fn record_generation(&self, model: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut usage: UsageLedger = self.read_json(USAGE_FILE).await?;
        usage.record(model);
        self.write_json(USAGE_FILE, &usage).await
    }
}
