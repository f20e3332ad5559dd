/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::command::CommandData;
use crate::config::SchedulerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueType {
    Main,
    Retry,
    Error,
}

impl QueueType {
    pub const ALL: [QueueType; 3] = [QueueType::Main, QueueType::Retry, QueueType::Error];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "current",
            Self::Retry => "retry",
            Self::Error => "error",
        }
    }

    pub fn from_str(input: &str) -> Option<Self> {
        match input {
            "current" => Some(Self::Main),
            "retry" => Some(Self::Retry),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub main: usize,
    pub retry: usize,
    pub error: usize,
}

/// The main, retry and error queues.
///
/// Main is ordered by priority, FIFO within a priority. Retry and error are
/// FIFO and bounded; the oldest entry is evicted on overflow.
#[derive(Debug, Default)]
pub struct CommandQueues {
    main: VecDeque<CommandData>,
    retry: VecDeque<CommandData>,
    error: VecDeque<CommandData>,
    retry_capacity: usize,
    error_capacity: usize,
    retry_min_backoff_ms: i64,
    error_retention_ms: i64,
}

/// Saturates instead of wrapping for absurdly large configured ages.
fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

impl CommandQueues {
    pub fn new(settings: &SchedulerSettings) -> Self {
        Self {
            retry_capacity: settings.retry_queue_capacity.max(1),
            error_capacity: settings.error_queue_capacity.max(1),
            retry_min_backoff_ms: secs_to_ms(settings.retry_min_backoff_secs),
            error_retention_ms: secs_to_ms(settings.error_retention_secs),
            ..Self::default()
        }
    }

    fn queue(&self, ty: QueueType) -> &VecDeque<CommandData> {
        match ty {
            QueueType::Main => &self.main,
            QueueType::Retry => &self.retry,
            QueueType::Error => &self.error,
        }
    }

    fn queue_mut(&mut self, ty: QueueType) -> &mut VecDeque<CommandData> {
        match ty {
            QueueType::Main => &mut self.main,
            QueueType::Retry => &mut self.retry,
            QueueType::Error => &mut self.error,
        }
    }

    pub fn counts(&self) -> QueueCounts {
        QueueCounts {
            main: self.main.len(),
            retry: self.retry.len(),
            error: self.error.len(),
        }
    }

    pub fn entries(&self, ty: QueueType) -> impl Iterator<Item = &CommandData> {
        self.queue(ty).iter()
    }

    /// Where an equal command is queued, if anywhere.
    pub fn find(&self, cmd: &CommandData) -> Option<QueueType> {
        QueueType::ALL
            .into_iter()
            .find(|ty| self.queue(*ty).iter().any(|c| c == cmd))
    }

    pub fn has_runnable(&self) -> bool {
        !self.main.is_empty()
    }

    pub fn has_foreground(&self) -> bool {
        self.main.iter().any(|c| c.in_foreground)
    }

    fn past_backoff(&self, cmd: &CommandData, now: i64) -> bool {
        cmd.result.last_executed_ms.saturating_add(self.retry_min_backoff_ms) <= now
    }

    fn insert_main(&mut self, cmd: CommandData) {
        let priority = cmd.priority();
        let pos = self
            .main
            .iter()
            .position(|c| c.priority() < priority)
            .unwrap_or(self.main.len());
        self.main.insert(pos, cmd);
    }

    /// Adds `cmd` to the main queue unless an equal command is already
    /// waiting. An equal command in the retry or error queue is superseded
    /// when `cmd` was launched manually or the old one is past its back-off.
    /// Returns whether `cmd` was queued.
    pub fn admit(&mut self, cmd: CommandData, now: i64) -> bool {
        if let Some(pos) = self.main.iter().position(|c| *c == cmd) {
            let upgrade = cmd.in_foreground && !self.main[pos].in_foreground;
            self.main[pos].manually_launched |= cmd.manually_launched;
            if upgrade {
                if let Some(mut existing) = self.main.remove(pos) {
                    existing.in_foreground = true;
                    self.insert_main(existing);
                }
            }
            debug!(command = %cmd, "duplicate of a queued command");
            return false;
        }
        for ty in [QueueType::Retry, QueueType::Error] {
            let Some(pos) = self.queue(ty).iter().position(|c| *c == cmd) else {
                continue;
            };
            let supersede = cmd.manually_launched || (ty == QueueType::Retry && self.past_backoff(&self.queue(ty)[pos], now));
            if !supersede {
                debug!(command = %cmd, queue = ty.as_str(), "duplicate of a waiting command");
                return false;
            }
            if let Some(old) = self.queue_mut(ty).remove(pos) {
                debug!(command = %old, queue = ty.as_str(), "superseded");
            }
        }
        self.insert_main(cmd);
        true
    }

    /// Next command to run. With `foreground_only`, background commands are
    /// held back in their original order.
    pub fn pop_next(&mut self, foreground_only: bool) -> Option<CommandData> {
        if !foreground_only {
            return self.main.pop_front();
        }
        let mut holding = VecDeque::with_capacity(self.main.len());
        let mut found = None;
        while let Some(cmd) = self.main.pop_front() {
            if found.is_none() && cmd.in_foreground {
                found = Some(cmd);
            } else {
                holding.push_back(cmd);
            }
        }
        self.main = holding;
        found
    }

    pub fn push_retry(&mut self, cmd: CommandData) {
        if let Some(pos) = self.retry.iter().position(|c| *c == cmd) {
            self.retry.remove(pos);
        }
        while self.retry.len() >= self.retry_capacity {
            if let Some(evicted) = self.retry.pop_front() {
                warn!(command = %evicted, "retry queue full, evicting oldest");
            }
        }
        self.retry.push_back(cmd);
    }

    pub fn push_error(&mut self, cmd: CommandData, now: i64) {
        self.purge_errors(now);
        if let Some(pos) = self.error.iter().position(|c| *c == cmd) {
            self.error.remove(pos);
        }
        while self.error.len() >= self.error_capacity {
            if let Some(evicted) = self.error.pop_front() {
                warn!(command = %evicted, "error queue full, evicting oldest");
            }
        }
        self.error.push_back(cmd);
    }

    /// Drops error entries older than the retention age.
    pub fn purge_errors(&mut self, now: i64) -> usize {
        let before = self.error.len();
        let retention = self.error_retention_ms;
        self.error.retain(|c| {
            let at = if c.result.last_executed_ms > 0 {
                c.result.last_executed_ms
            } else {
                c.created_ms
            };
            now.saturating_sub(at) <= retention
        });
        before - self.error.len()
    }

    /// Moves retry entries past their back-off to the main queue.
    pub fn promote_retries(&mut self, now: i64) -> usize {
        let mut promoted = 0;
        let waiting = std::mem::take(&mut self.retry);
        for cmd in waiting {
            if !self.past_backoff(&cmd, now) {
                self.retry.push_back(cmd);
            } else if self.main.iter().any(|c| *c == cmd) {
                debug!(command = %cmd, "retry dropped, an equal command is queued");
            } else {
                self.insert_main(cmd);
                promoted += 1;
            }
        }
        promoted
    }

    /// Removes every queued command equal to `target`.
    pub fn remove_equal(&mut self, target: &CommandData) -> usize {
        let mut removed = 0;
        for ty in QueueType::ALL {
            let q = self.queue_mut(ty);
            let before = q.len();
            q.retain(|c| c != target);
            removed += before - q.len();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.main.clear();
        self.retry.clear();
        self.error.clear();
    }

    pub fn snapshot(&self) -> Vec<(QueueType, Vec<CommandData>)> {
        QueueType::ALL
            .into_iter()
            .map(|ty| (ty, self.queue(ty).iter().cloned().collect()))
            .collect()
    }

    /// Puts back what a previous run persisted.
    pub fn restore(&mut self, entries: Vec<(QueueType, CommandData)>, now: i64) {
        for (ty, cmd) in entries {
            match ty {
                QueueType::Main => {
                    self.admit(cmd, now);
                }
                QueueType::Retry => self.push_retry(cmd),
                QueueType::Error => self.push_error(cmd, now),
            }
        }
    }
}

/// SQLite persistence of the three queues.
#[derive(Debug, Clone)]
pub struct QueueStore {
    db_path: PathBuf,
}

impl QueueStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        init_db(&db_path)?;
        Ok(Self { db_path })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Replaces the stored queues in one transaction.
    pub fn save_blocking(&self, snapshot: &[(QueueType, Vec<CommandData>)]) -> Result<usize> {
        let mut conn = Connection::open(&self.db_path)
            .with_context(|| format!("open queue db: {}", self.db_path.display()))?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM command_queue", [])?;
        let mut written = 0;
        for (ty, commands) in snapshot {
            for (position, cmd) in commands.iter().enumerate() {
                let json = serde_json::to_string(cmd).context("serialize command")?;
                tx.execute(
                    "INSERT INTO command_queue (queue_type, position, command_json) VALUES (?1, ?2, ?3)",
                    params![ty.as_str(), position as i64, json],
                )?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    pub async fn save(&self, snapshot: Vec<(QueueType, Vec<CommandData>)>) -> Result<usize> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.save_blocking(&snapshot)).await?
    }

    pub fn load_blocking(&self) -> Result<Vec<(QueueType, CommandData)>> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("open queue db: {}", self.db_path.display()))?;
        let mut stmt =
            conn.prepare("SELECT queue_type, command_json FROM command_queue ORDER BY queue_type, position")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let ty: String = row.get(0)?;
            let json: String = row.get(1)?;
            let Some(ty) = QueueType::from_str(&ty) else {
                warn!(queue = %ty, "unknown queue type in db");
                continue;
            };
            match serde_json::from_str::<CommandData>(&json) {
                Ok(cmd) => out.push((ty, cmd)),
                Err(e) => warn!("dropping unreadable queued command: {e}"),
            }
        }
        info!(count = out.len(), "loaded queued commands");
        Ok(out)
    }

    pub async fn load(&self) -> Result<Vec<(QueueType, CommandData)>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.load_blocking()).await?
    }
}

fn init_db(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create dir: {}", parent.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("open db: {}", path.display()))?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS command_queue (
          queue_type TEXT NOT NULL,
          position INTEGER NOT NULL,
          command_json TEXT NOT NULL,
          PRIMARY KEY (queue_type, position)
        );
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandKind, TimelineType};

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            retry_queue_capacity: 2,
            error_queue_capacity: 2,
            retry_min_backoff_secs: 10,
            error_retention_secs: 100,
            ..SchedulerSettings::default()
        }
    }

    fn home(account: &str) -> CommandData {
        CommandData::fetch_timeline(account, TimelineType::Home, 0)
    }

    #[test]
    fn equal_submissions_queue_once() {
        let mut q = CommandQueues::new(&settings());
        assert!(q.admit(home("a@m"), 0));
        assert!(!q.admit(home("a@m"), 0));
        assert_eq!(q.counts().main, 1);
    }

    #[test]
    fn priority_then_fifo() {
        let mut q = CommandQueues::new(&settings());
        q.admit(home("a@m"), 0);
        q.admit(home("b@m"), 0);
        q.admit(CommandData::update_status("a@m", "hi"), 0);
        let order: Vec<CommandKind> = std::iter::from_fn(|| q.pop_next(false)).map(|c| c.kind).collect();
        assert_eq!(
            order,
            vec![CommandKind::UpdateStatus, CommandKind::FetchTimeline, CommandKind::FetchTimeline]
        );
    }

    #[test]
    fn duplicate_upgrades_to_foreground() {
        let mut q = CommandQueues::new(&settings());
        q.admit(CommandData::update_status("a@m", "hi"), 0);
        q.admit(home("a@m"), 0);
        assert!(!q.admit(home("a@m").in_foreground(true), 0));
        let first = q.pop_next(false).unwrap();
        assert_eq!(first.kind, CommandKind::FetchTimeline);
        assert!(first.in_foreground);
    }

    #[test]
    fn foreground_only_holds_background_in_order() {
        let mut q = CommandQueues::new(&settings());
        q.admit(home("a@m"), 0);
        q.admit(home("b@m"), 0);
        q.admit(CommandData::search("c@m", "x").in_foreground(true), 0);
        let picked = q.pop_next(true).unwrap();
        assert_eq!(picked.kind, CommandKind::Search);
        assert!(q.pop_next(true).is_none());
        let rest: Vec<String> = q.entries(QueueType::Main).map(|c| c.account.clone()).collect();
        assert_eq!(rest, vec!["a@m", "b@m"]);
    }

    #[test]
    fn retry_waits_for_backoff_and_error_needs_manual_launch() {
        let mut q = CommandQueues::new(&settings());
        let mut failed = home("a@m");
        failed.result.last_executed_ms = 1_000;
        q.push_retry(failed.clone());
        assert!(!q.admit(home("a@m"), 5_000));
        assert_eq!(q.promote_retries(5_000), 0);
        assert_eq!(q.promote_retries(11_000), 1);
        assert_eq!(q.counts(), QueueCounts { main: 1, retry: 0, error: 0 });

        let broken = CommandData::search("a@m", "x");
        q.push_error(broken.clone(), 1_000);
        assert!(!q.admit(broken.clone(), 2_000));
        assert!(q.admit(broken.manually_launched(true), 2_000));
        assert_eq!(q.counts().error, 0);
    }

    #[test]
    fn bounded_queues_evict_oldest_and_purge_by_age() {
        let mut q = CommandQueues::new(&settings());
        for account in ["a@m", "b@m", "c@m"] {
            q.push_retry(home(account));
        }
        let left: Vec<&str> = q.entries(QueueType::Retry).map(|c| c.account.as_str()).collect();
        assert_eq!(left, vec!["b@m", "c@m"]);

        let mut old = home("old@m");
        old.result.last_executed_ms = 1_000;
        q.push_error(old, 1_000);
        let mut fresh = home("new@m");
        fresh.result.last_executed_ms = 200_000;
        q.push_error(fresh, 200_000);
        assert_eq!(q.counts().error, 1);
    }

    #[test]
    fn huge_configured_ages_never_wrap() {
        let mut q = CommandQueues::new(&SchedulerSettings {
            retry_min_backoff_secs: u64::MAX,
            error_retention_secs: u64::MAX,
            ..settings()
        });
        let mut failed = home("a@m");
        failed.result.last_executed_ms = 1_000;
        q.push_retry(failed);
        let mut broken = home("b@m");
        broken.result.last_executed_ms = 1_000;
        q.push_error(broken, 1_000);

        let much_later = i64::MAX / 2;
        assert_eq!(q.promote_retries(much_later), 0);
        assert_eq!(q.purge_errors(much_later), 0);
        assert_eq!(q.counts(), QueueCounts { main: 0, retry: 1, error: 1 });
    }

    #[test]
    fn delete_removes_equal_everywhere() {
        let mut q = CommandQueues::new(&settings());
        q.admit(home("a@m"), 0);
        q.push_error(home("a@m"), 0);
        q.push_retry(home("b@m"));
        assert_eq!(q.remove_equal(&home("a@m")), 2);
        assert_eq!(q.counts(), QueueCounts { main: 0, retry: 1, error: 0 });
    }

    #[tokio::test]
    async fn queues_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::open(dir.path().join("queues.db")).unwrap();
        let mut q = CommandQueues::new(&settings());
        q.admit(home("a@m"), 0);
        q.admit(CommandData::update_status("a@m", "hi"), 0);
        q.push_error(CommandData::search("a@m", "x"), 0);
        assert_eq!(store.save(q.snapshot()).await.unwrap(), 3);

        let mut restored = CommandQueues::new(&settings());
        restored.restore(store.load().await.unwrap(), 0);
        assert_eq!(restored.counts(), QueueCounts { main: 2, retry: 0, error: 1 });
        assert_eq!(restored.pop_next(false).map(|c| c.kind), Some(CommandKind::UpdateStatus));

        store.save(Vec::new()).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }
}
