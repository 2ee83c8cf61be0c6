use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::{Interval, Kline, SeriesStatus, SeriesTask};

/// Default bound of the human-readable job log.
pub const DEFAULT_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSettings {
    /// Replaces the default API base URL when non-empty.
    #[serde(default)]
    pub proxy_base_url: String,
    #[serde(default = "default_auto_resume")]
    pub auto_resume: bool,
}

fn default_auto_resume() -> bool {
    true
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            proxy_base_url: String::new(),
            auto_resume: default_auto_resume(),
        }
    }
}

/// Partial settings update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub proxy_base_url: Option<String>,
    pub auto_resume: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub at_ms: i64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub done: usize,
    pub failed: usize,
    pub total: usize,
}

impl Progress {
    pub fn remaining(&self) -> usize {
        self.total - self.done - self.failed
    }
}

/// One export run over every configured interval for one symbol.
///
/// The orchestrator is the only writer; everything it needs to mutate goes
/// through the transition methods below, each of which bumps `updated_at_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub settings: JobSettings,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub updated_at_ms: i64,
    #[serde(default)]
    tasks: BTreeMap<Interval, SeriesTask>,
    #[serde(default)]
    data: BTreeMap<Interval, Vec<Kline>>,
    #[serde(default)]
    log: VecDeque<LogEntry>,
    #[serde(skip, default = "default_log_capacity")]
    log_capacity: usize,
}

fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        settings: JobSettings,
        now_ms: i64,
    ) -> Self {
        let tasks = Interval::ALL
            .into_iter()
            .map(|interval| (interval, SeriesTask::new()))
            .collect();
        Self {
            id: id.into(),
            symbol: symbol.into(),
            settings,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            tasks,
            data: BTreeMap::new(),
            log: VecDeque::new(),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }

    /// Random job identity token.
    pub fn generate_id(now_ms: i64) -> String {
        format!("job-{now_ms:x}-{:08x}", rand::random::<u32>())
    }

    /// Brings a deserialized snapshot in line with the current interval set
    /// and task invariants.
    pub fn normalize(&mut self) {
        for interval in Interval::ALL {
            self.tasks.entry(interval).or_default();
        }
        for task in self.tasks.values_mut() {
            task.normalize();
        }
        let tasks = &self.tasks;
        self.data.retain(|interval, _| {
            tasks.get(interval).map(SeriesTask::status) == Some(SeriesStatus::Done)
        });
        self.trim_log();
    }

    pub fn set_log_capacity(&mut self, capacity: usize) {
        self.log_capacity = capacity.max(1);
        self.trim_log();
    }

    pub fn task(&self, interval: Interval) -> Option<&SeriesTask> {
        self.tasks.get(&interval)
    }

    /// Tasks in processing order.
    pub fn tasks(&self) -> impl Iterator<Item = (Interval, &SeriesTask)> {
        self.tasks.iter().map(|(interval, task)| (*interval, task))
    }

    pub fn data(&self, interval: Interval) -> Option<&[Kline]> {
        self.data.get(&interval).map(Vec::as_slice)
    }

    pub fn log(&self) -> impl Iterator<Item = &LogEntry> {
        self.log.iter()
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    /// First interval, in processing order, that still needs work.
    pub fn next_unfinished(&self) -> Option<Interval> {
        self.tasks()
            .find(|(_, task)| !task.is_terminal())
            .map(|(interval, _)| interval)
    }

    pub fn is_fully_complete(&self) -> bool {
        self.tasks.values().all(SeriesTask::is_terminal)
    }

    pub fn is_partially_usable(&self) -> bool {
        self.tasks
            .values()
            .any(|task| task.status() == SeriesStatus::Done)
    }

    pub fn progress(&self) -> Progress {
        self.tasks.values().fold(
            Progress {
                total: self.tasks.len(),
                ..Progress::default()
            },
            |mut progress, task| {
                match task.status() {
                    SeriesStatus::Done => progress.done += 1,
                    SeriesStatus::Error => progress.failed += 1,
                    _ => {}
                }
                progress
            },
        )
    }

    pub fn push_log(&mut self, now_ms: i64, message: impl Into<String>) {
        self.log.push_back(LogEntry {
            at_ms: now_ms,
            message: message.into(),
        });
        self.trim_log();
    }

    pub fn apply_settings(&mut self, patch: SettingsPatch, now_ms: i64) {
        if let Some(proxy_base_url) = patch.proxy_base_url {
            self.settings.proxy_base_url = proxy_base_url.trim().to_string();
        }
        if let Some(auto_resume) = patch.auto_resume {
            self.settings.auto_resume = auto_resume;
        }
        self.updated_at_ms = now_ms;
    }

    pub fn begin_attempt(&mut self, interval: Interval, now_ms: i64) {
        self.task_mut(interval).begin_attempt();
        self.updated_at_ms = now_ms;
    }

    /// Stores a fetched batch and marks the series done. A batch shorter than
    /// `requested` is still a success; it only carries an advisory note.
    pub fn complete(
        &mut self,
        interval: Interval,
        batch: Vec<Kline>,
        requested: usize,
        now_ms: i64,
    ) {
        let count = batch.len();
        let note = (count < requested)
            .then(|| format!("received {count} of {requested} requested records"));
        self.task_mut(interval).complete(count, note);
        self.data.insert(interval, batch);
        self.updated_at_ms = now_ms;
    }

    pub fn schedule_retry(
        &mut self,
        interval: Interval,
        retry_at_ms: i64,
        message: impl Into<String>,
        now_ms: i64,
    ) {
        self.task_mut(interval)
            .schedule_retry(retry_at_ms, message.into());
        self.updated_at_ms = now_ms;
    }

    /// Marks the series permanently failed. `count_attempt` is set when the
    /// failure was a retryable one that exhausted the attempt budget.
    pub fn fail(
        &mut self,
        interval: Interval,
        message: impl Into<String>,
        count_attempt: bool,
        now_ms: i64,
    ) {
        self.task_mut(interval).fail(message.into(), count_attempt);
        self.updated_at_ms = now_ms;
    }

    fn task_mut(&mut self, interval: Interval) -> &mut SeriesTask {
        self.tasks.entry(interval).or_default()
    }

    fn trim_log(&mut self) {
        while self.log.len() > self.log_capacity {
            self.log.pop_front();
        }
    }
}
