use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesStatus {
    #[default]
    Pending,
    Running,
    Retrying,
    Done,
    Error,
}

impl SeriesStatus {
    /// `Done` and `Error` end the lifecycle of a series within a job.
    pub fn is_terminal(self) -> bool {
        matches!(self, SeriesStatus::Done | SeriesStatus::Error)
    }
}

/// Progress record for one series.
///
/// Fields are only changed through the transition methods so that the
/// attempt counter never decreases and `retry_at_ms` is only present while
/// the task is `Retrying`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesTask {
    #[serde(default)]
    status: SeriesStatus,
    #[serde(default)]
    attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    count: Option<usize>,
    /// Non-fatal advisory attached to a finished series (e.g. a short batch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl SeriesTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SeriesStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retry_at_ms(&self) -> Option<i64> {
        self.retry_at_ms
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn count(&self) -> Option<usize> {
        self.count
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Milliseconds left before a scheduled retry may start; zero when due or
    /// when no retry is scheduled.
    pub fn retry_delay_ms(&self, now_ms: i64) -> u64 {
        match (self.status, self.retry_at_ms) {
            (SeriesStatus::Retrying, Some(at)) => u64::try_from(at - now_ms).unwrap_or(0),
            _ => 0,
        }
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.status = SeriesStatus::Running;
        self.retry_at_ms = None;
        self.error = None;
    }

    pub(crate) fn complete(&mut self, count: usize, note: Option<String>) {
        self.status = SeriesStatus::Done;
        self.retry_at_ms = None;
        self.error = None;
        self.count = Some(count);
        self.note = note;
    }

    pub(crate) fn schedule_retry(&mut self, retry_at_ms: i64, message: String) {
        self.attempts = self.attempts.saturating_add(1);
        self.status = SeriesStatus::Retrying;
        self.retry_at_ms = Some(retry_at_ms);
        self.error = Some(message);
    }

    pub(crate) fn fail(&mut self, message: String, count_attempt: bool) {
        if count_attempt {
            self.attempts = self.attempts.saturating_add(1);
        }
        self.status = SeriesStatus::Error;
        self.retry_at_ms = None;
        self.error = Some(message);
    }

    /// Repairs a task read from an older or hand-edited snapshot.
    pub(crate) fn normalize(&mut self) {
        if self.status != SeriesStatus::Retrying {
            self.retry_at_ms = None;
        }
    }
}
