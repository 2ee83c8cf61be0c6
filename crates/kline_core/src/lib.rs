//! Kline core: pure job model, series state machine and retry policy.
mod backoff;
mod interval;
mod job;
mod kline;
mod task;
mod validate;

pub use backoff::{BackoffPolicy, MAX_BACKOFF};
pub use interval::{Interval, ParseIntervalError};
pub use job::{Job, JobSettings, LogEntry, Progress, SettingsPatch, DEFAULT_LOG_CAPACITY};
pub use kline::Kline;
pub use task::{SeriesStatus, SeriesTask};
pub use validate::{validate_symbol, ValidationError};
