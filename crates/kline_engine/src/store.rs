use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use kline_core::Job;
use thiserror::Error;

use crate::PersistError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store {0} is unavailable")]
    Unavailable(String),
    #[error("snapshot of {size} bytes exceeds capacity of {max} bytes")]
    CapacityExceeded { size: usize, max: usize },
    #[error("snapshot could not be encoded or decoded: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("background store task failed: {0}")]
    Task(String),
}

/// Durable home of the single job snapshot. Every `set` overwrites the whole
/// document.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Short label used in log lines.
    fn name(&self) -> &str;

    async fn get(&self) -> Result<Option<Job>, StoreError>;

    async fn set(&self, job: &Job) -> Result<(), StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

pub(crate) fn encode_snapshot(job: &Job) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(job)?)
}

/// Reads a snapshot, filling in whatever an older writer left out.
pub(crate) fn decode_snapshot(bytes: &[u8]) -> Result<Job, StoreError> {
    let mut job: Job = serde_json::from_slice(bytes)?;
    job.normalize();
    Ok(job)
}

/// In-process store. Holds the encoded document, so readers never share
/// state with the writer.
#[derive(Debug)]
pub struct MemoryStore {
    document: Mutex<Option<Vec<u8>>>,
    max_bytes: Option<usize>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            document: Mutex::new(None),
            max_bytes: None,
            available: AtomicBool::new(true),
        }
    }

    pub fn with_capacity(max_bytes: usize) -> Self {
        Self {
            max_bytes: Some(max_bytes),
            ..Self::new()
        }
    }

    /// Simulates the medium going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn has_document(&self) -> bool {
        self.lock().is_some()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(self.name().to_string()))
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Vec<u8>>> {
        self.document.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self) -> Result<Option<Job>, StoreError> {
        self.check_available()?;
        let document = self.lock().clone();
        document.as_deref().map(decode_snapshot).transpose()
    }

    async fn set(&self, job: &Job) -> Result<(), StoreError> {
        self.check_available()?;
        let encoded = encode_snapshot(job)?;
        if let Some(max) = self.max_bytes {
            if encoded.len() > max {
                return Err(StoreError::CapacityExceeded {
                    size: encoded.len(),
                    max,
                });
            }
        }
        *self.lock() = Some(encoded);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.check_available()?;
        *self.lock() = None;
        Ok(())
    }
}
