use kline_core::Job;
use kline_logging::kline_warn;

use crate::{Store, StoreError};

/// Tries `primary` first and falls through to `fallback` on any error.
///
/// Callers only see an error when both tiers fail. When both tiers hold a
/// snapshot, the one with the later `updated_at_ms` is returned.
#[derive(Debug)]
pub struct FallbackStore<P, F> {
    primary: P,
    fallback: F,
}

impl<P: Store, F: Store> FallbackStore<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn fallback(&self) -> &F {
        &self.fallback
    }
}

#[async_trait::async_trait]
impl<P: Store, F: Store> Store for FallbackStore<P, F> {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn get(&self) -> Result<Option<Job>, StoreError> {
        match self.primary.get().await {
            // Writes made during a primary outage leave the primary copy behind.
            Ok(Some(job)) => match self.fallback.get().await {
                Ok(Some(other)) if other.updated_at_ms > job.updated_at_ms => {
                    kline_warn!(
                        "{} store holds a newer snapshot than {}",
                        self.fallback.name(),
                        self.primary.name()
                    );
                    Ok(Some(other))
                }
                Ok(_) => Ok(Some(job)),
                Err(err) => {
                    kline_warn!("{} store read failed: {}", self.fallback.name(), err);
                    Ok(Some(job))
                }
            },
            // A snapshot written while the primary was down lives only in the fallback.
            Ok(None) => match self.fallback.get().await {
                Ok(found) => Ok(found),
                Err(err) => {
                    kline_warn!("{} store read failed: {}", self.fallback.name(), err);
                    Ok(None)
                }
            },
            Err(err) => {
                kline_warn!(
                    "{} store read failed, trying {}: {}",
                    self.primary.name(),
                    self.fallback.name(),
                    err
                );
                self.fallback.get().await
            }
        }
    }

    async fn set(&self, job: &Job) -> Result<(), StoreError> {
        match self.primary.set(job).await {
            Ok(()) => Ok(()),
            Err(err) => {
                kline_warn!(
                    "{} store write failed, trying {}: {}",
                    self.primary.name(),
                    self.fallback.name(),
                    err
                );
                self.fallback.set(job).await
            }
        }
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let primary = self.primary.clear().await;
        let fallback = self.fallback.clear().await;
        match (primary, fallback) {
            (Err(err), Err(_)) => Err(err),
            (Err(err), Ok(())) => {
                kline_warn!("{} store clear failed: {}", self.primary.name(), err);
                Ok(())
            }
            (Ok(()), Err(err)) => {
                kline_warn!("{} store clear failed: {}", self.fallback.name(), err);
                Ok(())
            }
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}
