use std::sync::mpsc;
use std::sync::Arc;

use kline_core::Job;

/// Receives the job snapshot after every state change, or `None` once the
/// saved state has been cleared.
pub trait StateSink: Send + Sync {
    fn emit(&self, snapshot: Option<Arc<Job>>);
}

pub struct ChannelStateSink {
    tx: mpsc::Sender<Option<Arc<Job>>>,
}

impl ChannelStateSink {
    pub fn new(tx: mpsc::Sender<Option<Arc<Job>>>) -> Self {
        Self { tx }
    }
}

impl StateSink for ChannelStateSink {
    fn emit(&self, snapshot: Option<Arc<Job>>) {
        let _ = self.tx.send(snapshot);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StateSink for NullSink {
    fn emit(&self, _snapshot: Option<Arc<Job>>) {}
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> StateSink for FnSink<F>
where
    F: Fn(Option<Arc<Job>>) + Send + Sync,
{
    fn emit(&self, snapshot: Option<Arc<Job>>) {
        (self.0)(snapshot)
    }
}
