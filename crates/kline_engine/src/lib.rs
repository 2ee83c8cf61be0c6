//! Kline engine: remote fetching, durable job storage and the orchestrator
//! that drives a job to completion.
mod classify;
mod decode;
mod fallback;
mod fetch;
mod file_store;
mod orchestrator;
mod persist;
mod sink;
mod store;
mod types;

pub use classify::{classify_status, parse_retry_after, truncate_body, MAX_BODY_CHARS};
pub use decode::{decode_klines, DecodeError};
pub use fallback::FallbackStore;
pub use fetch::{FetchRequest, FetchSettings, Fetcher, ReqwestFetcher};
pub use file_store::{CompactFileStore, FileStore};
pub use orchestrator::{system_clock, Clock, Orchestrator, OrchestratorConfig};
pub use persist::{ensure_dir, AtomicFileWriter, PersistError};
pub use sink::{ChannelStateSink, FnSink, NullSink, StateSink};
pub use store::{MemoryStore, Store, StoreError};
pub use types::{Classification, FailureKind, FetchError};
