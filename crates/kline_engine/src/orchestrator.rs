use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kline_core::{BackoffPolicy, Interval, Job, JobSettings, SettingsPatch, DEFAULT_LOG_CAPACITY};
use kline_logging::{kline_debug, kline_error, kline_info, kline_warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{FetchRequest, Fetcher, StateSink, Store};

/// Largest page the klines endpoint serves.
const MAX_LIMIT: usize = 1000;

/// Source of "now" in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Wall-clock milliseconds that advance with the tokio timer, so retry
/// timestamps and the waits derived from them always agree.
pub fn system_clock() -> Clock {
    let anchor_ms = chrono::Utc::now().timestamp_millis();
    let anchor = tokio::time::Instant::now();
    Arc::new(move || {
        let elapsed = i64::try_from(anchor.elapsed().as_millis()).unwrap_or(i64::MAX);
        anchor_ms.saturating_add(elapsed)
    })
}

#[derive(Clone)]
pub struct OrchestratorConfig {
    /// Records requested per series; clamped to 1..=1000.
    pub limit: usize,
    pub backoff: BackoffPolicy,
    pub log_capacity: usize,
    pub now_ms: Clock,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            limit: MAX_LIMIT,
            backoff: BackoffPolicy::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            now_ms: system_clock(),
        }
    }
}

impl fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("limit", &self.limit)
            .field("backoff", &self.backoff)
            .field("log_capacity", &self.log_capacity)
            .finish_non_exhaustive()
    }
}

struct State {
    job: Option<Arc<Job>>,
    /// Bumped whenever the job is replaced or cleared. Work started under an
    /// older generation is discarded.
    generation: u64,
    /// Cancelled together with every generation bump to wake pending waits.
    cancel: CancellationToken,
}

struct Inner {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn Store>,
    sink: Arc<dyn StateSink>,
    config: OrchestratorConfig,
    state: Mutex<State>,
    /// Held from mutation through persist and emit, so snapshots reach the
    /// store and the sink in the order they were taken.
    commit: tokio::sync::Mutex<()>,
    running: AtomicBool,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the current job and drives its series, one at a time, through
/// fetch, retry and failure handling.
///
/// Cloning yields another handle to the same orchestrator. At most one run
/// loop is active per orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn Store>,
        sink: Arc<dyn StateSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                store,
                sink,
                config,
                state: Mutex::new(State {
                    job: None,
                    generation: 0,
                    cancel: CancellationToken::new(),
                }),
                commit: tokio::sync::Mutex::new(()),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Discards any previous job, persists a fresh one with every series
    /// pending and starts processing it in the background.
    ///
    /// `symbol` must already be validated.
    pub async fn start_new_job(
        &self,
        symbol: &str,
        proxy_base_url: &str,
        auto_resume: bool,
    ) -> JoinHandle<()> {
        let now = self.now_ms();
        let settings = JobSettings {
            proxy_base_url: proxy_base_url.trim().to_string(),
            auto_resume,
        };
        let mut job = Job::new(Job::generate_id(now), symbol, settings, now);
        job.set_log_capacity(self.inner.config.log_capacity);
        job.push_log(
            now,
            format!("started export of {symbol} ({} intervals)", Interval::ALL.len()),
        );
        kline_info!("starting job {} for {}", job.id, symbol);

        self.replace_job(Some(job), false).await;
        self.spawn_run()
    }

    /// Loads the saved job (if nothing is in memory yet) and, when it allows
    /// auto-resume and still has unfinished series, continues it in the
    /// background. A job that is already being run is left alone.
    pub async fn resume_if_needed(&self) -> Option<JoinHandle<()>> {
        if self.get_state().is_some() && self.is_running() {
            return None;
        }
        self.load_saved().await?;
        let (generation, job) = self.current()?;
        if !job.settings.auto_resume || job.is_fully_complete() {
            return None;
        }
        self.apply(generation, |job, now| job.push_log(now, "resuming saved job"))
            .await?;
        Some(self.spawn_run())
    }

    /// Makes the saved job current without running it. A job already in
    /// memory wins over the store. An unreadable store counts as empty.
    pub async fn load_saved(&self) -> Option<Arc<Job>> {
        if let Some(job) = self.get_state() {
            return Some(job);
        }
        let loaded = match self.inner.store.get().await {
            Ok(job) => job,
            Err(err) => {
                kline_warn!("could not load saved job: {}", err);
                None
            }
        };
        let mut job = loaded?;
        job.set_log_capacity(self.inner.config.log_capacity);
        let progress = job.progress();
        kline_info!(
            "loaded saved job {} for {} ({} done, {} failed of {})",
            job.id,
            job.symbol,
            progress.done,
            progress.failed,
            progress.total
        );
        self.replace_job(Some(job), true).await;
        self.get_state()
    }

    /// Changes proxy and auto-resume settings without touching progress.
    /// Returns false when there is no job.
    pub async fn update_settings(&self, patch: SettingsPatch) -> bool {
        let generation = self.inner.lock_state().generation;
        self.apply(generation, |job, now| job.apply_settings(patch, now))
            .await
            .is_some()
    }

    /// Stops processing, forgets the job and erases the saved snapshot.
    pub async fn clear_saved_state(&self) {
        self.replace_job(None, false).await;
        kline_info!("cleared saved job");
    }

    pub fn get_state(&self) -> Option<Arc<Job>> {
        self.inner.lock_state().job.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Runs [`Orchestrator::run`] on a new task.
    pub fn spawn_run(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run().await })
    }

    /// Processes unfinished series in order until none are left or the job
    /// is cleared. Returns immediately if another run is in progress.
    pub async fn run(&self) {
        if !self.try_begin_run() {
            kline_debug!("run already in progress");
            return;
        }
        loop {
            self.drive().await;
            self.inner.running.store(false, Ordering::Release);
            // A job started while this loop was winding down would otherwise sit idle.
            if !self.has_unfinished_work() || !self.try_begin_run() {
                break;
            }
        }
    }

    fn try_begin_run(&self) -> bool {
        self.inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn has_unfinished_work(&self) -> bool {
        self.get_state()
            .is_some_and(|job| job.next_unfinished().is_some())
    }

    async fn drive(&self) {
        let mut worked = false;
        loop {
            let (generation, cancel, next) = {
                let state = self.inner.lock_state();
                let Some(job) = state.job.as_ref() else {
                    return;
                };
                (state.generation, state.cancel.clone(), job.next_unfinished())
            };
            let Some(interval) = next else {
                if worked {
                    self.finish(generation).await;
                }
                return;
            };
            worked = true;
            self.execute(generation, interval, &cancel).await;
        }
    }

    /// Drives one series until it is done or failed, or until its job is
    /// replaced.
    async fn execute(&self, generation: u64, interval: Interval, cancel: &CancellationToken) {
        loop {
            let delay_ms = {
                let Some((_, job)) = self.current().filter(|(current, _)| *current == generation)
                else {
                    return;
                };
                let Some(task) = job.task(interval).filter(|task| !task.is_terminal()) else {
                    return;
                };
                task.retry_delay_ms(self.now_ms())
            };

            if delay_ms > 0 {
                kline_debug!("{}: waiting {} ms before retrying", interval, delay_ms);
                if !sleep_unless_cancelled(Duration::from_millis(delay_ms), cancel).await {
                    return;
                }
            }

            // Built after the wait so that settings changed meanwhile apply.
            let limit = self.limit();
            let Some(request) = self
                .apply(generation, |job, now| {
                    job.begin_attempt(interval, now);
                    FetchRequest {
                        base_url: Some(job.settings.proxy_base_url.clone())
                            .filter(|url| !url.is_empty()),
                        symbol: job.symbol.clone(),
                        interval,
                        limit,
                    }
                })
                .await
            else {
                return;
            };
            kline_debug!(
                "{}: fetching {} klines for {}",
                interval,
                request.limit,
                request.symbol
            );

            let result = self.inner.fetcher.fetch(&request).await;
            if cancel.is_cancelled() {
                kline_debug!("{}: job replaced while fetching, result discarded", interval);
                return;
            }

            match result {
                Ok(batch) => {
                    let requested = request.limit;
                    let line = self
                        .apply(generation, move |job, now| {
                            let count = batch.len();
                            job.complete(interval, batch, requested, now);
                            let line = match job.task(interval).and_then(|task| task.note()) {
                                Some(note) => format!("{interval}: {count} records ({note})"),
                                None => format!("{interval}: {count} records"),
                            };
                            job.push_log(now, line.clone());
                            line
                        })
                        .await;
                    if let Some(line) = line {
                        kline_info!("{}", line);
                    }
                    return;
                }
                Err(err) if err.is_retryable() => {
                    let policy = &self.inner.config.backoff;
                    let scheduled = self
                        .apply(generation, |job, now| {
                            let attempts =
                                job.task(interval).map_or(0, |task| task.attempts()) + 1;
                            if policy.is_exhausted(attempts) {
                                let message =
                                    format!("giving up after {attempts} attempts: {err}");
                                job.fail(interval, message.clone(), true, now);
                                job.push_log(now, format!("{interval}: {message}"));
                                return None;
                            }
                            let wait = policy.compute_wait(attempts, err.retry_hint());
                            let wait_ms = i64::try_from(wait.as_millis()).unwrap_or(i64::MAX);
                            job.schedule_retry(
                                interval,
                                now.saturating_add(wait_ms),
                                err.message.clone(),
                                now,
                            );
                            job.push_log(
                                now,
                                format!(
                                    "{interval}: {err}; retrying in {:.1}s (attempt {attempts})",
                                    wait.as_secs_f64()
                                ),
                            );
                            Some(wait)
                        })
                        .await;
                    match scheduled {
                        Some(Some(wait)) => {
                            kline_info!("{}: {}; retrying in {:?}", interval, err, wait);
                        }
                        Some(None) => {
                            kline_warn!("{}: retry budget exhausted: {}", interval, err);
                            return;
                        }
                        None => return,
                    }
                }
                Err(err) => {
                    self.apply(generation, |job, now| {
                        job.fail(interval, err.message.clone(), false, now);
                        job.push_log(now, format!("{interval}: failed permanently: {err}"));
                    })
                    .await;
                    kline_warn!("{}: failed permanently: {}", interval, err);
                    return;
                }
            }
        }
    }

    async fn finish(&self, generation: u64) {
        let progress = self
            .apply(generation, |job, now| {
                let progress = job.progress();
                job.push_log(
                    now,
                    format!(
                        "export finished: {} done, {} failed",
                        progress.done, progress.failed
                    ),
                );
                progress
            })
            .await;
        if let Some(progress) = progress {
            kline_info!(
                "job finished: {} done, {} failed of {}",
                progress.done,
                progress.failed,
                progress.total
            );
        }
    }

    /// Mutates the job of `generation`, then persists and publishes the new
    /// snapshot. Returns `None` without doing anything if that job is gone.
    async fn apply<R, F>(&self, generation: u64, mutate: F) -> Option<R>
    where
        R: Send,
        F: FnOnce(&mut Job, i64) -> R + Send,
    {
        let _commit = self.inner.commit.lock().await;
        let (result, snapshot) = {
            let mut state = self.inner.lock_state();
            if state.generation != generation {
                return None;
            }
            let now = self.now_ms();
            let slot = state.job.as_mut()?;
            let result = mutate(Arc::make_mut(slot), now);
            (result, Arc::clone(slot))
        };

        self.persist(&snapshot).await;
        if self.is_current(generation) {
            self.inner.sink.emit(Some(snapshot));
        }
        Some(result)
    }

    /// Installs `job` (or nothing) as the current job, invalidating whatever
    /// the previous job had in flight, and makes the store match.
    async fn replace_job(&self, job: Option<Job>, only_if_empty: bool) {
        let (generation, snapshot) = {
            let mut state = self.inner.lock_state();
            if only_if_empty && state.job.is_some() {
                return;
            }
            state.generation += 1;
            state.cancel.cancel();
            state.cancel = CancellationToken::new();
            state.job = job.map(Arc::new);
            (state.generation, state.job.clone())
        };

        let _commit = self.inner.commit.lock().await;
        if !self.is_current(generation) {
            return;
        }
        match &snapshot {
            Some(job) => self.persist(job).await,
            None => {
                if let Err(err) = self.inner.store.clear().await {
                    kline_error!("failed to erase saved job: {}", err);
                }
            }
        }
        if self.is_current(generation) {
            self.inner.sink.emit(snapshot);
        }
    }

    /// Persistence is best effort: the in-memory run carries on without it.
    async fn persist(&self, snapshot: &Job) {
        if let Err(err) = self.inner.store.set(snapshot).await {
            kline_error!("failed to save job {}: {}", snapshot.id, err);
        }
    }

    fn current(&self) -> Option<(u64, Arc<Job>)> {
        let state = self.inner.lock_state();
        state.job.clone().map(|job| (state.generation, job))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.lock_state().generation == generation
    }

    fn now_ms(&self) -> i64 {
        (self.inner.config.now_ms)()
    }

    fn limit(&self) -> usize {
        self.inner.config.limit.clamp(1, MAX_LIMIT)
    }
}

/// Sleeps for `duration`; returns false if `cancel` fired first.
async fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}
