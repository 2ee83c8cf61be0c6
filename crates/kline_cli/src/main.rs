//! `kline_export`: start, resume and inspect a kline export job from the
//! command line. Progress is saved after every change, so an interrupted run
//! can be picked up again with `resume`.

mod config;
mod report;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kline_core::{validate_symbol, Job, SettingsPatch};
use kline_engine::{
    CompactFileStore, FallbackStore, FileStore, FnSink, NullSink, Orchestrator,
    OrchestratorConfig, ReqwestFetcher, StateSink,
};
use kline_logging::{kline_info, kline_warn, LevelFilter, LogDestination, DEFAULT_LOG_FILE};
use tokio::task::JoinHandle;

use crate::config::AppConfig;

/// File stem of the saved job in both store tiers.
const STATE_KEY: &str = "kline_job";

#[derive(Parser)]
#[command(
    name = "kline_export",
    about = "Resumable candlestick export for one trading pair"
)]
struct Cli {
    /// RON config file. Defaults to ./kline_export.ron when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log verbosity.
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Start a fresh export, discarding any saved job.
    Start {
        /// Trading pair, e.g. BTCUSDT. Case-insensitive.
        symbol: String,

        /// Base URL to use instead of the public API.
        #[arg(long, default_value = "")]
        proxy: String,

        /// Keep `resume` from continuing this job.
        #[arg(long, default_value_t = false)]
        no_auto_resume: bool,
    },
    /// Continue the saved job if it allows auto-resume.
    Resume,
    /// Print the saved job.
    Status,
    /// Stop tracking the saved job and erase it.
    Clear,
    /// Change settings of the saved job without touching its progress.
    Settings {
        /// New base URL; an empty value restores the public API.
        #[arg(long)]
        proxy: Option<String>,

        #[arg(long)]
        auto_resume: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    let destination = if config.log_to_file {
        LogDestination::Both(PathBuf::from(DEFAULT_LOG_FILE))
    } else {
        LogDestination::Terminal
    };
    kline_logging::initialize(destination, cli.log_level.into());
    kline_info!("state directory {:?}", config.state_dir);

    match cli.command {
        Command::Start {
            symbol,
            proxy,
            no_auto_resume,
        } => {
            let symbol = validate_symbol(&symbol.to_uppercase())?;
            let orchestrator = build_orchestrator(&config, summary_printer())?;
            let handle = orchestrator
                .start_new_job(&symbol, &proxy, !no_auto_resume)
                .await;
            wait_for_run(handle).await?;
            print_report(orchestrator.get_state().as_deref());
        }
        Command::Resume => {
            let orchestrator = build_orchestrator(&config, summary_printer())?;
            match orchestrator.resume_if_needed().await {
                Some(handle) => {
                    wait_for_run(handle).await?;
                    print_report(orchestrator.get_state().as_deref());
                }
                None => match orchestrator.get_state() {
                    Some(job) if !job.settings.auto_resume => {
                        println!("job {} has auto-resume disabled", job.id);
                    }
                    Some(job) => println!("job {} has nothing left to do", job.id),
                    None => println!("no saved job"),
                },
            }
        }
        Command::Status => {
            let orchestrator = build_orchestrator(&config, Arc::new(NullSink))?;
            print_report(orchestrator.load_saved().await.as_deref());
        }
        Command::Clear => {
            let orchestrator = build_orchestrator(&config, Arc::new(NullSink))?;
            orchestrator.clear_saved_state().await;
            println!("saved job cleared");
        }
        Command::Settings { proxy, auto_resume } => {
            let orchestrator = build_orchestrator(&config, Arc::new(NullSink))?;
            if orchestrator.load_saved().await.is_none() {
                bail!("no saved job to update");
            }
            let patch = SettingsPatch {
                proxy_base_url: proxy,
                auto_resume,
            };
            orchestrator.update_settings(patch).await;
            print_report(orchestrator.get_state().as_deref());
        }
    }
    Ok(())
}

fn build_orchestrator(config: &AppConfig, sink: Arc<dyn StateSink>) -> Result<Orchestrator> {
    let fetcher =
        ReqwestFetcher::new(config.fetch_settings()).context("failed to build http client")?;
    let store = FallbackStore::new(
        FileStore::new(&config.state_dir, STATE_KEY),
        CompactFileStore::new(&config.fallback_dir(), STATE_KEY, config.fallback_max_bytes),
    );
    let orchestrator_config = OrchestratorConfig {
        backoff: config.backoff(),
        ..OrchestratorConfig::default()
    };
    Ok(Orchestrator::new(
        Arc::new(fetcher),
        Arc::new(store),
        sink,
        orchestrator_config,
    ))
}

/// Prints a summary line whenever the per-series picture changes.
fn summary_printer() -> Arc<dyn StateSink> {
    let last = Mutex::new(String::new());
    Arc::new(FnSink(move |snapshot: Option<Arc<Job>>| {
        let Some(job) = snapshot else {
            return;
        };
        let line = report::summary_line(&job);
        let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
        if *last != line {
            println!("{line}");
            *last = line;
        }
    }))
}

/// Waits for the run to end. Ctrl-C leaves the job saved for `resume`.
async fn wait_for_run(handle: JoinHandle<()>) -> Result<()> {
    tokio::select! {
        joined = handle => joined.context("export task failed")?,
        _ = tokio::signal::ctrl_c() => {
            kline_warn!("interrupted, leaving job for resume");
            println!("interrupted; run `kline_export resume` to continue");
        }
    }
    Ok(())
}

fn print_report(job: Option<&Job>) {
    match job {
        Some(job) => {
            for line in report::status_report(job) {
                println!("{line}");
            }
        }
        None => println!("no saved job"),
    }
}
