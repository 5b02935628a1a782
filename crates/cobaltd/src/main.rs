//! cobaltd — the Cobalt client daemon.
//!
//! Assembles the pipeline from `cobalt.toml`:
//! - Aggregate store (redb)
//! - Logger for single events
//! - Periodic aggregation and upload job
//! - Operation counters, printed as Prometheus text on exit
//!
//! # Usage
//!
//! ```text
//! cobaltd init --api-key KEY --output cobalt.toml
//! cobaltd log --config cobalt.toml occurrence --metric-id 1 --event-codes 2
//! cobaltd run --config cobalt.toml
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use cobalt_core::{CobaltConfig, Registry, SystemData, WallClock};
use cobalt_metrics::{OperationCounters, render_prometheus};
use cobalt_pipeline::{
    CobaltLogger, CobaltPeriodicJob, DirectoryUploader, ObservationGeneratorFactory,
    PeriodicJobConfig, PlaintextEncrypter, SecureRandom, StoreDataService,
};
use cobalt_state::CobaltStore;

const DEFAULT_OUTBOX_DIR: &str = "outbox";

#[derive(Parser)]
#[command(name = "cobaltd", about = "Cobalt aggregation and upload daemon", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the periodic job until interrupted.
    Run {
        #[arg(short, long, default_value = "cobalt.toml")]
        config: PathBuf,

        /// Run the job once and exit.
        #[arg(long)]
        once: bool,
    },
    /// Log one event into the local store.
    ///
    /// The store is locked while a daemon runs against it.
    Log {
        #[arg(short, long, default_value = "cobalt.toml")]
        config: PathBuf,

        #[command(subcommand)]
        event: LogEvent,
    },
    /// Check a configuration file and list its reports.
    Validate {
        #[arg(short, long, default_value = "cobalt.toml")]
        config: PathBuf,
    },
    /// Generate a starter cobalt.toml.
    Init {
        #[arg(long)]
        api_key: String,

        #[arg(long, default_value = "1")]
        customer_id: u32,

        #[arg(long, default_value = "1")]
        project_id: u32,

        /// Write here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum LogEvent {
    /// Count occurrences of an event.
    Occurrence {
        #[arg(long)]
        metric_id: u32,

        #[arg(long, default_value = "1", allow_negative_numbers = true)]
        count: i64,

        /// Comma-separated event codes.
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        event_codes: Vec<i32>,
    },
    /// Count one occurrence of a string.
    String {
        #[arg(long)]
        metric_id: u32,

        #[arg(long)]
        value: String,

        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        event_codes: Vec<i32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,cobaltd=debug,cobalt=debug".parse().unwrap());
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Command::Run { config, once } => run(&config, once).await,
        Command::Log { config, event } => log_event(&config, event).await,
        Command::Validate { config } => validate(&config),
        Command::Init {
            api_key,
            customer_id,
            project_id,
            output,
        } => init(&api_key, customer_id, project_id, output.as_deref()),
    }
}

/// Everything built from one configuration file.
struct Pipeline {
    config: CobaltConfig,
    registry: Arc<Registry>,
    data: Arc<StoreDataService>,
    counters: Arc<OperationCounters>,
    system: SystemData,
}

impl Pipeline {
    fn open(path: &Path) -> anyhow::Result<Self> {
        let config = CobaltConfig::from_file(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let registry = Arc::new(config.registry()?);

        let store = match config.storage_path() {
            Some(db_path) => {
                let db_path = Path::new(db_path);
                if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                let store = CobaltStore::open(db_path)?;
                info!(path = ?db_path, "aggregate store opened");
                store
            }
            None => {
                warn!("no storage path configured, aggregates are kept in memory");
                CobaltStore::open_in_memory()?
            }
        };

        let counters = Arc::new(OperationCounters::new());
        let data = Arc::new(StoreDataService::new(store, counters.clone()));
        let system = SystemData::new(config.system_profile());

        info!(
            customer_id = registry.customer_id(),
            project_id = registry.project_id(),
            metrics = registry.metrics().len(),
            "registry loaded"
        );
        Ok(Self {
            config,
            registry,
            data,
            counters,
            system,
        })
    }

    fn logger(&self) -> CobaltLogger {
        CobaltLogger::new(
            self.registry.clone(),
            self.data.clone(),
            Arc::new(WallClock),
            self.system.clone(),
            self.config.pipeline.release_stage,
            self.config.pipeline.enabled,
        )
    }

    fn job(&self) -> CobaltPeriodicJob {
        let outbox = self
            .config
            .upload
            .as_ref()
            .map(|u| u.outbox_dir.clone())
            .unwrap_or_else(|| DEFAULT_OUTBOX_DIR.to_string());
        let factory = ObservationGeneratorFactory::new(
            self.registry.customer_id(),
            self.registry.project_id(),
            self.system.clone(),
            Arc::new(SecureRandom::from_entropy()),
        );

        CobaltPeriodicJob::new(
            self.registry.clone(),
            self.data.clone(),
            Arc::new(factory),
            Arc::new(PlaintextEncrypter),
            Arc::new(DirectoryUploader::new(outbox)),
            Arc::new(WallClock),
            self.counters.clone(),
            PeriodicJobConfig {
                release_stage: self.config.pipeline.release_stage,
                api_key: self.config.pipeline.api_key.clone(),
                upload_done_delay: self.config.upload_done_delay(),
                reports_to_ignore: self.config.reports_to_ignore(),
                enabled: self.config.pipeline.enabled,
            },
        )
    }
}

async fn run(config: &Path, once: bool) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(config)?;
    let job = pipeline.job();

    if once {
        let report = job.generate_aggregated_observations().await?;
        info!(?report, "single run finished");
        print!("{}", render_prometheus(&pipeline.counters.snapshot()));
        return Ok(());
    }

    info!("Cobalt daemon starting");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interval = pipeline.config.job_interval();
    let job = Arc::new(job);

    let job_handle = {
        let job = job.clone();
        tokio::spawn(async move { job.run(interval, shutdown_rx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = job_handle.await;

    print!("{}", render_prometheus(&pipeline.counters.snapshot()));
    info!("Cobalt daemon stopped");
    Ok(())
}

async fn log_event(config: &Path, event: LogEvent) -> anyhow::Result<()> {
    let pipeline = Pipeline::open(config)?;
    let logger = pipeline.logger();

    match event {
        LogEvent::Occurrence {
            metric_id,
            count,
            event_codes,
        } => {
            logger.log_occurrence(metric_id, count, &event_codes).await?;
            info!(metric_id, count, ?event_codes, "occurrence logged");
        }
        LogEvent::String {
            metric_id,
            value,
            event_codes,
        } => {
            logger.log_string(metric_id, &value, &event_codes).await?;
            info!(metric_id, ?event_codes, "string logged");
        }
    }
    Ok(())
}

fn validate(config: &Path) -> anyhow::Result<()> {
    let config = CobaltConfig::from_file(config)
        .with_context(|| format!("failed to read {}", config.display()))?;
    let registry = config.registry()?;

    println!(
        "customer {} project {}: {} metrics",
        registry.customer_id(),
        registry.project_id(),
        registry.metrics().len()
    );
    for metric in registry.metrics() {
        for report in &metric.reports {
            let key = registry.report_key(metric, report);
            let ignored = if config.reports_to_ignore().contains(&key) {
                " (ignored)"
            } else {
                ""
            };
            println!("  {key} {:?}/{:?}{ignored}", report.report_type, report.privacy_mechanism);
        }
    }
    Ok(())
}

fn init(api_key: &str, customer_id: u32, project_id: u32, output: Option<&Path>) -> anyhow::Result<()> {
    let config = CobaltConfig::scaffold(api_key, customer_id, project_id);
    let content = config.to_toml_string()?;
    match output {
        Some(path) => {
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            std::fs::write(path, content)?;
            info!(path = ?path, "configuration written");
        }
        None => print!("{content}"),
    }
    Ok(())
}
