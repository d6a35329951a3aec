//! Realtime weather data service.
//!
//! Accepts loop packets and archive records from a station driver and keeps
//! per-day rolling statistics for them, with:
//! - A SQLite archive for seeding, trends and periodic aggregates
//! - Independent generator workers (gauge data, raw snapshots)
//! - File, HTTP POST and rsync export of every generated artifact
//! - HTTP ingest, status and Prometheus metrics

mod archive;
mod config;
mod export;
mod gauge;
mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use rtd_core::{ArchiveStore, Generator, SnapshotCoordinator, SnapshotPublisher, SnapshotSink, WorkerSpec};

use archive::SqliteArchive;
use config::{GeneratorConfig, GeneratorKind, ServiceConfig};
use export::{FileSink, HttpPostSink, RsyncSink};
use gauge::GaugeDataGenerator;
use server::ServerState;

#[derive(Parser, Debug)]
#[command(name = "rtd")]
#[command(about = "Realtime weather statistics and gauge data service")]
struct Args {
    /// Service configuration file
    #[arg(short, long, env = "RTD_CONFIG", default_value = "config/rtd.yaml")]
    config: PathBuf,

    /// Archive database, overriding the configuration
    #[arg(long, env = "RTD_DATABASE")]
    database: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(short, long, env = "RTD_LISTEN")]
    listen: Option<String>,

    /// Disable the Prometheus exporter
    #[arg(long)]
    no_metrics: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// One worker per configured generator, each with its sinks.
fn build_workers(
    generators: &[GeneratorConfig],
    archive: Arc<dyn ArchiveStore>,
) -> Result<Vec<WorkerSpec>> {
    generators
        .iter()
        .map(|gen| {
            let generator: Box<dyn Generator> = match gen.kind {
                GeneratorKind::GaugeData => {
                    Box::new(GaugeDataGenerator::new(gen, archive.clone()))
                }
                GeneratorKind::Snapshot => {
                    let publisher = SnapshotPublisher::new(gen.name.clone(), gen.file_name());
                    match gen.min_interval_secs {
                        Some(secs) => Box::new(publisher.with_min_interval(Duration::from_secs(secs))),
                        None => Box::new(publisher),
                    }
                }
            };

            let mut sinks: Vec<Arc<dyn SnapshotSink>> =
                vec![Arc::new(FileSink::new(gen.output_path.clone()))];
            if let Some(http) = &gen.http_post {
                let sink = HttpPostSink::new(http)
                    .with_context(|| format!("generator {}: HTTP POST sink", gen.name))?;
                sinks.push(Arc::new(sink));
            }
            if let Some(rsync) = &gen.rsync {
                sinks.push(Arc::new(RsyncSink::new(gen.output_path.clone(), rsync)));
            }

            info!(
                generator = %gen.name,
                kind = ?gen.kind,
                output = %gen.output_path.display(),
                sinks = sinks.len(),
                "Configured generator"
            );
            Ok(WorkerSpec::new(generator, sinks))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let metrics = if args.no_metrics {
        None
    } else {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        info!("Prometheus metrics exporter initialized");
        Some(handle)
    };

    let mut config = ServiceConfig::load(&args.config)?;
    if let Some(database) = args.database {
        config.archive.database = database;
    }
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }

    info!(config = %args.config.display(), "Starting realtime data service");

    let archive: Arc<dyn ArchiveStore> = Arc::new(
        SqliteArchive::open(&config.archive.database)
            .await
            .with_context(|| format!("opening archive {}", config.archive.database.display()))?,
    );

    let specs = build_workers(&config.generators, archive.clone())?;
    let coordinator =
        SnapshotCoordinator::start(config.engine.clone(), archive.clone(), specs, Utc::now().timestamp())
            .await
            .context("starting snapshot coordinator")?;
    let (handle, events) = coordinator.event_channel(config.server.event_capacity);

    // Shutdown signal
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let server_state = Arc::new(ServerState {
        coordinator: handle,
        archive,
        metrics,
    });
    let listen = config.server.listen.clone();
    let server_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        if let Err(e) = server::run_server(server_state, &listen, server_shutdown).await {
            tracing::error!(error = %e, "Ingest server failed");
        }
    });

    // Handle Ctrl+C
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx_clone.send(()).ok();
    });

    let result = coordinator.run(events, shutdown_tx.subscribe()).await;
    // the server must not outlive the coordinator
    shutdown_tx.send(()).ok();
    result.context("snapshot coordinator stopped")?;

    info!("Realtime data service stopped");
    Ok(())
}
