//! Usage meter - container CPU and memory accounting
//!
//! Resolves the container's CPU entitlement once, then logs one utilization
//! sample per interval while a synthetic workload keeps the container busy.

use anyhow::{Context, Result};
use clap::Parser;
use meter_lib::{
    accounting::EntitlementResolver,
    sampler::{build_source, select_backend, BackendChoice, LoopExit, SamplingLoopBuilder},
    workload::{report_results, Workload},
    StructuredLogger,
};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::{LogFormat, MeterConfig};

const METER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Container resource usage meter
#[derive(Parser, Debug)]
#[command(name = "usage-meter", version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "METER_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Sampling backend (auto, cgroup, runtime)
    #[arg(short, long)]
    backend: Option<BackendChoice>,

    /// Do not start the synthetic workload
    #[arg(long)]
    no_workload: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = MeterConfig::load(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if cli.no_workload {
        config.workload_enabled = false;
    }

    init_tracing(config.log_format);

    let unit = std::env::var(&config.entity_id_var)
        .ok()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "self".to_string());
    let logger = StructuredLogger::new(unit);

    let backend = select_backend(config.backend, &config.cgroup_root).await;
    logger.log_startup(METER_VERSION, backend);

    let entitlement = EntitlementResolver::new(&config.cgroup_root)
        .resolve()
        .await;
    logger.log_entitlement(entitlement);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = JoinSet::new();

    match build_source(backend, &config.source_settings(), entitlement) {
        Ok(source) => {
            let (sampling_loop, _samples) = SamplingLoopBuilder::new()
                .source(source)
                .logger(logger.clone())
                .interval(config.sampler_config().interval)
                .build()
                .context("Failed to build sampling loop")?;

            let shutdown = shutdown_tx.subscribe();
            tasks.spawn(async move {
                match sampling_loop.run(shutdown).await {
                    LoopExit::Shutdown => info!("Sampling loop stopped"),
                    LoopExit::Disabled => warn!("Sampling loop disabled, workload keeps running"),
                }
            });
        }
        Err(e) => logger.log_monitoring_disabled(backend, &e),
    }

    if config.workload_enabled {
        let (workload, results) = Workload::new(config.workload_config());
        let shutdown = shutdown_tx.subscribe();
        tasks.spawn(async move {
            let stats = workload.run(shutdown).await;
            info!(
                spawned = stats.spawned,
                completed = stats.completed,
                "Workload stopped"
            );
        });
        tasks.spawn(report_results(results));
    } else {
        info!("Synthetic workload disabled");
    }

    let reason = shutdown_signal().await?;
    logger.log_shutdown(reason);
    let _ = shutdown_tx.send(());

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Task ended abnormally");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init(),
    }
}

/// Wait for SIGINT, or SIGTERM on unix
async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("Failed to listen for SIGINT")?;
                Ok("SIGINT received")
            }
            _ = terminate.recv() => Ok("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for SIGINT")?;
        Ok("SIGINT received")
    }
}
