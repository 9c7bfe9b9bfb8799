use anyhow::{Context, Result};
use recording_service::{
    Config, PgRecordingRepository, RecordingService, RetentionScheduler, S3Storage,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Ridecast Recording Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let repository = Arc::new(
        PgRecordingRepository::new(&config.database)
            .await
            .context("Failed to initialize recording repository")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        repository
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let storage = Arc::new(S3Storage::new(&config.s3).await);

    // Dead letters land in the same database as the recordings
    let (service, worker) =
        RecordingService::new(&config, repository.clone(), storage, repository.clone());

    let shutdown = CancellationToken::new();

    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));
    service.recover_pending_processing().await;

    let cleanup_handle = tokio::spawn(run_cleanup(
        service.retention.clone(),
        config.cleanup_interval(),
        shutdown.clone(),
    ));

    info!("Recording service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down recording service");

    shutdown.cancel();
    for (name, handle) in [("processing worker", worker_handle), ("cleanup", cleanup_handle)] {
        if let Err(e) = handle.await {
            error!(error = %e, task = name, "Task ended abnormally");
        }
    }

    info!("Recording service stopped");

    Ok(())
}

/// Trigger retention cleanup on a fixed interval until shutdown
async fn run_cleanup(scheduler: Arc<RetentionScheduler>, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = scheduler.cleanup_expired_recordings().await {
                    error!(error = %e, "Retention cleanup failed");
                }
            }
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
