//! Cascade Server - Main entry point
//!
//! Indexes publications and sales, settles dependency-weighted royalties and
//! serves the read-only query API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use cascade_core::{
    api::{self, AppState},
    config::Config,
    db::Database,
    events::{pipeline, EventProcessor},
    graph::{ArtifactSource, DependencyResolver, HttpArtifactSource, StaticArtifactSource},
    jobs::{spawn_sweep, IntervalSchedule, MaintenanceSweep},
    ledger::RoyaltyLedger,
    royalty::RoyaltyCalculator,
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = match std::env::var("CASCADE_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        Err(_) => Config::load().unwrap_or_else(|e| {
            eprintln!("Warning: Could not load config: {}. Using defaults.", e);
            Config::default()
        }),
    };

    telemetry::init_logging(&config.logging)?;
    let metrics_handle = telemetry::install_recorder()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Cascade Server"
    );

    // Connect to database
    let db = Database::connect(&config.database).await?;
    tracing::info!(url = %config.database.url, "Connected to database");

    // Wire components
    let source = build_source(&config)?;
    let resolver = DependencyResolver::from_config(
        db.clone(),
        source,
        &config.graph,
        &config.upstream,
    );
    let ledger = RoyaltyLedger::new(
        db.clone(),
        resolver.clone(),
        RoyaltyCalculator::from_config(&config.royalty),
    );

    let shutdown = CancellationToken::new();

    let pipeline = pipeline::spawn(
        EventProcessor::new(db.clone(), ledger.clone()),
        config.ingest.channel_capacity,
        shutdown.child_token(),
    );

    let sweep = if config.sweep.enabled {
        Some(spawn_sweep(
            MaintenanceSweep::new(db.clone(), ledger.clone(), config.sweep.batch_size),
            IntervalSchedule::from_config(&config.sweep),
            shutdown.child_token(),
        ))
    } else {
        tracing::info!("Maintenance sweep disabled");
        None
    };

    if let Some(path) = config.ingest.replay_file.clone() {
        let sender = pipeline.sender();
        tokio::spawn(async move {
            match pipeline::replay_file(&path, &sender).await {
                Ok(sent) => tracing::info!(path = %path.display(), events = sent, "Replay finished"),
                Err(err) => tracing::error!(
                    path = %path.display(),
                    error_code = %err.code(),
                    error = %err,
                    "Replay failed"
                ),
            }
        });
    }

    // Build router
    let app_state = AppState::new(db.clone(), ledger, resolver).with_metrics(metrics_handle);
    let app = api::build_router(app_state);

    // Start server
    let ip: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid server host: {}", config.server.host))?;
    let addr = SocketAddr::new(ip, config.server.port);
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Cleanup
    shutdown.cancel();
    let stats = pipeline.close().await;
    if let Some(sweep) = sweep {
        sweep.shutdown().await;
    }
    db.close().await;

    tracing::info!(
        applied = stats.applied(),
        duplicates = stats.duplicates(),
        rejected = stats.rejected(),
        failed = stats.failed(),
        "Server shutdown complete"
    );

    Ok(())
}

/// Remote source when a base URL is configured, else a local catalog.
fn build_source(config: &Config) -> anyhow::Result<Arc<dyn ArtifactSource>> {
    if let Some(base_url) = &config.upstream.base_url {
        tracing::info!(base_url = %base_url, "Using HTTP artifact source");
        let source = HttpArtifactSource::new(base_url.clone(), config.upstream.request_timeout)?;
        return Ok(Arc::new(source));
    }

    match &config.upstream.catalog_file {
        Some(path) => {
            let source = StaticArtifactSource::from_json_file(path)?;
            tracing::info!(
                path = %path.display(),
                artifacts = source.len(),
                "Using artifact catalog"
            );
            Ok(Arc::new(source))
        }
        None => {
            tracing::warn!("No artifact source configured; closures will be empty");
            Ok(Arc::new(StaticArtifactSource::new()))
        }
    }
}

/// Wait for a shutdown signal or for the process token to be cancelled.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = token.cancelled() => {},
    }

    tracing::info!("Shutdown signal received");
}
