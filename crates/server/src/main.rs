//! Marquee server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use marquee_core::config::AppConfig;
use marquee_server::bootstrap::ensure_admin_credential;
use marquee_server::{AppState, create_router};
use marquee_sync::artifacts::ArtifactPipeline;
use marquee_sync::engine::SyncEngine;
use marquee_sync::scheduler;
use marquee_upstream::{HttpUpstream, Throttle, UpstreamClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Marquee - a caching gateway for TV and movie metadata
#[derive(Parser, Debug)]
#[command(name = "marqueed")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "MARQUEE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Marquee v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, env vars can provide/override everything)
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    // MARQUEE_CONFIG is just the path, not configuration content
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("MARQUEE_") && key != "MARQUEE_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: marqueed --config /path/to/config.toml\n  \
             2. Environment variables: MARQUEE_SERVER__BIND=0.0.0.0:8080 \
             MARQUEE_UPSTREAM__API_KEY=... marqueed\n\n\
             See config/server.example.toml for example configuration.\n\
             Set MARQUEE_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("MARQUEE_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    match config.validate() {
        Ok(warnings) => {
            for warning in warnings {
                tracing::warn!("configuration warning: {warning}");
            }
        }
        Err(error) => anyhow::bail!("invalid configuration: {error}"),
    }

    marquee_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    // Verify object storage connectivity before accepting requests, so the
    // server does not report healthy when artifacts cannot be written.
    let objects = marquee_storage::from_config(&config.storage)
        .await
        .context("failed to initialize object storage")?;
    objects
        .health_check()
        .await
        .context("object storage health check failed")?;
    tracing::info!("Object storage initialized");

    let store = marquee_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    ensure_admin_credential(store.as_ref(), &config.admin).await?;

    let recovered = scheduler::recover_orphaned_jobs(&store).await?;
    if recovered > 0 {
        tracing::info!(recovered, "Orphaned sync jobs marked failed");
    }

    let throttle = Throttle::new(config.upstream.requests_per_second);
    let upstream: Arc<dyn UpstreamClient> = Arc::new(
        HttpUpstream::new(&config.upstream, throttle)
            .context("failed to initialize upstream client")?,
    );
    tracing::info!(base_url = %config.upstream.base_url, "Upstream client initialized");

    // Stale-serve pushes keys into this channel; the scheduler's refresh
    // worker drains it.
    let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();

    let cache = Arc::new(marquee_cache::TieredCache::new(
        store.clone(),
        upstream.clone(),
        config.cache.clone(),
        refresh_tx,
    ));
    cache.clone().start_sweeper();

    let artifacts = Arc::new(ArtifactPipeline::new(
        store.clone(),
        objects.clone(),
        upstream.clone(),
        config.artifacts.clone(),
    ));
    artifacts.clone().start_workers();

    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        upstream,
        cache.clone(),
        artifacts.clone(),
        config.sync.clone(),
    ));

    let state = AppState::new(config.clone(), store.clone(), objects, cache, engine.clone(), artifacts);

    if let Some(cleanup_interval) = state.rate_limit_cleanup_interval() {
        marquee_server::ratelimit::spawn_cleanup_task(state.rate_limit.clone(), cleanup_interval);
        tracing::info!(
            interval_secs = cleanup_interval.as_secs(),
            "Rate limiter cleanup task spawned"
        );
    }

    if config.sync.scheduler_enabled {
        scheduler::start(engine, store, &config.sync, refresh_rx);
        tracing::info!("Sync scheduler started");
    } else {
        tracing::info!("Sync scheduler disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
