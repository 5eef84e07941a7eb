pub mod api;
pub mod config;
pub mod constants;
pub mod db;
pub mod domain;
pub mod entities;
pub mod events;
pub mod rules;
pub mod services;
pub mod session;
pub mod state;

use std::sync::Arc;
use tokio::signal;
use tokio_cron_scheduler::{Job, JobScheduler};

use anyhow::Context;
pub use config::Config;
use state::SharedState;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;
    config.validate()?;

    let prometheus_handle = if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        info!("Prometheus metrics recorder initialized");
        Some(handle)
    } else {
        None
    };

    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let fmt_layer = tracing_subscriber::fmt::layer();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let (layer, task) = tracing_loki::builder()
            .label("app", "vendra")?
            .extra_field("env", "production")?
            .build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(
            "Loki logging initialized at {}",
            config.observability.loki_url
        );
    } else {
        registry.init();
    }

    run_daemon(config, prometheus_handle).await
}

async fn run_daemon(
    config: Config,
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> anyhow::Result<()> {
    info!(
        "Vendra v{} starting in daemon mode...",
        env!("CARGO_PKG_VERSION")
    );

    let shared = Arc::new(SharedState::new(config.clone()).await?);

    // Definitions come from declarative files; the registry decides which
    // of them are live.
    shared.definitions.load_all(&shared.registry).await?;

    let processor = shared.processor.clone();
    let processor_handle = tokio::spawn(async move {
        if let Err(e) = processor.start().await {
            error!("Event processor error: {}", e);
        }
    });

    let maintenance = if config.maintenance.enabled {
        Some(spawn_maintenance(shared.clone(), config.maintenance.sweep_interval_minutes).await?)
    } else {
        None
    };

    let server_handle: Option<tokio::task::JoinHandle<()>> = if config.server.enabled {
        let port = config.server.port;
        info!("Starting Web API on port {}", port);

        let api_state = api::create_app_state(shared.clone(), prometheus_handle);
        let app = api::router(api_state).await;
        let addr = format!("0.0.0.0:{}", port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        Some(tokio::spawn(async move {
            info!("Web server running at http://0.0.0.0:{}", port);
            if let Err(e) = axum::serve(listener, app).await {
                error!("Web server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Daemon running. Press Ctrl+C to stop.");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
        }
        Err(e) => {
            error!("Error listening for shutdown: {}", e);
        }
    }

    shared.processor.stop().await;
    processor_handle.abort();
    if let Some(mut sched) = maintenance {
        sched.shutdown().await.ok();
    }
    if let Some(handle) = server_handle {
        handle.abort();
    }
    info!("Daemon stopped");

    Ok(())
}

/// Periodic expiry sweep: stale sessions and dead magic links.
async fn spawn_maintenance(
    shared: Arc<SharedState>,
    interval_minutes: u64,
) -> anyhow::Result<JobScheduler> {
    let mut scheduler = JobScheduler::new().await?;

    let cron = format!("0 */{} * * * *", interval_minutes.clamp(1, 59));
    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let shared = shared.clone();
        Box::pin(async move {
            match shared.sessions.sweep_expired().await {
                Ok(0) => {}
                Ok(swept) => info!("Swept {} expired sessions", swept),
                Err(e) => warn!("Session sweep failed: {}", e),
            }
            match shared.magic_links.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!("Purged {} expired magic links", purged),
                Err(e) => warn!("Magic link purge failed: {}", e),
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    info!("Maintenance sweep scheduled every {} minutes", interval_minutes);

    Ok(scheduler)
}
