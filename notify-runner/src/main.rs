use anyhow::Result;
use notify_channels::{register_default_providers, ProviderManager};
use notify_core::{Config, NotifyContext};
use notify_engine::{DispatchEngine, WorkerPool};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    tracing::info!("Starting notification dispatch service");

    let config = Config::from_env();
    let ctx = NotifyContext::new(config).await?;

    let providers = Arc::new(
        ProviderManager::new(ctx.clock.clone())
            .with_store(ctx.repositories.provider_configs.clone()),
    );
    let loaded = providers.load_configs().await?;
    tracing::info!(loaded, "Provider configs loaded");
    register_default_providers(&providers, &ctx.config.delivery)?;

    let (engine, receiver) = DispatchEngine::new(&ctx, providers)?;
    let engine = Arc::new(engine);
    let shutdown = CancellationToken::new();

    let workers = tokio::spawn(
        WorkerPool::new(ctx.config.dispatch.worker_concurrency).run(
            receiver,
            engine.clone(),
            shutdown.clone(),
        ),
    );

    let scheduler_engine = engine.clone();
    let scheduler_config = ctx.config.scheduler.clone();
    let scheduler_shutdown = shutdown.clone();
    let scheduler = tokio::spawn(async move {
        if let Err(e) =
            notify_scheduler::run(scheduler_engine, scheduler_config, scheduler_shutdown).await
        {
            tracing::error!("Scheduler error: {}", e);
        }
    });

    tracing::info!("Dispatch service running");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutdown signal received, draining");
    shutdown.cancel();
    scheduler.await?;
    workers.await?;

    tracing::info!(pending = engine.queue_depth(), "Dispatch service stopped");
    Ok(())
}
