//! Background sweeps over due scheduled sends, due retries, stalled
//! pending rows and provider health.

use anyhow::Result;
use notify_channels::ProviderManager;
use notify_core::config::SchedulerConfig;
use notify_core::DispatchResult;
use notify_engine::DispatchEngine;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Sleep for `period`, returning false if cancelled first.
async fn pause(period: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(period) => true,
    }
}

async fn sweep_loop<F, Fut>(name: &'static str, interval: Duration, shutdown: CancellationToken, mut sweep: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DispatchResult<usize>>,
{
    tracing::info!(sweep = name, ?interval, "Starting sweep");

    loop {
        let period = match sweep().await {
            Ok(0) => interval,
            Ok(count) => {
                tracing::debug!(sweep = name, count, "Enqueued due notifications");
                interval
            }
            Err(e) => {
                tracing::error!(sweep = name, "Sweep failed: {}", e);
                ERROR_BACKOFF
            }
        };
        if !pause(period, &shutdown).await {
            break;
        }
    }

    tracing::info!(sweep = name, "Sweep stopped");
}

/// Enqueue `queued` notifications whose `scheduled_at` has passed.
pub async fn run_scheduled(engine: Arc<DispatchEngine>, interval: Duration, shutdown: CancellationToken) {
    sweep_loop("scheduled", interval, shutdown, || engine.process_scheduled()).await
}

/// Enqueue `retrying` notifications whose `next_retry_at` has passed.
pub async fn run_retries(engine: Arc<DispatchEngine>, interval: Duration, shutdown: CancellationToken) {
    sweep_loop("retries", interval, shutdown, || engine.process_retries()).await
}

/// Re-enqueue `pending` notifications left behind past the grace period.
pub async fn run_pending(engine: Arc<DispatchEngine>, interval: Duration, shutdown: CancellationToken) {
    sweep_loop("pending", interval, shutdown, || engine.process_pending()).await
}

/// Probe every registered provider and record the result on its config.
pub async fn run_health_checks(
    providers: Arc<ProviderManager>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!(?interval, "Starting provider health checks");

    loop {
        for (name, health) in providers.health_check_all().await {
            tracing::debug!(provider = %name, %health, "Provider health");
        }
        if !pause(interval, &shutdown).await {
            break;
        }
    }

    tracing::info!("Provider health checks stopped");
}

/// Run all sweeps until `shutdown` is cancelled.
pub async fn run(
    engine: Arc<DispatchEngine>,
    config: SchedulerConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let providers = engine.providers().clone();

    tokio::join!(
        run_scheduled(
            engine.clone(),
            Duration::from_millis(config.scheduled_interval_ms),
            shutdown.clone(),
        ),
        run_retries(
            engine.clone(),
            Duration::from_millis(config.retry_interval_ms),
            shutdown.clone(),
        ),
        run_pending(
            engine.clone(),
            Duration::from_millis(config.pending_interval_ms),
            shutdown.clone(),
        ),
        run_health_checks(
            providers,
            Duration::from_secs(config.health_interval_secs),
            shutdown.clone(),
        ),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_core::{Channel, Clock, Config, ManualClock, MemoryStore, NotifyContext, Repositories};
    use notify_engine::SendRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> (NotifyContext, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let ctx = NotifyContext::with_repositories(
            Config::from_env(),
            Repositories::from_store(Arc::new(MemoryStore::new())),
            clock.clone(),
        );
        (ctx, clock)
    }

    fn engine() -> (Arc<DispatchEngine>, notify_engine::DeliveryReceiver, Arc<ManualClock>) {
        let (ctx, clock) = context();
        let manager = Arc::new(ProviderManager::new(clock.clone()));
        let (engine, receiver) = DispatchEngine::new(&ctx, manager).unwrap();
        (Arc::new(engine), receiver, clock)
    }

    #[tokio::test]
    async fn test_sweep_loop_repeats_until_cancelled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let counter = calls.clone();
        let task = tokio::spawn(sweep_loop(
            "test",
            Duration::from_millis(5),
            shutdown.clone(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                }
            },
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_scheduled_sweep_enqueues_due_notification() {
        let (engine, mut receiver, clock) = engine();
        let mut request = SendRequest::new(Channel::Email, "Boarding starts at 9:40");
        request.recipient_email = Some("traveller@example.com".to_string());
        let at = clock.now() + chrono::Duration::minutes(10);
        let scheduled = engine.schedule(request, at).await.unwrap();

        clock.advance(chrono::Duration::minutes(10));

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_scheduled(
            engine.clone(),
            Duration::from_millis(5),
            shutdown.clone(),
        ));

        let id = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap();
        assert_eq!(id, Some(scheduled.id));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_sweep_recovers_stalled_send() {
        let (ctx, clock) = context();
        let manager = Arc::new(ProviderManager::new(clock.clone()));
        let (engine, _lost) = DispatchEngine::new(&ctx, manager.clone()).unwrap();
        let mut request = SendRequest::new(Channel::Email, "Your gate has changed to B12");
        request.recipient_email = Some("traveller@example.com".to_string());
        let sent = engine.send(request).await.unwrap();
        drop(engine);

        // A second engine over the same store starts with an empty queue.
        let (fresh, mut receiver) = DispatchEngine::new(&ctx, manager).unwrap();
        let fresh = Arc::new(fresh);
        let grace = ctx.config.dispatch.pending_grace_secs as i64;
        clock.advance(chrono::Duration::seconds(grace));

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_pending(
            fresh.clone(),
            Duration::from_millis(5),
            shutdown.clone(),
        ));

        let id = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap();
        assert_eq!(id, Some(sent.id));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_returns_after_cancel() {
        let (engine, _receiver, _clock) = engine();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(engine, SchedulerConfig::default(), shutdown.clone()));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
