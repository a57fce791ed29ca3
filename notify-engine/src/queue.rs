//! Bounded delivery queue and the worker pool that drains it.

use async_trait::async_trait;
use notify_core::{DispatchError, DispatchResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Producer side. Cloned into every path that accepts work.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<Uuid>,
    depth: Arc<AtomicUsize>,
}

pub struct DeliveryReceiver {
    rx: mpsc::Receiver<Uuid>,
    depth: Arc<AtomicUsize>,
}

pub fn delivery_queue(capacity: usize) -> (DeliveryQueue, DeliveryReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let depth = Arc::new(AtomicUsize::new(0));
    (
        DeliveryQueue {
            tx,
            depth: depth.clone(),
        },
        DeliveryReceiver { rx, depth },
    )
}

impl DeliveryQueue {
    /// Waits while the queue is full.
    pub async fn enqueue(&self, id: Uuid) -> DispatchResult<()> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(id).await.is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(DispatchError::SendFailed("delivery queue is closed".to_string()));
        }
        Ok(())
    }

    /// Ids accepted but not yet picked up by a worker.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

impl DeliveryReceiver {
    pub async fn recv(&mut self) -> Option<Uuid> {
        let id = self.rx.recv().await;
        if id.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        id
    }

    pub fn try_recv(&mut self) -> Option<Uuid> {
        let id = self.rx.try_recv().ok();
        if id.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        id
    }
}

#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn deliver(&self, id: Uuid);
}

pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Pull ids until cancelled or the queue closes, running at most
    /// `concurrency` deliveries at once. Returns after in-flight deliveries
    /// finish.
    pub async fn run<H: DeliveryHandler>(
        self,
        mut receiver: DeliveryReceiver,
        handler: Arc<H>,
        shutdown: CancellationToken,
    ) {
        tracing::info!(concurrency = self.concurrency, "Starting delivery workers");
        let permits = Arc::new(Semaphore::new(self.concurrency));

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let id = tokio::select! {
                _ = shutdown.cancelled() => break,
                id = receiver.recv() => match id {
                    Some(id) => id,
                    None => break,
                },
            };

            let handler = handler.clone();
            tokio::spawn(async move {
                handler.deliver(id).await;
                drop(permit);
            });
        }

        tracing::info!("Delivery workers stopping, waiting for in-flight attempts");
        let _ = permits.acquire_many(self.concurrency as u32).await;
        tracing::info!("Delivery workers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Recorder {
        seen: Mutex<Vec<Uuid>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl DeliveryHandler for Recorder {
        async fn deliver(&self, id: Uuid) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.seen.lock().push(id);
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_depth_gauge_tracks_queue() {
        let (queue, mut receiver) = delivery_queue(8);
        queue.enqueue(Uuid::new_v4()).await.unwrap();
        queue.enqueue(Uuid::new_v4()).await.unwrap();
        assert_eq!(queue.depth(), 2);

        receiver.try_recv().unwrap();
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_fails_once_receiver_dropped() {
        let (queue, receiver) = delivery_queue(1);
        drop(receiver);
        assert!(queue.enqueue(Uuid::new_v4()).await.is_err());
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency_and_drains_on_close() {
        let (queue, receiver) = delivery_queue(16);
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        for _ in 0..6 {
            queue.enqueue(Uuid::new_v4()).await.unwrap();
        }
        drop(queue);

        WorkerPool::new(2)
            .run(receiver, recorder.clone(), CancellationToken::new())
            .await;

        assert_eq!(recorder.seen.lock().len(), 6);
        assert!(recorder.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_pool_stops_on_cancel() {
        let (_queue, receiver) = delivery_queue(4);
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(
            Duration::from_secs(1),
            WorkerPool::new(2).run(receiver, recorder, shutdown),
        )
        .await
        .unwrap();
    }
}
