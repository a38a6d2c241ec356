//! scheduler: FIFO task queue with optional per-tick rate gating.
//!
//! Two modes, selected at construction:
//!
//! - **Unlimited**: every dequeued task is spawned concurrently as soon as
//!   it's pulled off the queue.
//! - **Rate-limited**: a ticker fires at `tick_ms`; the next dequeued task
//!   waits for the next tick before it is dispatched. This is a strict
//!   inter-launch gap, not a token bucket — bursts never catch up.
//!
//! On shutdown the scheduler drains whatever is left in the queue, honoring
//! the same mode (a rate-limited tail still waits out its ticks).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler queue is full")]
    QueueFull,
    #[error("scheduler queue is closed")]
    QueueClosed,
}

#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::Sender<Task>,
}

/// Default buffered queue capacity, per spec §4.1.
pub const DEFAULT_CAPACITY: usize = 8192;

impl Scheduler {
    /// Start an unlimited scheduler: dequeued tasks are spawned immediately.
    pub fn unlimited(capacity: usize, shutdown: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(run_unlimited(rx, shutdown));
        Self { tx }
    }

    /// Start a rate-limited scheduler: `tick_ms` is the minimum gap between
    /// successive task launches. A negative/zero value is nonsensical for a
    /// `Duration`-backed ticker; callers are expected to validate at the
    /// config layer and a `0` here degenerates to "fire every tick of the
    /// underlying tokio timer resolution", which is logged once.
    pub fn rate_limited(capacity: usize, tick_ms: u64, shutdown: CancellationToken) -> Self {
        if tick_ms == 0 {
            warn!("rate-limited scheduler started with tick_ms = 0");
        }
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(run_rate_limited(rx, Duration::from_millis(tick_ms.max(1)), shutdown));
        Self { tx }
    }

    /// Enqueue a task. A task is required (there is no `Option` overload) —
    /// the source's "nil task is a programming error" fail policy is
    /// unrepresentable once the type system requires a real future.
    pub async fn submit<F>(&self, task: F) -> Result<(), SchedulerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx
            .send(Box::pin(task))
            .await
            .map_err(|_| SchedulerError::QueueClosed)
    }

    /// Non-blocking enqueue; returns `QueueFull` instead of waiting when the
    /// buffered capacity is exceeded.
    pub fn try_submit<F>(&self, task: F) -> Result<(), SchedulerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx.try_send(Box::pin(task)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SchedulerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SchedulerError::QueueClosed,
        })
    }
}

async fn run_unlimited(mut rx: mpsc::Receiver<Task>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            task = rx.recv() => {
                match task {
                    Some(task) => { tokio::spawn(task); }
                    None => return,
                }
            }
        }
    }
    // Drain: dispatch whatever remains, honoring "unlimited" semantics.
    while let Ok(task) = rx.try_recv() {
        tokio::spawn(task);
    }
    rx.close();
    while let Some(task) = rx.recv().await {
        tokio::spawn(task);
    }
}

async fn run_rate_limited(mut rx: mpsc::Receiver<Task>, tick: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match rx.try_recv() {
                    Ok(task) => { tokio::spawn(task); }
                    Err(mpsc::error::TryRecvError::Empty) => {}
                    Err(mpsc::error::TryRecvError::Disconnected) => return,
                }
            }
        }
    }
    // Drain tail: still gated by the ticker, one task per tick.
    rx.close();
    loop {
        let task = match rx.try_recv() {
            Ok(task) => task,
            Err(mpsc::error::TryRecvError::Empty) => match rx.recv().await {
                Some(task) => task,
                None => break,
            },
            Err(mpsc::error::TryRecvError::Disconnected) => break,
        };
        ticker.tick().await;
        tokio::spawn(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn unlimited_scheduler_runs_all_tasks() {
        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::unlimited(16, shutdown.clone());
        let counter = Arc::new(AtomicU64::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            scheduler
                .submit(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_scheduler_enforces_minimum_gap() {
        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::rate_limited(16, 100, shutdown.clone());
        let launch_times = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        for _ in 0..5 {
            let launch_times = launch_times.clone();
            let start = Instant::now();
            scheduler
                .submit(async move {
                    launch_times.lock().await.push(start.elapsed());
                })
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(550)).await;
        let times = launch_times.lock().await;
        assert_eq!(times.len(), 5);
        for pair in times.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(100), "launch gap {gap:?} under the 100ms minimum");
        }
        shutdown.cancel();
    }

    #[tokio::test]
    async fn shutdown_drains_remaining_tasks() {
        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::unlimited(16, shutdown.clone());
        let counter = Arc::new(AtomicU64::new(0));
        for _ in 0..3 {
            let counter = counter.clone();
            scheduler.submit(async move { counter.fetch_add(1, Ordering::SeqCst); }).await.unwrap();
        }
        shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
