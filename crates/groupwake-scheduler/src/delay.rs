//! Randomized-delay task scheduler.
//!
//! Each scheduled unit of work sleeps for a uniformly sampled delay and then
//! runs exactly once on its own tokio task. Shutdown stops new work, drops
//! tasks still waiting out their delay, and lets work that already started
//! run to completion.

use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use groupwake_core::error::{GroupWakeError, Result};
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Sample a delay uniformly from `range` (millisecond resolution).
pub fn sample_delay<R: Rng + ?Sized>(range: &RangeInclusive<Duration>, rng: &mut R) -> Duration {
    let lo = u64::try_from(range.start().as_millis()).unwrap_or(u64::MAX);
    let hi = u64::try_from(range.end().as_millis()).unwrap_or(u64::MAX);
    if hi <= lo {
        return Duration::from_millis(lo);
    }
    Duration::from_millis(rng.gen_range(lo..=hi))
}

/// Counters shared with spawned tasks.
#[derive(Debug, Default)]
struct DelayStats {
    scheduled: AtomicU64,
    executed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of scheduler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayStatsSnapshot {
    pub scheduled: u64,
    pub executed: u64,
    pub dropped: u64,
}

/// Runs work once after a random delay, concurrently with everything else.
pub struct DelayScheduler {
    tasks: Mutex<JoinSet<()>>,
    shutdown_tx: watch::Sender<bool>,
    accepting: AtomicBool,
    stats: Arc<DelayStats>,
}

impl DelayScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tasks: Mutex::new(JoinSet::new()),
            shutdown_tx,
            accepting: AtomicBool::new(true),
            stats: Arc::new(DelayStats::default()),
        }
    }

    /// Schedule `work` to run once after a delay sampled from `delay_range`.
    /// Returns the sampled delay. Must be called within a tokio runtime.
    pub fn schedule<F>(
        &self,
        id: &str,
        delay_range: RangeInclusive<Duration>,
        work: F,
    ) -> Result<Duration>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(GroupWakeError::Scheduler(format!(
                "scheduler is shutting down, rejected task {id}"
            )));
        }

        let delay = sample_delay(&delay_range, &mut rand::thread_rng());
        let mut shutdown = self.shutdown_tx.subscribe();
        let stats = self.stats.clone();
        let task_id = id.to_string();

        {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            while tasks.try_join_next().is_some() {}
            tasks.spawn(async move {
                // Only decide here; the watch guard must not live across `work`.
                let fired = tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = async {
                        let _ = shutdown.wait_for(|stop| *stop).await;
                    } => false,
                };
                if fired {
                    tracing::debug!("⏱️ Running delayed task {task_id} after {delay:?}");
                    work.await;
                    stats.executed.fetch_add(1, Ordering::Relaxed);
                } else {
                    stats.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::info!("🛑 Delayed task {task_id} dropped before it started");
                }
            });
        }

        self.stats.scheduled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("📥 Scheduled task {id} with delay {delay:?}");
        Ok(delay)
    }

    /// Tasks spawned and not yet finished.
    pub fn pending(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    pub fn stats(&self) -> DelayStatsSnapshot {
        DelayStatsSnapshot {
            scheduled: self.stats.scheduled.load(Ordering::Relaxed),
            executed: self.stats.executed.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stop accepting work and cancel tasks still waiting on their delay.
    /// With `await_in_flight`, wait for work that already started.
    pub async fn shutdown(&self, await_in_flight: bool) {
        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);

        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        if await_in_flight {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        tracing::error!("❌ Delayed task panicked: {e}");
                    }
                }
            }
        } else {
            tasks.detach_all();
        }
        tracing::info!("🛑 Delay scheduler stopped");
    }
}

impl Default for DelayScheduler {
    fn default() -> Self {
        Self::new()
    }
}
