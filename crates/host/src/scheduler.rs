//! Periodic, non-reentrant job runner
//!
//! A job is polled on a short fixed period and decides for itself whether to
//! act, usually with [`should_act`] over a coarser interval. Ticks run one at
//! a time on a single task, so a slow tick delays the next one instead of
//! overlapping it.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use purchase_core::unix_timestamp;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// `true` when `old_ts` and `new_ts` fall into different `interval`-second buckets
pub fn should_act(old_ts: u64, new_ts: u64, interval: u64) -> bool {
    interval != 0 && old_ts / interval != new_ts / interval
}

/// Source of unix time in seconds
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> u64;
}

/// Wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        unix_timestamp()
    }
}

/// A unit of periodic work
#[async_trait]
pub trait Job: Send + 'static {
    fn name(&self) -> &'static str;

    /// One polling step. Errors are handled inside; a tick never stops the loop.
    async fn tick(&mut self);
}

/// Handle to a running job
#[derive(Debug)]
pub struct SchedulerHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop issuing ticks and wait for the in-flight one to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(job = self.name, error = %e, "Scheduler task ended abnormally");
        }
        info!(job = self.name, "Scheduler stopped");
    }
}

/// Spawns jobs onto the tokio runtime
#[derive(Debug)]
pub struct Scheduler;

impl Scheduler {
    pub fn spawn<J: Job>(mut job: J, period: Duration) -> SchedulerHandle {
        let name = job.name();
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(job = name, ?period, "Scheduler started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                if *shutdown_rx.borrow() {
                    break;
                }
                debug!(job = name, "tick");
                job.tick().await;
            }
        });

        SchedulerHandle {
            name,
            shutdown,
            task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_should_act() {
        assert!(!should_act(600, 1199, 600));
        assert!(should_act(1199, 1200, 600));
        assert!(should_act(0, 5000, 600));
        assert!(!should_act(1200, 1200, 600));
        assert!(!should_act(0, 100, 0));
    }

    #[derive(Clone, Default)]
    struct SlowJob {
        ticks: Arc<AtomicUsize>,
        running: Arc<AtomicBool>,
        overlapped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Job for SlowJob {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn tick(&mut self) {
            if self.running.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.ticks.fetch_add(1, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_ticks_never_overlap_and_stop_waits() {
        let job = SlowJob::default();
        let handle = Scheduler::spawn(job.clone(), Duration::from_millis(5));
        assert_eq!(handle.name(), "slow");

        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.stop().await;

        let ticks = job.ticks.load(Ordering::SeqCst);
        assert!(ticks >= 2);
        assert!(!job.overlapped.load(Ordering::SeqCst));
        assert!(!job.running.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(job.ticks.load(Ordering::SeqCst), ticks);
    }
}
