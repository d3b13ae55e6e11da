//! Fixed-interval cycle scheduler
//!
//! Each tick starts a live cycle in its own task. A tick that arrives while
//! a cycle is still running is skipped, or queued behind it when the overlap
//! policy is `queue` (at most one cycle waits; further ticks are dropped).

use crate::config::{OverlapPolicy, ScheduleConfig};
use crate::engine::Engine;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

pub struct Scheduler {
    engine: Arc<Engine>,
    config: ScheduleConfig,
    in_flight: Arc<AtomicUsize>,
}

/// Stops a running scheduler
#[derive(Debug, Clone)]
pub struct SchedulerShutdown {
    tx: watch::Sender<bool>,
}

impl SchedulerShutdown {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, config: ScheduleConfig) -> Self {
        Self {
            engine,
            config,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start ticking. The first cycle runs immediately.
    pub fn spawn(self) -> (SchedulerShutdown, JoinHandle<()>) {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(rx));
        (SchedulerShutdown { tx }, handle)
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles = JoinSet::new();

        info!(
            interval_secs = self.config.interval_secs,
            overlap = ?self.config.overlap,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick(&mut cycles),
                Some(finished) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = finished {
                        error!(error = %e, "Scheduled cycle task failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Let in-flight cycles finish so the ledger and breaker stay consistent
        info!(in_flight = cycles.len(), "Scheduler stopping");
        while cycles.join_next().await.is_some() {}
        info!("Scheduler stopped");
    }

    fn on_tick(&self, cycles: &mut JoinSet<()>) {
        let allowed = match self.config.overlap {
            OverlapPolicy::Skip => 1,
            OverlapPolicy::Queue => 2,
        };
        let running = self.in_flight.load(Ordering::SeqCst);
        if running >= allowed {
            warn!(running, overlap = ?self.config.overlap, "Previous cycle still running, tick skipped");
            return;
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let engine = self.engine.clone();
        let in_flight = self.in_flight.clone();
        let policy = self.config.overlap;
        cycles.spawn(async move {
            let result = match policy {
                OverlapPolicy::Skip => engine.try_run_cycle(false).await,
                OverlapPolicy::Queue => engine.run_cycle(false).await.map(Some),
            };
            match result {
                Ok(Some(report)) => info!(
                    cycle_id = %report.id,
                    executed = report.executed(),
                    rejected = report.rejected(),
                    "Scheduled cycle finished"
                ),
                Ok(None) => {}
                Err(e) => error!(error = %e, "Scheduled cycle failed"),
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }
}
