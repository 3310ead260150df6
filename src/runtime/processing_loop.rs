//! Recurring dispatcher task with start/pause control.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::core::{Dispatcher, MetricsMonitor, Reconciler};
use crate::runtime::tokio_spawner::Spawn;

/// Runs [`Dispatcher::tick`] every `interval` while started, with a
/// [`Reconciler::sweep`] every `reconcile_every` ticks.
///
/// Pausing stops the loop after the tick in flight, so every claimed item
/// still gets its outcome recorded.
pub struct ProcessingLoop<S: Spawn> {
    dispatcher: Arc<Dispatcher>,
    reconciler: Arc<Reconciler>,
    metrics: Arc<MetricsMonitor>,
    spawner: S,
    interval: Duration,
    reconcile_every: u32,
    running: AtomicBool,
    generation: AtomicU64,
    wake: Notify,
}

impl<S: Spawn> ProcessingLoop<S> {
    /// Create a stopped loop.
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        reconciler: Arc<Reconciler>,
        metrics: Arc<MetricsMonitor>,
        spawner: S,
        interval: Duration,
        reconcile_every: u32,
    ) -> Self {
        Self {
            dispatcher,
            reconciler,
            metrics,
            spawner,
            interval,
            reconcile_every,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            wake: Notify::new(),
        }
    }

    /// Whether the loop is started.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start ticking. Returns `false` if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = Arc::clone(self);
        self.spawner.spawn(async move { this.run(generation).await });
        tracing::info!(generation, interval = ?self.interval, "processing started");
        true
    }

    /// Stop after the current tick. Returns `false` if already paused.
    pub fn pause(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.wake.notify_one();
        tracing::info!("processing paused");
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::SeqCst) == generation
    }

    async fn run(&self, generation: u64) {
        let mut ticks: u32 = 0;
        while self.is_current(generation) {
            match self.dispatcher.tick().await {
                Ok(report) => {
                    if report.claimed > 0 {
                        self.metrics.invalidate();
                    }
                }
                Err(e) => tracing::error!(error = %e, "dispatch tick failed"),
            }
            ticks = ticks.wrapping_add(1);
            if self.reconcile_every > 0 && ticks % self.reconcile_every == 0 {
                match self.reconciler.sweep().await {
                    Ok(report) => {
                        if report.examined > 0 || report.requeued > 0 {
                            self.metrics.invalidate();
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "reconcile sweep failed"),
                }
            }
            if !self.is_current(generation) {
                break;
            }
            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                () = self.wake.notified() => {}
            }
        }
        tracing::debug!(generation, "processing loop exited");
    }
}
