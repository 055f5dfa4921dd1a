/// Collection scheduler
///
/// Drives the cycle: collect → serialize → store → publish. The first cycle
/// runs as soon as the scheduler starts, the following ones on a fixed
/// interval until the cancellation token fires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::aggregator::Aggregator;
use super::publish::{PublishError, PublishSink};
use super::store::StoreHandle;
use crate::utils::{format_interval, DEFAULT_PUBLISH_TIMEOUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("collection interval must be a positive duration")]
    InvalidInterval,

    #[error("scheduler has already been started")]
    AlreadyStarted,
}

/// Counters for the collection path
#[derive(Debug, Default)]
pub struct SchedulerStats {
    cycles: AtomicU64,
    dropped_cycles: AtomicU64,
    publish_failures: AtomicU64,
}

impl SchedulerStats {
    /// Cycles whose snapshot reached the store step
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Cycles discarded because the snapshot could not be serialized
    pub fn dropped_cycles(&self) -> u64 {
        self.dropped_cycles.load(Ordering::Relaxed)
    }

    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    Completed,
    Dropped,
    Abandoned,
}

pub struct Scheduler {
    aggregator: Aggregator,
    store: StoreHandle,
    sink: Option<Arc<dyn PublishSink>>,
    interval: Duration,
    publish_timeout: Duration,
    state: watch::Sender<SchedulerState>,
    stats: Arc<SchedulerStats>,
}

impl Scheduler {
    pub fn new(aggregator: Aggregator, store: StoreHandle, interval: Duration) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);

        Self {
            aggregator,
            store,
            sink: None,
            interval,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            state,
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn PublishSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Upper bound for one publish call, on top of the sink's own handling
    /// of the cancellation token
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// Run cycles until `cancel` fires
    ///
    /// Refuses to start with a zero interval. On cancellation the scheduler
    /// stops waiting for the next tick; a cycle in progress is abandoned if it
    /// has not reached the store yet, and an in-flight publish gets the token
    /// plus the publish timeout to finish.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SchedulerError> {
        if self.interval.is_zero() {
            return Err(SchedulerError::InvalidInterval);
        }
        if self.state() != SchedulerState::Idle {
            return Err(SchedulerError::AlreadyStarted);
        }

        self.state.send_replace(SchedulerState::Running);
        info!(
            interval = %format_interval(&self.interval),
            providers = ?self.aggregator.provider_names(),
            publish = self.sink.is_some(),
            "scheduler started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // The first tick completes immediately
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.run_cycle(&cancel).await == CycleOutcome::Abandoned {
                break;
            }
        }

        self.state.send_replace(SchedulerState::Stopping);
        info!(cycles = self.stats.cycles(), "scheduler shutting down");
        self.state.send_replace(SchedulerState::Stopped);

        Ok(())
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> CycleOutcome {
        let snapshot = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("collection abandoned on shutdown");
                return CycleOutcome::Abandoned;
            }
            snapshot = self.aggregator.collect() => snapshot,
        };

        let payload = match snapshot.encode() {
            Ok(payload) => payload,
            Err(err) => {
                self.stats.dropped_cycles.fetch_add(1, Ordering::Relaxed);
                error!(error = %err, "failed to serialize snapshot, dropping cycle");
                return CycleOutcome::Dropped;
            }
        };

        self.stats.cycles.fetch_add(1, Ordering::Relaxed);

        if self.store.set(&payload).await {
            debug!(bytes = payload.len(), "snapshot stored");
        } else if self.store.is_attached() {
            warn!(bytes = payload.len(), "store rejected snapshot payload");
        }

        if let Some(sink) = &self.sink {
            self.publish(sink.as_ref(), &payload, cancel).await;
        }

        if snapshot.errors.is_empty() {
            info!("system info collected");
        } else {
            warn!(
                error_count = snapshot.errors.len(),
                errors = ?snapshot.errors,
                "system info collected with errors"
            );
        }

        CycleOutcome::Completed
    }

    async fn publish(&self, sink: &dyn PublishSink, payload: &[u8], cancel: &CancellationToken) {
        let result = match tokio::time::timeout(self.publish_timeout, sink.publish(payload, cancel)).await {
            Ok(result) => result,
            Err(_) => Err(PublishError::TimedOut(self.publish_timeout)),
        };

        match result {
            Ok(()) => debug!(bytes = payload.len(), "snapshot published"),
            Err(PublishError::Cancelled) => {
                self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                info!("publish abandoned on shutdown");
            }
            Err(err) => {
                self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                error!(error = %err, "publish failed");
            }
        }
    }
}
