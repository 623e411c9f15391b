//! Event system for harvest activity.
//!
//! Schedulers and the aggregator report what they do through an
//! [`EventDispatcher`]; logging and metrics hang off it as handlers.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::metrics::MetricsCollector;
use crate::protocol::FetchOutcome;

/// Why a worker replaced its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    /// Consecutive blocked replies reached the configured streak.
    BlockStreak,
    /// URLs were requeued at the end of a round.
    RoundRequeue,
    /// An on-demand attempt was blocked or failed.
    OnDemandRetry,
}

impl RotationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationReason::BlockStreak => "block_streak",
            RotationReason::RoundRequeue => "round_requeue",
            RotationReason::OnDemandRetry => "on_demand_retry",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub worker_id: usize,
    pub session_id: String,
    pub usable: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RotationEvent {
    pub worker_id: usize,
    pub reason: RotationReason,
    pub rotations: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AttemptEvent {
    pub worker_id: usize,
    pub url: String,
    pub outcome: FetchOutcome,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub worker_id: usize,
    pub round: usize,
    pub processed: usize,
    pub total: usize,
    pub successes: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RoundEvent {
    pub worker_id: usize,
    pub round: usize,
    pub requeued: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PersistEvent {
    pub path: PathBuf,
    pub rows: usize,
    pub added: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct WorkerDoneEvent {
    pub worker_id: usize,
    pub reported: usize,
    pub successes: usize,
    pub rotations: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum HarvestEvent {
    SessionAcquired(SessionEvent),
    Rotation(RotationEvent),
    Attempt(AttemptEvent),
    BatchProgress(ProgressEvent),
    RoundCompleted(RoundEvent),
    Persisted(PersistEvent),
    WorkerFinished(WorkerDoneEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &HarvestEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Dispatcher wired to the logging and metrics handlers.
    pub fn with_defaults(metrics: MetricsCollector) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register_handler(Arc::new(LoggingHandler));
        dispatcher.register_handler(Arc::new(MetricsHandler::new(metrics)));
        dispatcher
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: HarvestEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &HarvestEvent) {
        match event {
            HarvestEvent::SessionAcquired(session) => {
                if session.usable {
                    log::info!("[W{}] session sid={} acquired", session.worker_id, session.session_id);
                } else {
                    log::warn!("[W{}] session sid={} has no token", session.worker_id, session.session_id);
                }
            }
            HarvestEvent::Rotation(rotation) => {
                log::info!(
                    "[W{}] rotating session ({}), rotation #{}",
                    rotation.worker_id,
                    rotation.reason.as_str(),
                    rotation.rotations
                );
            }
            HarvestEvent::Attempt(attempt) => {
                log::debug!(
                    "[W{}] {} -> {} ({:.2}s)",
                    attempt.worker_id,
                    attempt.url,
                    attempt.outcome.label(),
                    attempt.latency.as_secs_f64()
                );
            }
            HarvestEvent::BatchProgress(progress) => {
                log::info!(
                    "[W{}] round {} {}/{} processed, {} ok",
                    progress.worker_id,
                    progress.round,
                    progress.processed,
                    progress.total,
                    progress.successes
                );
            }
            HarvestEvent::RoundCompleted(round) => {
                log::info!(
                    "[W{}] round {} done, {} url(s) requeued",
                    round.worker_id,
                    round.round,
                    round.requeued
                );
            }
            HarvestEvent::Persisted(persist) => {
                log::info!(
                    "saved {} rows (+{}) to {}",
                    persist.rows,
                    persist.added,
                    persist.path.display()
                );
            }
            HarvestEvent::WorkerFinished(done) => {
                log::info!(
                    "[W{}] finished: {} reported, {} ok, {} rotation(s)",
                    done.worker_id,
                    done.reported,
                    done.successes,
                    done.rotations
                );
            }
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &HarvestEvent) {
        match event {
            HarvestEvent::Attempt(attempt) => {
                self.metrics
                    .record_attempt(attempt.worker_id, &attempt.outcome, attempt.latency);
            }
            HarvestEvent::Rotation(rotation) => self.metrics.record_rotation(rotation.worker_id),
            HarvestEvent::SessionAcquired(session) => self.metrics.record_session(session.worker_id),
            _ => {}
        }
    }
}
