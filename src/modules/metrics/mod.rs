//! Metrics collection utilities.
//!
//! Aggregates attempt outcomes, latencies, rotations and session
//! acquisitions globally and per worker.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::protocol::FetchOutcome;

/// Aggregated metrics across all workers.
#[derive(Debug, Clone)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub attempts: u64,
    pub successes: u64,
    pub blocked: u64,
    pub not_found: u64,
    pub errors: u64,
    pub rotations: u64,
    pub sessions: u64,
    pub average_latency: Option<Duration>,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            attempts: 0,
            successes: 0,
            blocked: 0,
            not_found: 0,
            errors: 0,
            rotations: 0,
            sessions: 0,
            average_latency: None,
        }
    }
}

impl GlobalStats {
    /// Share of attempts that came back blocked.
    pub fn block_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.blocked as f64 / self.attempts as f64
        }
    }
}

/// Worker-scoped metrics snapshot.
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub worker_id: usize,
    pub attempts: u64,
    pub successes: u64,
    pub blocked: u64,
    pub rotations: u64,
    pub sessions: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
    pub block_streak: u32,
}

impl WorkerStats {
    fn from_accumulator(worker_id: usize, acc: &WorkerAccumulator) -> Self {
        let (avg, p95) = acc.latency_stats();
        Self {
            worker_id,
            attempts: acc.attempts,
            successes: acc.successes,
            blocked: acc.blocked,
            rotations: acc.rotations,
            sessions: acc.sessions,
            average_latency: avg,
            p95_latency: p95,
            block_streak: acc.block_streak,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub workers: Vec<WorkerStats>,
}

#[derive(Debug)]
struct WorkerAccumulator {
    attempts: u64,
    successes: u64,
    blocked: u64,
    rotations: u64,
    sessions: u64,
    latencies: VecDeque<Duration>,
    max_window: usize,
    block_streak: u32,
}

impl WorkerAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            attempts: 0,
            successes: 0,
            blocked: 0,
            rotations: 0,
            sessions: 0,
            latencies: VecDeque::with_capacity(max_window),
            max_window,
            block_streak: 0,
        }
    }

    fn record(&mut self, outcome: &FetchOutcome, latency: Duration) {
        self.attempts += 1;
        match outcome {
            FetchOutcome::Success(_) => {
                self.successes += 1;
                self.block_streak = 0;
            }
            FetchOutcome::Blocked => {
                self.blocked += 1;
                self.block_streak = self.block_streak.saturating_add(1);
            }
            _ => {}
        }

        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    fn latency_stats(&self) -> (Option<Duration>, Option<Duration>) {
        if self.latencies.is_empty() {
            return (None, None);
        }
        let mut samples: Vec<_> = self.latencies.iter().cloned().collect();
        samples.sort_unstable();
        let avg = samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / samples.len() as f64;
        let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        (Some(Duration::from_secs_f64(avg)), Some(samples[p95_index]))
    }
}

#[derive(Debug)]
struct MetricsState {
    global: GlobalStats,
    max_window: usize,
    workers: BTreeMap<usize, WorkerAccumulator>,
}

impl MetricsState {
    fn new(max_window: usize) -> Self {
        Self {
            global: GlobalStats::default(),
            max_window,
            workers: BTreeMap::new(),
        }
    }

    fn accumulator_mut(&mut self, worker_id: usize) -> &mut WorkerAccumulator {
        let window = self.max_window;
        self.workers
            .entry(worker_id)
            .or_insert_with(|| WorkerAccumulator::new(window))
    }
}

/// Thread-safe metrics collector shared by all workers.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(128)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16)))),
        }
    }

    pub fn record_attempt(&self, worker_id: usize, outcome: &FetchOutcome, latency: Duration) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.attempts += 1;
        match outcome {
            FetchOutcome::Success(_) => guard.global.successes += 1,
            FetchOutcome::Blocked => guard.global.blocked += 1,
            FetchOutcome::NotFound => guard.global.not_found += 1,
            FetchOutcome::TransientError(_) | FetchOutcome::InvalidInput => guard.global.errors += 1,
        }

        guard.global.average_latency = Some(match guard.global.average_latency {
            Some(avg) => Duration::from_secs_f64(avg.as_secs_f64() * 0.9 + latency.as_secs_f64() * 0.1),
            None => latency,
        });

        guard.accumulator_mut(worker_id).record(outcome, latency);
    }

    pub fn record_rotation(&self, worker_id: usize) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.rotations += 1;
        let acc = guard.accumulator_mut(worker_id);
        acc.rotations += 1;
        acc.block_streak = 0;
    }

    pub fn record_session(&self, worker_id: usize) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.sessions += 1;
        guard.accumulator_mut(worker_id).sessions += 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.inner.lock().expect("metrics lock poisoned");
        let workers = guard
            .workers
            .iter()
            .map(|(worker_id, acc)| WorkerStats::from_accumulator(*worker_id, acc))
            .collect();
        MetricsSnapshot {
            global: guard.global.clone(),
            workers,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_outcomes_per_worker() {
        let metrics = MetricsCollector::new();
        metrics.record_attempt(0, &FetchOutcome::Blocked, Duration::from_millis(150));
        metrics.record_attempt(0, &FetchOutcome::Blocked, Duration::from_millis(200));
        metrics.record_attempt(1, &FetchOutcome::NotFound, Duration::from_millis(80));
        metrics.record_rotation(0);
        metrics.record_session(0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.global.attempts, 3);
        assert_eq!(snapshot.global.blocked, 2);
        assert_eq!(snapshot.global.not_found, 1);
        assert_eq!(snapshot.global.rotations, 1);

        let worker = snapshot.workers.iter().find(|w| w.worker_id == 0).unwrap();
        assert_eq!(worker.attempts, 2);
        assert_eq!(worker.rotations, 1);
        assert_eq!(worker.block_streak, 0);
        assert!(worker.p95_latency.unwrap() >= Duration::from_millis(150));
    }

    #[test]
    fn block_rate_handles_no_attempts() {
        let stats = GlobalStats::default();
        assert_eq!(stats.block_rate(), 0.0);
    }
}
