//! Single consumer of worker results.
//!
//! Drains the shared channel, checkpoints successes to the output store and
//! stops the pool once the target is met.

use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

use super::WorkerHandle;
use super::store::{OutputStore, StoreError};
use crate::modules::events::{EventDispatcher, HarvestEvent, PersistEvent};
use crate::protocol::{ItemRecord, ItemReport};
use crate::scheduler::WorkerSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    pub target: usize,
    pub save_every: usize,
    pub idle_sleep: Duration,
    pub join_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            target: 50_000,
            save_every: 50,
            idle_sleep: Duration::from_millis(500),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// Totals of a finished harvest.
#[derive(Debug, Clone, Default)]
pub struct HarvestSummary {
    pub reports: usize,
    pub successes: usize,
    pub failures: usize,
    pub persisted_rows: usize,
    pub target_reached: bool,
    pub elapsed: Duration,
    pub workers: Vec<WorkerSummary>,
    pub failed_workers: Vec<usize>,
}

impl HarvestSummary {
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.successes as f64 / secs } else { 0.0 }
    }
}

pub struct ResultAggregator {
    store: OutputStore,
    config: AggregatorConfig,
    events: EventDispatcher,
    records: Vec<ItemRecord>,
    failures: usize,
    last_save: usize,
}

impl ResultAggregator {
    pub fn new(store: OutputStore, config: AggregatorConfig) -> Self {
        Self {
            store,
            config,
            events: EventDispatcher::new(),
            records: Vec::new(),
            failures: 0,
            last_save: 0,
        }
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    /// Consumes results until every worker is done or the target is met,
    /// then runs the final persistence pass.
    pub async fn run(
        mut self,
        mut results: UnboundedReceiver<ItemReport>,
        workers: Vec<WorkerHandle>,
    ) -> Result<HarvestSummary, StoreError> {
        let started = Instant::now();
        let mut target_reached = false;

        loop {
            let disconnected = self.drain(&mut results);

            if self.records.len() - self.last_save >= self.config.save_every {
                if let Err(err) = self.save() {
                    log::error!("checkpoint failed, stopping workers: {}", err);
                    stop(&workers);
                    self.join(workers).await;
                    self.drain(&mut results);
                    if let Err(last) = self.save() {
                        log::error!("final save after failed checkpoint failed too: {}", last);
                    }
                    return Err(err);
                }
                log::info!(
                    "checkpoint: {} ok ({:.1}/s)",
                    self.records.len(),
                    self.records.len() as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON)
                );
            }

            if self.records.len() >= self.config.target {
                log::info!("target of {} reached, stopping workers", self.config.target);
                stop(&workers);
                target_reached = true;
                break;
            }

            // Every sender lives in a worker task, so a closed channel means
            // all workers have exited.
            if disconnected {
                break;
            }
            tokio::time::sleep(self.config.idle_sleep).await;
        }

        let (summaries, failed_workers) = self.join(workers).await;
        self.drain(&mut results);
        let stats = self.save()?;

        let summary = HarvestSummary {
            reports: self.records.len() + self.failures,
            successes: self.records.len(),
            failures: self.failures,
            persisted_rows: stats.rows,
            target_reached,
            elapsed: started.elapsed(),
            workers: summaries,
            failed_workers,
        };
        log::info!(
            "harvest complete: {} ok, {} failed, {} rows stored, {:.2}/s",
            summary.successes,
            summary.failures,
            summary.persisted_rows,
            summary.rate()
        );
        Ok(summary)
    }

    /// Pulls everything currently queued. Returns `true` once the channel is
    /// empty and every sender has been dropped.
    fn drain(&mut self, results: &mut UnboundedReceiver<ItemReport>) -> bool {
        loop {
            match results.try_recv() {
                Ok(report) => self.accept(report),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
    }

    fn accept(&mut self, report: ItemReport) {
        match report.result {
            Ok(record) => self.records.push(record),
            Err(error) => {
                log::debug!("{} -> {}", report.url, error);
                self.failures += 1;
            }
        }
    }

    fn save(&mut self) -> Result<super::PersistStats, StoreError> {
        let stats = self.store.persist(&self.records)?;
        self.last_save = self.records.len();
        self.events.dispatch(HarvestEvent::Persisted(PersistEvent {
            path: self.store.path().to_path_buf(),
            rows: stats.rows,
            added: stats.added,
            timestamp: Utc::now(),
        }));
        Ok(stats)
    }

    async fn join(&self, workers: Vec<WorkerHandle>) -> (Vec<WorkerSummary>, Vec<usize>) {
        let mut summaries = Vec::new();
        let mut failed = Vec::new();
        for worker in workers {
            match tokio::time::timeout(self.config.join_timeout, worker.task).await {
                Ok(Ok(Ok(summary))) => summaries.push(summary),
                Ok(Ok(Err(err))) => {
                    log::error!("[W{}] stopped early: {}", worker.worker_id, err);
                    failed.push(worker.worker_id);
                }
                Ok(Err(err)) if err.is_cancelled() => {
                    log::info!("[W{}] stopped", worker.worker_id);
                }
                Ok(Err(err)) => {
                    log::error!("[W{}] panicked: {}", worker.worker_id, err);
                    failed.push(worker.worker_id);
                }
                Err(_) => {
                    log::warn!("[W{}] did not stop within {:?}", worker.worker_id, self.config.join_timeout);
                    failed.push(worker.worker_id);
                }
            }
        }
        (summaries, failed)
    }
}

fn stop(workers: &[WorkerHandle]) {
    for worker in workers {
        worker.task.abort();
    }
}
