//! Round-based bulk scheduler for one worker's partition.
//!
//! A round walks the pending URLs in batches. Every batch is dispatched
//! concurrently and awaited as a whole before the next one starts. Blocked
//! URLs with budget left are carried into the next round, and the session is
//! always rotated between rounds. Within a round, a run of consecutive
//! blocked replies rotates the session before the next batch.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::{StreamExt, stream};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use super::{SessionSlot, observed_attempt};
use crate::fetch::ItemFetcher;
use crate::modules::events::{
    HarvestEvent, ProgressEvent, RotationReason, RoundEvent, WorkerDoneEvent,
};
use crate::protocol::{FetchOutcome, ItemError, ItemId, ItemReport};
use crate::session::SessionError;

/// Longest error message reported per URL by bulk runs.
const MAX_ERROR_LEN: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub concurrency: usize,
    pub block_streak: u32,
    pub max_retries: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 30,
            concurrency: 30,
            block_streak: 10,
            max_retries: 2,
        }
    }
}

impl BatchConfig {
    /// Batch width and in-flight limit move together.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_size = concurrency.max(1);
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_block_streak(mut self, streak: u32) -> Self {
        self.block_streak = streak.max(1);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("worker {worker_id}: {source}")]
    Session {
        worker_id: usize,
        #[source]
        source: SessionError,
    },
    #[error("worker {0}: result channel closed")]
    ChannelClosed(usize),
}

/// Totals for one finished worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub worker_id: usize,
    pub reported: usize,
    pub successes: usize,
    pub not_found: usize,
    pub invalid: usize,
    pub max_retries: usize,
    pub errors: usize,
    pub attempts: usize,
    pub rounds: usize,
    pub rotations: u64,
}

#[derive(Debug, Clone)]
struct PendingUrl {
    url: String,
    item_id: ItemId,
    retries: u32,
}

pub struct BatchScheduler {
    slot: SessionSlot,
    fetcher: Arc<dyn ItemFetcher>,
    config: BatchConfig,
}

impl BatchScheduler {
    pub fn new(slot: SessionSlot, fetcher: Arc<dyn ItemFetcher>, config: BatchConfig) -> Self {
        Self {
            slot,
            fetcher,
            config,
        }
    }

    /// Processes `urls` to completion, streaming one terminal report per URL
    /// into `results`.
    pub async fn run(
        mut self,
        urls: Vec<String>,
        results: &UnboundedSender<ItemReport>,
    ) -> Result<WorkerSummary, SchedulerError> {
        let worker_id = self.slot.worker_id();
        let started = Instant::now();
        let mut summary = WorkerSummary {
            worker_id,
            ..WorkerSummary::default()
        };

        let mut pending = Vec::with_capacity(urls.len());
        for url in urls {
            match ItemId::from_url(&url) {
                Some(item_id) => pending.push(PendingUrl {
                    url,
                    item_id,
                    retries: 0,
                }),
                None => self.report(&mut summary, results, ItemReport::invalid_url(url))?,
            }
        }

        if !pending.is_empty() {
            self.slot.ensure().await.map_err(|source| SchedulerError::Session { worker_id, source })?;
        }

        while !pending.is_empty() {
            summary.rounds += 1;
            let round = summary.rounds;
            let total = pending.len();
            let mut requeued = Vec::new();
            let mut streak = 0u32;
            let mut need_rotate = false;
            let mut processed = 0usize;
            let mut round_ok = 0usize;

            for batch in pending.chunks(self.config.batch_size) {
                if need_rotate {
                    self.slot
                        .rotate(RotationReason::BlockStreak)
                        .await
                        .map_err(|source| SchedulerError::Session { worker_id, source })?;
                    need_rotate = false;
                    streak = 0;
                }

                let session = self
                    .slot
                    .ensure()
                    .await
                    .map_err(|source| SchedulerError::Session { worker_id, source })?;
                let fetcher = self.fetcher.as_ref();
                let events = self.slot.events();

                // Collected in completion order, which drives the streak counter.
                let finished: Vec<(PendingUrl, FetchOutcome)> = stream::iter(batch.iter().cloned())
                    .map(|entry| {
                        let session = &session;
                        async move {
                            let outcome = observed_attempt(
                                fetcher,
                                session,
                                &entry.item_id,
                                &entry.url,
                                worker_id,
                                events,
                            )
                            .await;
                            (entry, outcome)
                        }
                    })
                    .buffer_unordered(self.config.concurrency)
                    .collect()
                    .await;

                for (mut entry, outcome) in finished {
                    summary.attempts += 1;
                    match outcome {
                        FetchOutcome::Success(record) => {
                            streak = 0;
                            round_ok += 1;
                            self.report(&mut summary, results, ItemReport::success(record))?;
                        }
                        FetchOutcome::Blocked => {
                            streak += 1;
                            if streak >= self.config.block_streak {
                                need_rotate = true;
                            }
                            if entry.retries < self.config.max_retries {
                                entry.retries += 1;
                                requeued.push(entry);
                            } else {
                                let report = ItemReport::failure(
                                    entry.url,
                                    Some(entry.item_id),
                                    ItemError::MaxRetries,
                                );
                                self.report(&mut summary, results, report)?;
                            }
                        }
                        FetchOutcome::NotFound => {
                            let report =
                                ItemReport::failure(entry.url, Some(entry.item_id), ItemError::NotFound);
                            self.report(&mut summary, results, report)?;
                        }
                        FetchOutcome::TransientError(message) => {
                            let message: String = message.chars().take(MAX_ERROR_LEN).collect();
                            let report = ItemReport::failure(
                                entry.url,
                                Some(entry.item_id),
                                ItemError::Transient(message),
                            );
                            self.report(&mut summary, results, report)?;
                        }
                        FetchOutcome::InvalidInput => {
                            self.report(&mut summary, results, ItemReport::invalid_url(entry.url))?;
                        }
                    }
                }

                processed += batch.len();
                self.slot.events().dispatch(HarvestEvent::BatchProgress(ProgressEvent {
                    worker_id,
                    round,
                    processed,
                    total,
                    successes: round_ok,
                    timestamp: Utc::now(),
                }));
            }

            self.slot.events().dispatch(HarvestEvent::RoundCompleted(RoundEvent {
                worker_id,
                round,
                requeued: requeued.len(),
                timestamp: Utc::now(),
            }));

            if !requeued.is_empty() {
                self.slot
                    .rotate(RotationReason::RoundRequeue)
                    .await
                    .map_err(|source| SchedulerError::Session { worker_id, source })?;
            }
            pending = requeued;
        }

        summary.rotations = self.slot.rotations();
        let elapsed = started.elapsed().as_secs_f64();
        log::info!(
            "[W{}] done in {:.1}s ({:.2} ok/s)",
            worker_id,
            elapsed,
            if elapsed > 0.0 { summary.successes as f64 / elapsed } else { 0.0 }
        );
        self.slot.events().dispatch(HarvestEvent::WorkerFinished(WorkerDoneEvent {
            worker_id,
            reported: summary.reported,
            successes: summary.successes,
            rotations: summary.rotations,
            timestamp: Utc::now(),
        }));
        Ok(summary)
    }

    fn report(
        &self,
        summary: &mut WorkerSummary,
        results: &UnboundedSender<ItemReport>,
        report: ItemReport,
    ) -> Result<(), SchedulerError> {
        summary.reported += 1;
        match &report.result {
            Ok(_) => summary.successes += 1,
            Err(ItemError::NotFound) => summary.not_found += 1,
            Err(ItemError::InvalidUrl) => summary.invalid += 1,
            Err(ItemError::MaxRetries) => summary.max_retries += 1,
            Err(ItemError::Transient(_)) => summary.errors += 1,
        }
        results
            .send(report)
            .map_err(|_| SchedulerError::ChannelClosed(self.slot.worker_id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::testing::*;
    use crate::session::ProxyCredentials;
    use tokio::sync::mpsc;

    fn url(id: &str) -> String {
        format!("https://www.goofish.com/item?id={id}")
    }

    fn scheduler(provider: Arc<ScriptedProvider>, fetcher: Arc<ScriptedFetcher>, config: BatchConfig) -> BatchScheduler {
        let slot = SessionSlot::new(0, provider, ProxyCredentials::default());
        BatchScheduler::new(slot, fetcher, config)
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<ItemReport>) -> Vec<ItemReport> {
        let mut reports = Vec::new();
        while let Some(report) = rx.recv().await {
            reports.push(report);
        }
        reports
    }

    #[tokio::test]
    async fn blocked_every_attempt_retries_exactly_max_retries_times() {
        let provider = Arc::new(ScriptedProvider::default());
        let fetcher = Arc::new(ScriptedFetcher::default().script("7", vec![blocked()]));
        let (tx, rx) = mpsc::unbounded_channel();

        let summary = scheduler(provider, fetcher.clone(), BatchConfig::default())
            .run(vec![url("7")], &tx)
            .await
            .unwrap();
        drop(tx);

        let reports = collect(rx).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].result, Err(ItemError::MaxRetries));
        // One initial attempt plus two retries.
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(summary.rounds, 3);
    }

    #[tokio::test]
    async fn ten_consecutive_blocks_rotate_once_before_next_batch() {
        let mut fetcher = ScriptedFetcher::default();
        let mut urls = Vec::new();
        for n in 0..10 {
            let id = format!("1{n}");
            fetcher = fetcher.script(&id, vec![blocked(), success(&id)]);
            urls.push(url(&id));
        }
        for n in 0..5 {
            let id = format!("2{n}");
            fetcher = fetcher.script(&id, vec![success(&id)]);
            urls.push(url(&id));
        }
        let provider = Arc::new(ScriptedProvider::default());
        let config = BatchConfig::default().with_concurrency(10);
        let (tx, rx) = mpsc::unbounded_channel();

        let summary = scheduler(provider.clone(), Arc::new(fetcher), config)
            .run(urls, &tx)
            .await
            .unwrap();
        drop(tx);

        // Initial session, one streak rotation, one inter-round rotation.
        assert_eq!(provider.count(), 3);
        assert_eq!(summary.rotations, 2);
        assert_eq!(summary.successes, 15);
        assert_eq!(collect(rx).await.len(), 15);
    }

    #[tokio::test]
    async fn streak_rotation_serves_the_next_batch_with_a_fresh_session() {
        let mut fetcher = ScriptedFetcher::default();
        let mut urls = Vec::new();
        for n in 100..130 {
            let id = n.to_string();
            fetcher = fetcher.script(&id, vec![blocked(), success(&id)]);
            urls.push(url(&id));
        }
        for n in 200..230 {
            let id = n.to_string();
            fetcher = fetcher.script(&id, vec![success(&id)]);
            urls.push(url(&id));
        }
        let fetcher = Arc::new(fetcher);
        let provider = Arc::new(ScriptedProvider::default());
        let (tx, rx) = mpsc::unbounded_channel();

        let summary = scheduler(provider.clone(), fetcher.clone(), BatchConfig::default())
            .run(urls, &tx)
            .await
            .unwrap();
        drop(tx);

        for n in 100..130 {
            assert_eq!(fetcher.tokens_for(&n.to_string()), vec!["tok-1", "tok-3"]);
        }
        for n in 200..230 {
            assert_eq!(fetcher.tokens_for(&n.to_string()), vec!["tok-2"]);
        }
        assert_eq!(provider.count(), 3);
        assert_eq!(summary.rotations, 2);
        assert_eq!(collect(rx).await.len(), 60);
    }

    #[tokio::test]
    async fn short_block_runs_only_rotate_between_rounds() {
        let mut fetcher = ScriptedFetcher::default();
        let mut urls = Vec::new();
        for n in 0..9 {
            let id = format!("3{n}");
            fetcher = fetcher.script(&id, vec![blocked(), success(&id)]);
            urls.push(url(&id));
        }
        let provider = Arc::new(ScriptedProvider::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        let summary = scheduler(provider, Arc::new(fetcher), BatchConfig::default())
            .run(urls, &tx)
            .await
            .unwrap();

        assert_eq!(summary.rotations, 1);
        assert_eq!(summary.successes, 9);
    }

    #[tokio::test]
    async fn terminal_outcomes_are_reported_once() {
        let fetcher = ScriptedFetcher::default()
            .script("1", vec![success("1")])
            .script("2", vec![not_found()])
            .script("3", vec![serde_json::json!({ "ret": ["FAIL_SYS_SOMETHING::boom"] })]);
        let provider = Arc::new(ScriptedProvider::default());
        let (tx, rx) = mpsc::unbounded_channel();

        let urls = vec![url("1"), url("2"), url("3"), "https://www.goofish.com/item".to_string()];
        let summary = scheduler(provider.clone(), Arc::new(fetcher), BatchConfig::default())
            .run(urls, &tx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(summary.reported, 4);
        assert_eq!(summary.successes, 1);
        assert_eq!(summary.not_found, 1);
        assert_eq!(summary.invalid, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.rounds, 1);
        assert_eq!(provider.count(), 1);

        let reports = collect(rx).await;
        let unknown = reports
            .iter()
            .find(|r| r.url == url("3"))
            .unwrap();
        assert_eq!(unknown.result, Err(ItemError::Transient("unknown".into())));
    }

    #[tokio::test]
    async fn only_malformed_urls_never_acquire_a_session() {
        let provider = Arc::new(ScriptedProvider::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let summary = scheduler(provider.clone(), Arc::new(ScriptedFetcher::default()), BatchConfig::default())
            .run(vec!["nope".into()], &tx)
            .await
            .unwrap();
        assert_eq!(summary.invalid, 1);
        assert_eq!(provider.count(), 0);
    }

    #[tokio::test]
    async fn session_failure_ends_the_worker() {
        let provider = Arc::new(ScriptedProvider::with_empty_tokens(usize::MAX));
        let fetcher = Arc::new(ScriptedFetcher::default().script("1", vec![success("1")]));
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = scheduler(provider, fetcher, BatchConfig::default())
            .run(vec![url("1")], &tx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Session {
                source: SessionError::EmptyToken { .. },
                ..
            }
        ));
    }
}
