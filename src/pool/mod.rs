//! Worker pool for bulk harvests.
//!
//! Each worker is an isolated task with its own session slot, fetcher and
//! proxy sub-identities. Workers only share the result channel and the
//! launch gate wrapped around their session providers.

pub mod aggregator;
pub mod plan;
pub mod store;

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::fetch::ItemFetcher;
use crate::modules::events::EventDispatcher;
use crate::protocol::ItemReport;
use crate::scheduler::{BatchConfig, BatchScheduler, SchedulerError, SessionSlot, WorkerSummary};
use crate::session::{GatedProvider, LaunchGate, ProxyCredentials, SessionProvider};

pub use aggregator::{AggregatorConfig, HarvestSummary, ResultAggregator};
pub use plan::{DEFAULT_HEADROOM, HarvestPlan, plan};
pub use store::{DedupCache, OutputRow, OutputStore, PersistStats, StoreError, read_input_urls};

/// Builds the session provider for a worker id.
pub type ProviderFactory = Arc<dyn Fn(usize) -> Arc<dyn SessionProvider> + Send + Sync>;
/// Builds the item fetcher for a worker id.
pub type FetcherFactory = Arc<dyn Fn(usize) -> Arc<dyn ItemFetcher> + Send + Sync>;

/// Splits `urls` into `workers` contiguous slices whose sizes differ by at
/// most one. Every URL lands in exactly one slice.
pub fn partition(urls: Vec<String>, workers: usize) -> Vec<Vec<String>> {
    let workers = workers.max(1);
    let base = urls.len() / workers;
    let extra = urls.len() % workers;

    let mut rest = urls.into_iter();
    (0..workers)
        .map(|index| {
            let size = base + usize::from(index < extra);
            rest.by_ref().take(size).collect()
        })
        .collect()
}

/// Handle to a spawned worker.
pub struct WorkerHandle {
    pub worker_id: usize,
    pub task: JoinHandle<Result<WorkerSummary, SchedulerError>>,
}

pub struct WorkerPool {
    workers: usize,
    provider_factory: ProviderFactory,
    fetcher_factory: FetcherFactory,
    credentials: ProxyCredentials,
    gate: LaunchGate,
    batch: BatchConfig,
    session_attempts: usize,
    events: EventDispatcher,
}

impl WorkerPool {
    pub fn new(workers: usize, provider_factory: ProviderFactory, fetcher_factory: FetcherFactory) -> Self {
        Self {
            workers: workers.max(1),
            provider_factory,
            fetcher_factory,
            credentials: ProxyCredentials::default(),
            gate: LaunchGate::default(),
            batch: BatchConfig::default(),
            session_attempts: 3,
            events: EventDispatcher::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: ProxyCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_gate(mut self, gate: LaunchGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_session_attempts(mut self, attempts: usize) -> Self {
        self.session_attempts = attempts;
        self
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Partitions `urls` and starts one worker per partition, returning the
    /// shared result receiver and the worker handles.
    pub fn spawn(&self, urls: Vec<String>) -> (UnboundedReceiver<ItemReport>, Vec<WorkerHandle>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handles = partition(urls, self.workers)
            .into_iter()
            .enumerate()
            .map(|(worker_id, chunk)| self.spawn_worker(worker_id, chunk, tx.clone()))
            .collect();
        (rx, handles)
    }

    fn spawn_worker(&self, worker_id: usize, urls: Vec<String>, results: UnboundedSender<ItemReport>) -> WorkerHandle {
        let provider: Arc<dyn SessionProvider> =
            Arc::new(GatedProvider::new((self.provider_factory)(worker_id), self.gate.clone()));
        let slot = SessionSlot::new(worker_id, provider, self.credentials.clone())
            .with_session_attempts(self.session_attempts)
            .with_events(self.events.clone());
        let scheduler = BatchScheduler::new(slot, (self.fetcher_factory)(worker_id), self.batch);

        log::info!("[W{}] starting with {} url(s)", worker_id, urls.len());
        let task = tokio::spawn(async move { scheduler.run(urls, &results).await });
        WorkerHandle { worker_id, task }
    }
}
