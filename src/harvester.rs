//! High level harvest orchestration.
//!
//! Wires the session providers, fetchers, schedulers, worker pool and
//! result aggregator together behind two entry points: [`Harvester::scrape`]
//! for a single URL and [`Harvester::harvest`] for a bulk run.

use std::sync::Arc;

use thiserror::Error;

use crate::config::{ConfigError, HarvestConfig};
use crate::fetch::{ItemFetcher, WreqItemFetcher};
use crate::modules::events::EventDispatcher;
use crate::modules::metrics::MetricsCollector;
use crate::pool::{
	AggregatorConfig, FetcherFactory, HarvestSummary, OutputStore, ProviderFactory,
	ResultAggregator, StoreError, WorkerPool, plan, read_input_urls,
};
use crate::protocol::ItemReport;
use crate::scheduler::{BatchConfig, RetryOrchestrator, SessionSlot};
use crate::session::{GatedProvider, LaunchGate, SessionProvider};

/// Worker id used by the on-demand path in logs and metrics.
pub const ON_DEMAND_WORKER: usize = 0;

/// Result alias used across the orchestration layer.
pub type HarvestResult<T> = Result<T, HarvestError>;

/// High-level error surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum HarvestError {
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("store error: {0}")]
	Store(#[from] StoreError),
	#[error("no session provider configured and browser support is disabled")]
	NoSessionProvider,
}

/// Fluent builder for [`Harvester`].
pub struct HarvesterBuilder {
	config: HarvestConfig,
	provider_factory: Option<ProviderFactory>,
	fetcher_factory: Option<FetcherFactory>,
	metrics: Option<MetricsCollector>,
}

impl HarvesterBuilder {
	pub fn new() -> Self {
		Self {
			config: HarvestConfig::default(),
			provider_factory: None,
			fetcher_factory: None,
			metrics: None,
		}
	}

	pub fn with_config(mut self, config: HarvestConfig) -> Self {
		self.config = config;
		self
	}

	/// Uses the same provider for every worker.
	pub fn with_session_provider(mut self, provider: Arc<dyn SessionProvider>) -> Self {
		self.provider_factory = Some(Arc::new(move |_: usize| provider.clone()));
		self
	}

	pub fn with_provider_factory(mut self, factory: ProviderFactory) -> Self {
		self.provider_factory = Some(factory);
		self
	}

	/// Uses the same fetcher for every worker.
	pub fn with_fetcher(mut self, fetcher: Arc<dyn ItemFetcher>) -> Self {
		self.fetcher_factory = Some(Arc::new(move |_: usize| fetcher.clone()));
		self
	}

	pub fn with_fetcher_factory(mut self, factory: FetcherFactory) -> Self {
		self.fetcher_factory = Some(factory);
		self
	}

	pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
		self.metrics = Some(metrics);
		self
	}

	pub fn build(self) -> HarvestResult<Harvester> {
		self.config.validate()?;
		let provider_factory = match self.provider_factory {
			Some(factory) => factory,
			None => default_provider_factory(&self.config)?,
		};
		let fetcher_factory = match self.fetcher_factory {
			Some(factory) => factory,
			None => default_fetcher_factory(&self.config),
		};
		Ok(Harvester::with_parts(
			self.config,
			provider_factory,
			fetcher_factory,
			self.metrics.unwrap_or_default(),
		))
	}
}

impl Default for HarvesterBuilder {
	fn default() -> Self {
		Self::new()
	}
}

fn default_fetcher_factory(config: &HarvestConfig) -> FetcherFactory {
	let timeout = config.request_timeout;
	Arc::new(move |_: usize| Arc::new(WreqItemFetcher::with_timeout(timeout)) as Arc<dyn ItemFetcher>)
}

#[cfg(feature = "browser")]
fn default_provider_factory(config: &HarvestConfig) -> HarvestResult<ProviderFactory> {
	use crate::session::{BrowserSessionConfig, BrowserSessionProvider};

	let browser = BrowserSessionConfig::default().with_headless(config.headless);
	Ok(Arc::new(move |_: usize| {
		Arc::new(BrowserSessionProvider::new(browser.clone())) as Arc<dyn SessionProvider>
	}))
}

#[cfg(not(feature = "browser"))]
fn default_provider_factory(_config: &HarvestConfig) -> HarvestResult<ProviderFactory> {
	Err(HarvestError::NoSessionProvider)
}

/// Main harvest orchestrator.
pub struct Harvester {
	config: HarvestConfig,
	provider_factory: ProviderFactory,
	fetcher_factory: FetcherFactory,
	gate: LaunchGate,
	metrics: MetricsCollector,
	events: EventDispatcher,
	on_demand: RetryOrchestrator,
}

impl Harvester {
	/// Obtain a builder to customise the harvester instance.
	pub fn builder() -> HarvesterBuilder {
		HarvesterBuilder::new()
	}

	fn with_parts(
		config: HarvestConfig,
		provider_factory: ProviderFactory,
		fetcher_factory: FetcherFactory,
		metrics: MetricsCollector,
	) -> Self {
		let gate = LaunchGate::new(config.launch_concurrency, config.launch_spacing);
		let events = EventDispatcher::with_defaults(metrics.clone());

		let provider: Arc<dyn SessionProvider> = Arc::new(GatedProvider::new(
			provider_factory(ON_DEMAND_WORKER),
			gate.clone(),
		));
		let slot = SessionSlot::new(ON_DEMAND_WORKER, provider, config.proxy.clone())
			.with_session_attempts(config.session_attempts)
			.with_events(events.clone());
		let on_demand = RetryOrchestrator::new(
			fetcher_factory(ON_DEMAND_WORKER),
			slot,
			config.max_retries,
		);

		Self {
			config,
			provider_factory,
			fetcher_factory,
			gate,
			metrics,
			events,
			on_demand,
		}
	}

	pub fn config(&self) -> &HarvestConfig {
		&self.config
	}

	pub fn metrics(&self) -> &MetricsCollector {
		&self.metrics
	}

	/// Scrapes one URL with bounded retries. Failures are part of the report.
	pub async fn scrape(&self, url: &str) -> ItemReport {
		self.on_demand.scrape(url).await
	}

	/// Bulk run over the configured input CSV: loads the dedup cache from
	/// the output CSV, plans the work and runs the worker pool.
	pub async fn harvest(&self) -> HarvestResult<HarvestSummary> {
		let store = OutputStore::new(&self.config.output_csv);
		let cache = store.load_dedup_cache()?;
		let input = read_input_urls(&self.config.input_csv)?;
		let planned = plan(input, &cache, self.config.target, self.config.headroom);
		self.harvest_urls(planned.urls).await
	}

	/// Bulk run over an already planned URL list.
	pub async fn harvest_urls(&self, urls: Vec<String>) -> HarvestResult<HarvestSummary> {
		log::info!(
			"harvesting {} url(s) with {} worker(s) x {} concurrent, target {}",
			urls.len(),
			self.config.workers,
			self.config.concurrency,
			self.config.target
		);

		let batch = BatchConfig::default()
			.with_concurrency(self.config.concurrency)
			.with_block_streak(self.config.block_streak)
			.with_max_retries(self.config.max_retries);

		let pool = WorkerPool::new(
			self.config.workers,
			self.provider_factory.clone(),
			self.fetcher_factory.clone(),
		)
		.with_credentials(self.config.proxy.clone())
		.with_gate(self.gate.clone())
		.with_batch_config(batch)
		.with_session_attempts(self.config.session_attempts)
		.with_events(self.events.clone());

		let (results, workers) = pool.spawn(urls);

		let aggregator = ResultAggregator::new(
			OutputStore::new(&self.config.output_csv),
			AggregatorConfig {
				target: self.config.target,
				save_every: self.config.save_every,
				..AggregatorConfig::default()
			},
		)
		.with_events(self.events.clone());

		let summary = aggregator.run(results, workers).await?;
		let global = self.metrics.snapshot().global;
		log::info!(
			"attempts {} | blocked {:.1}% | rotations {} | sessions {}",
			global.attempts,
			global.block_rate() * 100.0,
			global.rotations,
			global.sessions
		);
		Ok(summary)
	}
}
