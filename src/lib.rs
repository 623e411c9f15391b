//! # goofish-scraper-rs
//!
//! Harvests structured item data from the Goofish (Xianyu) item-detail API,
//! which sits behind a signed-token gateway and fingerprint-based blocking.
//!
//! ## Features
//!
//! - Anti-bot session acquisition through headless Chromium and sticky proxy identities
//! - Bit-exact MD5 request signing for the h5 gateway
//! - Reply classification with streak-driven and between-round session rotation
//! - Multi-worker bulk harvests with dedup and checkpointed CSV output
//! - On-demand single-item scraping over HTTP
//!
//! ## Example
//!
//! ```no_run
//! use goofish_scraper_rs::{HarvestConfig, Harvester};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let harvester = Harvester::builder()
//!         .with_config(HarvestConfig::from_env()?)
//!         .build()?;
//!     let report = harvester
//!         .scrape("https://www.goofish.com/item?id=995598771021")
//!         .await;
//!     println!("{}", report.to_json());
//!     Ok(())
//! }
//! ```

mod harvester;

pub mod config;
pub mod fetch;
pub mod modules;
pub mod pool;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod session;

pub use crate::harvester::{
    HarvestError,
    HarvestResult,
    Harvester,
    HarvesterBuilder,
    ON_DEMAND_WORKER,
};

pub use crate::config::{ConfigError, HarvestConfig, HarvestConfigBuilder};

pub use crate::fetch::{FetchError, ImpersonationProfile, ItemFetcher, WreqItemFetcher};

pub use crate::modules::{
    EventDispatcher,
    EventHandler,
    GlobalStats,
    HarvestEvent,
    LoggingHandler,
    MetricsCollector,
    MetricsHandler,
    MetricsSnapshot,
    RotationReason,
    WorkerStats,
};

pub use crate::pool::{
    AggregatorConfig,
    DedupCache,
    HarvestPlan,
    HarvestSummary,
    OutputStore,
    ResultAggregator,
    StoreError,
    WorkerPool,
    partition,
    plan,
};

pub use crate::protocol::{
    Classification,
    FetchOutcome,
    ItemError,
    ItemId,
    ItemRecord,
    ItemReport,
    RawResponse,
    Session,
    classify,
    sign,
};

pub use crate::scheduler::{
    BatchConfig,
    BatchScheduler,
    RetryOrchestrator,
    SchedulerError,
    SessionSlot,
    WorkerSummary,
};

pub use crate::session::{
    GatedProvider,
    LaunchGate,
    ProxyCredentials,
    ProxyIdentity,
    SessionError,
    SessionProvider,
};

#[cfg(feature = "browser")]
pub use crate::session::{BrowserSessionConfig, BrowserSessionProvider};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
