//! Harvest configuration.
//!
//! Values come from defaults, then the environment (a `.env` file is loaded
//! first when present), then explicit builder calls.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::pool::DEFAULT_HEADROOM;
use crate::session::ProxyCredentials;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: expected {expected}, got '{value}'")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HarvestConfig {
    pub proxy: ProxyCredentials,
    pub input_csv: PathBuf,
    pub output_csv: PathBuf,
    pub target: usize,
    pub headroom: usize,
    pub workers: usize,
    pub concurrency: usize,
    pub max_retries: u32,
    pub block_streak: u32,
    pub session_attempts: usize,
    pub launch_concurrency: usize,
    pub launch_spacing: Duration,
    pub headless: bool,
    pub request_timeout: Duration,
    pub save_every: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            proxy: ProxyCredentials::default(),
            input_csv: PathBuf::from("goofish_urls.csv"),
            output_csv: PathBuf::from("goofish_results.csv"),
            target: 50_000,
            headroom: DEFAULT_HEADROOM,
            workers: 3,
            concurrency: 30,
            max_retries: 2,
            block_streak: 10,
            session_attempts: 3,
            launch_concurrency: 1,
            launch_spacing: Duration::from_secs(2),
            headless: true,
            request_timeout: Duration::from_secs(30),
            save_every: 50,
        }
    }
}

impl HarvestConfig {
    pub fn builder() -> HarvestConfigBuilder {
        HarvestConfigBuilder::new()
    }

    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads every known key through `lookup`; missing keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(user) = get("PROXY_USER") {
            config.proxy.user = user;
        }
        if let Some(pass) = get("PROXY_PASS") {
            config.proxy.pass = pass;
        }
        if let Some(host) = get("PROXY_HOST") {
            config.proxy.host = host;
        }
        if let Some(path) = get("INPUT_CSV") {
            config.input_csv = PathBuf::from(path);
        }
        if let Some(path) = get("OUTPUT_CSV") {
            config.output_csv = PathBuf::from(path);
        }
        if let Some(value) = get("TARGET") {
            config.target = parse_number("TARGET", &value)?;
        }
        if let Some(value) = get("NUM_WORKERS") {
            config.workers = parse_number("NUM_WORKERS", &value)?;
        }
        if let Some(value) = get("CONCURRENT_PER_WORKER") {
            config.concurrency = parse_number("CONCURRENT_PER_WORKER", &value)?;
        }
        if let Some(value) = get("MAX_RETRIES") {
            config.max_retries = parse_number("MAX_RETRIES", &value)?;
        }
        if let Some(value) = get("BLOCK_STREAK") {
            config.block_streak = parse_number("BLOCK_STREAK", &value)?;
        }
        if let Some(value) = get("HEADLESS") {
            config.headless = parse_bool("HEADLESS", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Zero("NUM_WORKERS"));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Zero("CONCURRENT_PER_WORKER"));
        }
        if self.block_streak == 0 {
            return Err(ConfigError::Zero("BLOCK_STREAK"));
        }
        if self.save_every == 0 {
            return Err(ConfigError::Zero("save_every"));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
        expected: "a non-negative integer",
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            expected: "a boolean",
        }),
    }
}

/// Fluent builder for [`HarvestConfig`].
#[derive(Debug, Clone, Default)]
pub struct HarvestConfigBuilder {
    config: HarvestConfig,
}

impl HarvestConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing configuration, e.g. one read from the environment.
    pub fn from_config(config: HarvestConfig) -> Self {
        Self { config }
    }

    pub fn with_proxy(mut self, proxy: ProxyCredentials) -> Self {
        self.config.proxy = proxy;
        self
    }

    pub fn with_input_csv(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.input_csv = path.into();
        self
    }

    pub fn with_output_csv(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_csv = path.into();
        self
    }

    pub fn with_target(mut self, target: usize) -> Self {
        self.config.target = target;
        self
    }

    pub fn with_headroom(mut self, headroom: usize) -> Self {
        self.config.headroom = headroom;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn with_block_streak(mut self, streak: u32) -> Self {
        self.config.block_streak = streak;
        self
    }

    pub fn with_session_attempts(mut self, attempts: usize) -> Self {
        self.config.session_attempts = attempts;
        self
    }

    pub fn with_launch_limits(mut self, concurrent: usize, spacing: Duration) -> Self {
        self.config.launch_concurrency = concurrent;
        self.config.launch_spacing = spacing;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.config.headless = headless;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn with_save_every(mut self, every: usize) -> Self {
        self.config.save_every = every;
        self
    }

    pub fn build(self) -> Result<HarvestConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
