//! Bounded retry of a single URL for the on-demand path.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::{SessionSlot, observed_attempt};
use crate::fetch::ItemFetcher;
use crate::modules::events::RotationReason;
use crate::protocol::{FetchOutcome, ItemError, ItemId, ItemReport};

/// Scrapes one URL at a time against a shared session slot.
///
/// The slot is shared by every caller, so a rotation triggered by one request
/// benefits the next.
#[derive(Clone)]
pub struct RetryOrchestrator {
    fetcher: Arc<dyn ItemFetcher>,
    slot: Arc<Mutex<SessionSlot>>,
    max_retries: u32,
}

impl RetryOrchestrator {
    pub fn new(fetcher: Arc<dyn ItemFetcher>, slot: SessionSlot, max_retries: u32) -> Self {
        Self {
            fetcher,
            slot: Arc::new(Mutex::new(slot)),
            max_retries: max_retries.max(1),
        }
    }

    pub async fn rotations(&self) -> u64 {
        self.slot.lock().await.rotations()
    }

    /// Never fails: every failure is folded into the returned report.
    pub async fn scrape(&self, url: &str) -> ItemReport {
        let Some(item_id) = ItemId::from_url(url) else {
            return ItemReport::invalid_url(url);
        };

        let mut slot = self.slot.lock().await;
        let worker_id = slot.worker_id();

        for attempt in 1..=self.max_retries {
            let last = attempt == self.max_retries;
            let session = match slot.ensure().await {
                Ok(session) => session,
                Err(err) => {
                    log::warn!("on-demand session unavailable: {}", err);
                    return ItemReport::failure(url, Some(item_id), ItemError::Transient(err.to_string()));
                }
            };

            let outcome = observed_attempt(
                self.fetcher.as_ref(),
                &session,
                &item_id,
                url,
                worker_id,
                slot.events(),
            )
            .await;

            match outcome {
                FetchOutcome::Success(record) => return ItemReport::success(record),
                FetchOutcome::NotFound => {
                    return ItemReport::failure(url, Some(item_id), ItemError::NotFound);
                }
                FetchOutcome::InvalidInput => return ItemReport::invalid_url(url),
                FetchOutcome::Blocked => {
                    log::info!("item {} blocked on attempt {}/{}", item_id, attempt, self.max_retries);
                }
                FetchOutcome::TransientError(message) if last => {
                    return ItemReport::failure(url, Some(item_id), ItemError::Transient(message));
                }
                FetchOutcome::TransientError(message) => {
                    log::info!("item {} failed on attempt {}: {}", item_id, attempt, message);
                }
            }

            if let Err(err) = slot.rotate(RotationReason::OnDemandRetry).await {
                log::warn!("on-demand rotation failed: {}", err);
                return ItemReport::failure(url, Some(item_id), ItemError::Transient(err.to_string()));
            }
        }

        ItemReport::failure(url, Some(item_id), ItemError::MaxRetries)
    }
}
