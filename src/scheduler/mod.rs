//! Per-worker scheduling: the session slot plus the bulk and on-demand
//! drivers built on top of it.

pub mod batch;
pub mod retry;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::fetch::ItemFetcher;
use crate::modules::events::{
    AttemptEvent, EventDispatcher, HarvestEvent, RotationEvent, RotationReason, SessionEvent,
};
use crate::protocol::{Classification, FetchOutcome, ItemId, Session, classify, parse_item};
use crate::session::{ProxyCredentials, SessionError, SessionProvider};

pub use batch::{BatchConfig, BatchScheduler, SchedulerError, WorkerSummary};
pub use retry::RetryOrchestrator;

const DEFAULT_SESSION_ATTEMPTS: usize = 3;

/// The current session of one worker.
///
/// Every acquisition draws a fresh proxy sub-identity. Sessions that come
/// back without a token are discarded and reacquired, so [`SessionSlot::ensure`]
/// only ever hands out usable sessions.
pub struct SessionSlot {
    worker_id: usize,
    provider: Arc<dyn SessionProvider>,
    credentials: ProxyCredentials,
    session: Option<Session>,
    session_attempts: usize,
    rotations: u64,
    events: EventDispatcher,
}

impl SessionSlot {
    pub fn new(worker_id: usize, provider: Arc<dyn SessionProvider>, credentials: ProxyCredentials) -> Self {
        Self {
            worker_id,
            provider,
            credentials,
            session: None,
            session_attempts: DEFAULT_SESSION_ATTEMPTS,
            rotations: 0,
            events: EventDispatcher::new(),
        }
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn with_session_attempts(mut self, attempts: usize) -> Self {
        self.session_attempts = attempts.max(1);
        self
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn current(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Returns the current session, acquiring one first if the slot is empty.
    pub async fn ensure(&mut self) -> Result<Session, SessionError> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }
        self.acquire().await
    }

    /// Discards the current session and acquires a new one.
    pub async fn rotate(&mut self, reason: RotationReason) -> Result<Session, SessionError> {
        self.session = None;
        self.rotations += 1;
        self.events.dispatch(HarvestEvent::Rotation(RotationEvent {
            worker_id: self.worker_id,
            reason,
            rotations: self.rotations,
            timestamp: Utc::now(),
        }));
        self.acquire().await
    }

    async fn acquire(&mut self) -> Result<Session, SessionError> {
        for _ in 0..self.session_attempts {
            let identity = self.credentials.sub_identity();
            let session = self.provider.acquire(&identity).await?;
            self.events.dispatch(HarvestEvent::SessionAcquired(SessionEvent {
                worker_id: self.worker_id,
                session_id: session.session_id.clone(),
                usable: session.is_usable(),
                timestamp: Utc::now(),
            }));
            if session.is_usable() {
                self.session = Some(session.clone());
                return Ok(session);
            }
        }
        Err(SessionError::EmptyToken {
            attempts: self.session_attempts,
        })
    }
}

/// One fetch attempt for `url`: id extraction, signed call, classification
/// and parsing. Malformed URLs never reach the network.
pub async fn attempt(fetcher: &dyn ItemFetcher, session: &Session, url: &str) -> FetchOutcome {
    match ItemId::from_url(url) {
        Some(item_id) => attempt_item(fetcher, session, &item_id, url).await,
        None => FetchOutcome::InvalidInput,
    }
}

pub async fn attempt_item(
    fetcher: &dyn ItemFetcher,
    session: &Session,
    item_id: &ItemId,
    url: &str,
) -> FetchOutcome {
    let response = match fetcher.fetch(session, item_id).await {
        Ok(response) => response,
        Err(err) => return FetchOutcome::TransientError(err.to_string()),
    };

    match classify(&response) {
        Classification::Success => match parse_item(&response, url) {
            Ok(record) => FetchOutcome::Success(record),
            Err(err) => FetchOutcome::TransientError(err.to_string()),
        },
        Classification::Blocked => FetchOutcome::Blocked,
        Classification::NotFound => FetchOutcome::NotFound,
        Classification::Error => FetchOutcome::TransientError("unknown".to_string()),
    }
}

/// [`attempt_item`] with latency measurement and an attempt event.
pub(crate) async fn observed_attempt(
    fetcher: &dyn ItemFetcher,
    session: &Session,
    item_id: &ItemId,
    url: &str,
    worker_id: usize,
    events: &EventDispatcher,
) -> FetchOutcome {
    let started = Instant::now();
    let outcome = attempt_item(fetcher, session, item_id, url).await;
    record_attempt(events, worker_id, url, &outcome, started.elapsed());
    outcome
}

fn record_attempt(events: &EventDispatcher, worker_id: usize, url: &str, outcome: &FetchOutcome, latency: Duration) {
    events.dispatch(HarvestEvent::Attempt(AttemptEvent {
        worker_id,
        url: url.to_string(),
        outcome: outcome.clone(),
        latency,
        timestamp: Utc::now(),
    }));
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn malformed_url_skips_the_network() {
        let fetcher = ScriptedFetcher::default();
        let session = Session {
            token: "t".into(),
            ..Session::default()
        };
        let outcome = attempt(&fetcher, &session, "https://www.goofish.com/item?x=1").await;
        assert_eq!(outcome, FetchOutcome::InvalidInput);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn attempt_maps_classifications() {
        let fetcher = ScriptedFetcher::default()
            .script("1", vec![success("1")])
            .script("2", vec![blocked()])
            .script("3", vec![not_found()])
            .script("4", vec![serde_json::json!({ "ret": ["FAIL_SYS_UNKNOWN::x"] })]);
        let session = Session {
            token: "t".into(),
            ..Session::default()
        };

        let url = |id: &str| format!("https://www.goofish.com/item?id={id}");
        match attempt(&fetcher, &session, &url("1")).await {
            FetchOutcome::Success(record) => {
                assert_eq!(record.item_id, "1");
                assert_eq!(record.source_url, url("1"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(attempt(&fetcher, &session, &url("2")).await, FetchOutcome::Blocked);
        assert_eq!(attempt(&fetcher, &session, &url("3")).await, FetchOutcome::NotFound);
        assert_eq!(
            attempt(&fetcher, &session, &url("4")).await,
            FetchOutcome::TransientError("unknown".into())
        );
    }

    #[tokio::test]
    async fn slot_reacquires_empty_token_sessions() {
        let provider = Arc::new(ScriptedProvider::with_empty_tokens(2));
        let mut slot = SessionSlot::new(0, provider.clone(), ProxyCredentials::default());
        let session = slot.ensure().await.unwrap();
        assert_eq!(session.token, "tok-3");
        assert_eq!(provider.count(), 3);

        // Already holding a session: no new acquisition.
        slot.ensure().await.unwrap();
        assert_eq!(provider.count(), 3);
    }

    #[tokio::test]
    async fn slot_gives_up_after_configured_attempts() {
        let provider = Arc::new(ScriptedProvider::with_empty_tokens(10));
        let mut slot =
            SessionSlot::new(0, provider, ProxyCredentials::default()).with_session_attempts(2);
        let err = slot.ensure().await.unwrap_err();
        assert!(matches!(err, SessionError::EmptyToken { attempts: 2 }));
        assert!(slot.current().is_none());
    }

    #[tokio::test]
    async fn rotation_replaces_the_session() {
        let provider = Arc::new(ScriptedProvider::default());
        let mut slot = SessionSlot::new(1, provider, ProxyCredentials::default());
        let first = slot.ensure().await.unwrap();
        let second = slot.rotate(RotationReason::BlockStreak).await.unwrap();
        assert_ne!(first.token, second.token);
        assert_eq!(slot.rotations(), 1);
    }
}
