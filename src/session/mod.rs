//! Anti-bot session acquisition.
//!
//! Acquiring a session means driving a real browser through a proxy identity
//! until the anti-bot scripts have issued their cookies. It is the most
//! expensive operation in the system, so every provider used by the worker
//! pool is wrapped in a [`GatedProvider`] sharing one [`LaunchGate`].

#[cfg(feature = "browser")]
pub mod browser;
pub mod proxy;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{Instant, sleep_until};

use crate::protocol::Session;

#[cfg(feature = "browser")]
pub use browser::{BrowserSessionConfig, BrowserSessionProvider};
pub use proxy::{ProxyCredentials, ProxyIdentity};

/// Single-operation contract over session acquisition.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Returns a session for `identity`. The token may be empty when the
    /// anti-bot cookie was not issued; callers must not use such a session.
    async fn acquire(&self, identity: &ProxyIdentity) -> Result<Session, SessionError>;
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("warm-up navigation failed: {0}")]
    Navigation(String),
    #[error("cookie harvest failed: {0}")]
    Cookies(String),
    #[error("no anti-bot token after {attempts} acquisition attempt(s)")]
    EmptyToken { attempts: usize },
    #[error("launch gate closed")]
    GateClosed,
}

#[derive(Debug)]
struct GateState {
    permits: Semaphore,
    spacing: Duration,
    next_launch: Mutex<Option<Instant>>,
}

/// Limits concurrent browser launches across workers and spaces them out.
#[derive(Debug, Clone)]
pub struct LaunchGate {
    state: Arc<GateState>,
}

impl LaunchGate {
    pub fn new(concurrent: usize, spacing: Duration) -> Self {
        Self {
            state: Arc::new(GateState {
                permits: Semaphore::new(concurrent.max(1)),
                spacing,
                next_launch: Mutex::new(None),
            }),
        }
    }

    /// Gate that never waits.
    pub fn unlimited() -> Self {
        Self::new(Semaphore::MAX_PERMITS, Duration::ZERO)
    }

    /// Runs `launch` once a permit is free and the spacing has elapsed.
    pub async fn run<F, T>(&self, launch: F) -> Result<T, SessionError>
    where
        F: std::future::Future<Output = Result<T, SessionError>>,
    {
        let _permit = self
            .state
            .permits
            .acquire()
            .await
            .map_err(|_| SessionError::GateClosed)?;

        let start_at = {
            let mut next = self.state.next_launch.lock().await;
            let now = Instant::now();
            let start_at = next.filter(|at| *at > now).unwrap_or(now);
            *next = Some(start_at + self.state.spacing);
            start_at
        };
        sleep_until(start_at).await;

        launch.await
    }
}

impl Default for LaunchGate {
    fn default() -> Self {
        Self::new(1, Duration::from_secs(2))
    }
}

/// Provider wrapper that routes every acquisition through a [`LaunchGate`].
pub struct GatedProvider {
    inner: Arc<dyn SessionProvider>,
    gate: LaunchGate,
}

impl GatedProvider {
    pub fn new(inner: Arc<dyn SessionProvider>, gate: LaunchGate) -> Self {
        Self { inner, gate }
    }
}

#[async_trait]
impl SessionProvider for GatedProvider {
    async fn acquire(&self, identity: &ProxyIdentity) -> Result<Session, SessionError> {
        self.gate.run(self.inner.acquire(identity)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SessionProvider for CountingProvider {
        async fn acquire(&self, identity: &ProxyIdentity) -> Result<Session, SessionError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Session {
                token: "t".into(),
                session_id: identity.session_id.clone(),
                ..Session::default()
            })
        }
    }

    #[tokio::test]
    async fn gate_serialises_launches() {
        let inner = Arc::new(CountingProvider {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let gated = Arc::new(GatedProvider::new(
            inner.clone(),
            LaunchGate::new(1, Duration::ZERO),
        ));

        let mut tasks = Vec::new();
        for n in 0..4 {
            let gated = gated.clone();
            tasks.push(tokio::spawn(async move {
                gated.acquire(&ProxyIdentity::direct(n.to_string())).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(inner.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gate_spaces_consecutive_launches() {
        let gate = LaunchGate::new(4, Duration::from_millis(30));
        let started = Instant::now();
        for _ in 0..3 {
            gate.run(async { Ok::<_, SessionError>(()) }).await.unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
