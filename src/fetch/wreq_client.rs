//! wreq-based implementation of the [`ItemFetcher`] trait.
//!
//! wreq emulates the browser handshake (TLS ClientHello, ALPN, HTTP/2
//! settings) named by the profile. Clients are pooled per proxy endpoint so
//! every session keeps talking through its own proxy exit while connections
//! are reused inside a batch.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use wreq::Client;
use wreq_util::Emulation;

use super::profile::{CHROME_124, ImpersonationProfile};
use super::{FetchError, ItemFetcher};
use crate::protocol::{ItemId, RawResponse, Session, build_signed_request, now_millis};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_POOLED_CLIENTS: usize = 8;

/// Emulating client pool keyed by proxy endpoint.
struct ClientPool {
    timeout: Duration,
    emulation: Emulation,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl ClientPool {
    fn new(timeout: Duration, emulation: Emulation) -> Self {
        Self {
            timeout,
            emulation,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, proxy: Option<&str>) -> Result<Client, FetchError> {
        let mut guard = self.clients.lock().await;
        let key = proxy.map(|p| p.to_string());
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }

        // Rotated sessions never come back, so stale clients are dropped.
        if guard.len() >= MAX_POOLED_CLIENTS {
            guard.clear();
        }

        let mut builder = Client::builder()
            .emulation(self.emulation.clone())
            .timeout(self.timeout);

        if let Some(endpoint) = proxy {
            let proxy = wreq::Proxy::all(endpoint)
                .map_err(|err| FetchError::Transport(err.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        guard.insert(key, client.clone());
        Ok(client)
    }
}

/// Issues signed detail calls that look like Chrome 124 on the wire.
pub struct WreqItemFetcher {
    pool: ClientPool,
    profile: ImpersonationProfile,
    timeout: Duration,
}

impl WreqItemFetcher {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            pool: ClientPool::new(timeout, CHROME_124.emulation.clone()),
            profile: CHROME_124.clone(),
            timeout,
        }
    }

    /// Switches header set and handshake together; pooled clients are rebuilt.
    pub fn with_profile(mut self, profile: ImpersonationProfile) -> Self {
        self.pool = ClientPool::new(self.timeout, profile.emulation.clone());
        self.profile = profile;
        self
    }

    fn map_transport(&self, err: wreq::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

impl Default for WreqItemFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ItemFetcher for WreqItemFetcher {
    async fn fetch(&self, session: &Session, item_id: &ItemId) -> Result<RawResponse, FetchError> {
        if !session.is_usable() {
            return Err(FetchError::EmptyToken);
        }

        let request = build_signed_request(&session.token, item_id, now_millis())?;
        let headers = self.profile.header_map(&session.cookie_header())?;
        let client = self.pool.client(session.proxy_endpoint.as_deref()).await?;

        log::debug!(
            "-> POST detail item={} sid={} as {}",
            item_id,
            session.session_id,
            self.profile.name
        );
        let response = client
            .post(request.url.as_str())
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|err| self.map_transport(err))?;

        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| self.map_transport(err))?;
        let body = serde_json::from_slice(&bytes).map_err(|err| FetchError::Decode(err.to_string()))?;
        log::debug!("<- {} detail item={}", status, item_id);

        Ok(RawResponse::new(status, body))
    }
}
