//! Item fetching: one signed detail call for one item with a given session.

pub mod profile;
pub mod wreq_client;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{ItemId, RawResponse, Session};

pub use profile::{CHROME_124, ImpersonationProfile};
pub use wreq_client::WreqItemFetcher;

/// Contract over the transport issuing detail calls.
///
/// Implementations must never send a request for a session whose token is
/// empty.
#[async_trait]
pub trait ItemFetcher: Send + Sync {
    async fn fetch(&self, session: &Session, item_id: &ItemId) -> Result<RawResponse, FetchError>;
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("session has no anti-bot token")]
    EmptyToken,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("http transport error: {0}")]
    Transport(String),
    #[error("reply is not valid json: {0}")]
    Decode(String),
    #[error("failed to convert header '{0}'")]
    InvalidHeader(String),
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}
