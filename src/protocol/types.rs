//! Core data structures shared by the session, fetch, and scheduling layers.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Value, json};

/// Cookie carrying the anti-bot token as `<token>_<expiry>`.
pub const TOKEN_COOKIE: &str = "_m_h5_tk";

static ITEM_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[?&]id=(\d+)").expect("item id regex is valid"));

/// Numeric marketplace item identifier taken from a listing URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(String);

impl ItemId {
    /// Extracts the `id=<digits>` query value from `url`.
    pub fn from_url(url: &str) -> Option<Self> {
        ITEM_ID_RE
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| Self(m.as_str().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Anti-bot session: the harvested cookie jar plus the token derived from it.
///
/// A session is owned by exactly one worker and replaced wholesale on
/// rotation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub cookies: BTreeMap<String, String>,
    pub token: String,
    pub proxy_endpoint: Option<String>,
    pub session_id: String,
}

impl Session {
    /// Builds a session from a cookie jar, deriving the token from
    /// [`TOKEN_COOKIE`]. The token is empty when the cookie is missing or
    /// malformed.
    pub fn from_cookies(
        cookies: BTreeMap<String, String>,
        proxy_endpoint: Option<String>,
        session_id: impl Into<String>,
    ) -> Self {
        let token = token_from_cookies(&cookies);
        Self {
            cookies,
            token,
            proxy_endpoint,
            session_id: session_id.into(),
        }
    }

    /// Signed requests may only be issued with a non-empty token.
    pub fn is_usable(&self) -> bool {
        !self.token.is_empty()
    }

    /// `Cookie` header value rebuilt from the jar.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Short token prefix suitable for logs.
    pub fn token_preview(&self) -> &str {
        let end = self
            .token
            .char_indices()
            .nth(16)
            .map(|(idx, _)| idx)
            .unwrap_or(self.token.len());
        &self.token[..end]
    }
}

fn token_from_cookies(cookies: &BTreeMap<String, String>) -> String {
    match cookies.get(TOKEN_COOKIE) {
        Some(value) if value.contains('_') => value
            .split('_')
            .next()
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

/// Decoded reply of the detail API.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Value,
}

impl RawResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// Entries of the `ret` status list; empty when absent or malformed.
    pub fn ret(&self) -> Vec<&str> {
        self.body
            .get("ret")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Structured product data extracted from a successful reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRecord {
    #[serde(rename = "ITEM_ID")]
    pub item_id: String,
    #[serde(rename = "CATEGORY_ID")]
    pub category_id: String,
    #[serde(rename = "TITLE")]
    pub title: String,
    #[serde(rename = "IMAGES")]
    pub images: Vec<String>,
    #[serde(rename = "SOLD_PRICE")]
    pub sold_price: String,
    #[serde(rename = "BROWSE_COUNT")]
    pub browse_count: u64,
    #[serde(rename = "WANT_COUNT")]
    pub want_count: u64,
    #[serde(rename = "COLLECT_COUNT")]
    pub collect_count: u64,
    #[serde(rename = "QUANTITY")]
    pub quantity: u64,
    #[serde(rename = "GMT_CREATE")]
    pub created_at: Option<String>,
    #[serde(rename = "SELLER_ID")]
    pub seller_id: String,
    #[serde(rename = "url")]
    pub source_url: String,
}

/// Result of one fetch attempt for one URL.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(ItemRecord),
    NotFound,
    Blocked,
    TransientError(String),
    InvalidInput,
}

impl FetchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Success(_) => "success",
            FetchOutcome::NotFound => "not_found",
            FetchOutcome::Blocked => "blocked",
            FetchOutcome::TransientError(_) => "error",
            FetchOutcome::InvalidInput => "invalid_url",
        }
    }
}

/// Terminal failure kinds reported for a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    InvalidUrl,
    NotFound,
    MaxRetries,
    Transient(String),
}

impl ItemError {
    pub fn kind(&self) -> &str {
        match self {
            ItemError::InvalidUrl => "invalid_url",
            ItemError::NotFound => "not_found",
            ItemError::MaxRetries => "max_retries",
            ItemError::Transient(message) => message,
        }
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Final per-URL report streamed to the aggregator or returned on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    pub url: String,
    pub item_id: Option<ItemId>,
    pub result: Result<ItemRecord, ItemError>,
}

impl ItemReport {
    pub fn success(record: ItemRecord) -> Self {
        Self {
            url: record.source_url.clone(),
            item_id: Some(ItemId(record.item_id.clone())),
            result: Ok(record),
        }
    }

    pub fn failure(url: impl Into<String>, item_id: Option<ItemId>, error: ItemError) -> Self {
        Self {
            url: url.into(),
            item_id,
            result: Err(error),
        }
    }

    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::failure(url, None, ItemError::InvalidUrl)
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn record(&self) -> Option<&ItemRecord> {
        self.result.as_ref().ok()
    }

    /// Wire shape of the on-demand endpoint: the record itself, or
    /// `{ITEM_ID?, error, url}`.
    pub fn to_json(&self) -> Value {
        match &self.result {
            Ok(record) => serde_json::to_value(record).unwrap_or(Value::Null),
            Err(error) => {
                let mut value = json!({ "error": error.kind(), "url": self.url });
                if let Some(id) = &self.item_id {
                    value["ITEM_ID"] = Value::String(id.to_string());
                }
                value
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_item_id_from_query() {
        let id = ItemId::from_url("https://www.goofish.com/item?spm=a21ybx&id=995598771021&x=1")
            .unwrap();
        assert_eq!(id.as_str(), "995598771021");
        assert_eq!(
            ItemId::from_url("https://www.goofish.com/item?id=42").unwrap().as_str(),
            "42"
        );
    }

    #[test]
    fn rejects_urls_without_numeric_id() {
        assert!(ItemId::from_url("https://www.goofish.com/item?id=abc").is_none());
        assert!(ItemId::from_url("https://www.goofish.com/item?itemid=12").is_none());
        assert!(ItemId::from_url("not a url").is_none());
    }

    #[test]
    fn token_is_first_segment_of_token_cookie() {
        let cookies = BTreeMap::from([
            (TOKEN_COOKIE.to_string(), "deadbeef_1700000000000".to_string()),
            ("cna".to_string(), "xyz".to_string()),
        ]);
        let session = Session::from_cookies(cookies, None, "123456");
        assert_eq!(session.token, "deadbeef");
        assert!(session.is_usable());
        assert_eq!(session.cookie_header(), "_m_h5_tk=deadbeef_1700000000000; cna=xyz");
    }

    #[test]
    fn token_is_empty_without_delimiter() {
        let cookies = BTreeMap::from([(TOKEN_COOKIE.to_string(), "deadbeef".to_string())]);
        let session = Session::from_cookies(cookies, None, "1");
        assert!(!session.is_usable());

        let session = Session::from_cookies(BTreeMap::new(), None, "1");
        assert!(!session.is_usable());
    }

    #[test]
    fn failure_report_json_shape() {
        let report = ItemReport::failure(
            "https://www.goofish.com/item?id=7",
            Some(ItemId("7".into())),
            ItemError::NotFound,
        );
        let value = report.to_json();
        assert_eq!(value["error"], "not_found");
        assert_eq!(value["ITEM_ID"], "7");

        let invalid = ItemReport::invalid_url("bad").to_json();
        assert_eq!(invalid["error"], "invalid_url");
        assert!(invalid.get("ITEM_ID").is_none());
    }
}
