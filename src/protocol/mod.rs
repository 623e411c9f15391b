//! Upstream protocol: signing, wire layout, reply classification and parsing.

pub mod classify;
pub mod parse;
pub mod request;
pub mod signing;
pub mod types;

pub use classify::{Classification, classify, classify_ret};
pub use parse::{ParseError, parse_item};
pub use request::{SignedRequest, build_signed_request, item_payload, now_millis};
pub use signing::{APP_KEY, sign};
pub use types::{
    FetchOutcome, ItemError, ItemId, ItemRecord, ItemReport, RawResponse, Session, TOKEN_COOKIE,
};
