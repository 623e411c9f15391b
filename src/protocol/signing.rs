//! Request authentication code required by the mtop gateway.

use md5::{Digest, Md5};

/// Application key of the web client.
pub const APP_KEY: &str = "34839810";

/// Computes `md5(token & timestamp & appKey & payload)` as lowercase hex.
///
/// Field order and separator must match the gateway exactly; a wrong
/// signature surfaces as a blocked or error reply, never as a local error.
pub fn sign(token: &str, timestamp_ms: u64, payload: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(format!("{token}&{timestamp_ms}&{APP_KEY}&{payload}").as_bytes());
    hex::encode(hasher.finalize())
}
