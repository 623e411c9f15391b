//! Browser impersonation profile for detail calls.
//!
//! The header set, user agent and TLS fingerprint must all describe the same
//! browser build as the one that harvested the session; the gateway checks
//! them against each other.

use http::header::{COOKIE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use once_cell::sync::Lazy;
use wreq_util::Emulation;

use super::FetchError;

#[derive(Debug, Clone)]
pub struct ImpersonationProfile {
    pub name: &'static str,
    pub user_agent: &'static str,
    /// Handshake the client reproduces: TLS ClientHello, ALPN and HTTP/2 settings.
    pub emulation: Emulation,
    pub headers: &'static [(&'static str, &'static str)],
}

/// Desktop Chrome 124 on Windows, matching the session browser.
pub static CHROME_124: Lazy<ImpersonationProfile> = Lazy::new(|| ImpersonationProfile {
    name: "chrome124",
    user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    emulation: Emulation::Chrome124,
    headers: &[
        ("accept", "application/json"),
        ("accept-encoding", "gzip, deflate, br, zstd"),
        ("accept-language", "es-419,es;q=0.6"),
        ("content-type", "application/x-www-form-urlencoded"),
        ("origin", "https://www.goofish.com"),
        ("priority", "u=1, i"),
        ("referer", "https://www.goofish.com/"),
        (
            "sec-ch-ua",
            r#""Chromium";v="124", "Google Chrome";v="124", "Not-A.Brand";v="99""#,
        ),
        ("sec-ch-ua-mobile", "?0"),
        ("sec-ch-ua-platform", r#""Windows""#),
        ("sec-fetch-dest", "empty"),
        ("sec-fetch-mode", "cors"),
        ("sec-fetch-site", "same-site"),
        ("sec-gpc", "1"),
    ],
});

impl ImpersonationProfile {
    /// Full request header map with the session's cookie header appended.
    pub fn header_map(&self, cookie: &str) -> Result<HeaderMap, FetchError> {
        let mut map = HeaderMap::with_capacity(self.headers.len() + 2);
        for (name, value) in self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| FetchError::InvalidHeader((*name).to_string()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| FetchError::InvalidHeader((*name).to_string()))?;
            map.insert(header_name, header_value);
        }
        map.insert(USER_AGENT, HeaderValue::from_static(self.user_agent));
        if !cookie.is_empty() {
            let value = HeaderValue::from_str(cookie)
                .map_err(|_| FetchError::InvalidHeader("cookie".into()))?;
            map.insert(COOKIE, value);
        }
        Ok(map)
    }
}
