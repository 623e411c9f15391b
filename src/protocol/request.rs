//! Wire format of the item-detail call.
//!
//! Query parameters, their order and the form body reproduce what the web
//! client sends; the gateway rejects anything else.

use chrono::Utc;
use serde_json::json;
use url::Url;

use super::signing::{APP_KEY, sign};
use super::types::ItemId;

pub const API_URL: &str = "https://h5api.m.goofish.com/h5/mtop.taobao.idle.pc.detail/1.0/";
pub const API_NAME: &str = "mtop.taobao.idle.pc.detail";
pub const API_VERSION: &str = "1.0";
pub const JSV: &str = "2.7.2";
pub const SPM_CNT: &str = "a21ybx.item.0.0";

/// A fully signed request ready to be posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub url: Url,
    pub body: String,
    pub timestamp_ms: u64,
    pub sign: String,
}

/// Compact JSON payload `{"itemId":"<id>"}`.
pub fn item_payload(item_id: &ItemId) -> String {
    json!({ "itemId": item_id.as_str() }).to_string()
}

pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Signs the payload for `item_id` and lays out query and body.
pub fn build_signed_request(
    token: &str,
    item_id: &ItemId,
    timestamp_ms: u64,
) -> Result<SignedRequest, url::ParseError> {
    let payload = item_payload(item_id);
    let sign = sign(token, timestamp_ms, &payload);
    let t = timestamp_ms.to_string();

    let url = Url::parse_with_params(
        API_URL,
        &[
            ("jsv", JSV),
            ("appKey", APP_KEY),
            ("t", t.as_str()),
            ("sign", sign.as_str()),
            ("v", API_VERSION),
            ("type", "originaljson"),
            ("accountSite", "xianyu"),
            ("dataType", "json"),
            ("timeout", "20000"),
            ("api", API_NAME),
            ("sessionOption", "AutoLoginOnly"),
            ("spm_cnt", SPM_CNT),
        ],
    )?;

    Ok(SignedRequest {
        url,
        body: format!("data={}", urlencoding::encode(&payload)),
        timestamp_ms,
        sign,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> ItemId {
        ItemId::from_url("https://www.goofish.com/item?id=995598771021").unwrap()
    }

    #[test]
    fn payload_is_compact_json() {
        assert_eq!(item_payload(&item()), r#"{"itemId":"995598771021"}"#);
    }

    #[test]
    fn query_layout_matches_web_client() {
        let request = build_signed_request("abc123", &item(), 1_700_000_000_000).unwrap();
        assert_eq!(
            request.url.as_str(),
            "https://h5api.m.goofish.com/h5/mtop.taobao.idle.pc.detail/1.0/\
             ?jsv=2.7.2&appKey=34839810&t=1700000000000\
             &sign=5fc359b37f71f2b92ffdd7c86e63164c&v=1.0&type=originaljson\
             &accountSite=xianyu&dataType=json&timeout=20000\
             &api=mtop.taobao.idle.pc.detail&sessionOption=AutoLoginOnly\
             &spm_cnt=a21ybx.item.0.0"
        );
    }

    #[test]
    fn body_is_url_encoded_payload() {
        let request = build_signed_request("abc123", &item(), 1).unwrap();
        assert_eq!(request.body, "data=%7B%22itemId%22%3A%22995598771021%22%7D");
    }
}
