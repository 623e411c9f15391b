//! Extraction of [`ItemRecord`]s from successful detail replies.

use chrono::{DateTime, SecondsFormat};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::protocol::types::{ItemRecord, RawResponse};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("reply carries no data object")]
    MissingData,
    #[error("reply carries no item id")]
    MissingItemId,
    #[error("malformed detail payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DetailData {
    #[serde(rename = "itemDO")]
    item: ItemDo,
    #[serde(rename = "sellerDO")]
    seller: SellerDo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ItemDo {
    item_id: Value,
    category_id: Value,
    title: Option<String>,
    image_infos: Vec<ImageInfo>,
    sold_price: Value,
    browse_cnt: Value,
    want_cnt: Value,
    collect_cnt: Value,
    quantity: Value,
    gmt_create: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImageInfo {
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SellerDo {
    seller_id: Value,
}

/// Builds the record for `source_url` from a reply already classified as
/// success.
pub fn parse_item(response: &RawResponse, source_url: &str) -> Result<ItemRecord, ParseError> {
    let data = response.body.get("data").ok_or(ParseError::MissingData)?;
    let detail: DetailData = serde_json::from_value(data.clone())
        .map_err(|err| ParseError::Malformed(err.to_string()))?;

    let item_id = scalar_text(&detail.item.item_id);
    if item_id.is_empty() {
        return Err(ParseError::MissingItemId);
    }

    let images = detail
        .item
        .image_infos
        .into_iter()
        .filter_map(|image| image.url)
        .filter(|url| !url.is_empty())
        .collect();

    Ok(ItemRecord {
        item_id,
        category_id: scalar_text(&detail.item.category_id),
        title: detail.item.title.unwrap_or_default(),
        images,
        sold_price: scalar_text(&detail.item.sold_price),
        browse_count: count(&detail.item.browse_cnt),
        want_count: count(&detail.item.want_cnt),
        collect_count: count(&detail.item.collect_cnt),
        quantity: count(&detail.item.quantity),
        created_at: normalize_created(&detail.item.gmt_create),
        seller_id: scalar_text(&detail.seller.seller_id),
        source_url: source_url.to_string(),
    })
}

/// Ids and prices arrive as numbers or strings depending on the listing.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => String::new(),
    }
}

fn count(value: &Value) -> u64 {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().map(|n| n.max(0.0) as u64))
            .unwrap_or(0),
        Value::String(text) => text.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// Millisecond epoch to RFC 3339 UTC; anything else is kept verbatim.
fn normalize_created(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            .or_else(|| Some(number.to_string())),
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => text
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .map(|ts| ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            .or_else(|| Some(text.clone())),
        other => Some(other.to_string()),
    }
}
