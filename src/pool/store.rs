//! CSV input and output stores.
//!
//! The output file is the single source of truth for what has already been
//! harvested: it seeds the dedup cache on startup and every persistence pass
//! rewrites it in full.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::ItemRecord;

pub const URL_COLUMN: &str = "URL";

pub const OUTPUT_COLUMNS: [&str; 12] = [
    "URL",
    "ITEM_ID",
    "CATEGORY_ID",
    "TITLE",
    "IMAGES",
    "SOLD_PRICE",
    "BROWSE_COUNT",
    "WANT_COUNT",
    "COLLECT_COUNT",
    "QUANTITY",
    "GMT_CREATE",
    "SELLER_ID",
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("failed to encode images: {0}")]
    Images(#[from] serde_json::Error),
}

/// One persisted row. Fields are kept as text so rows written by earlier
/// runs survive a rewrite unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputRow {
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "ITEM_ID")]
    pub item_id: String,
    #[serde(rename = "CATEGORY_ID")]
    pub category_id: String,
    #[serde(rename = "TITLE")]
    pub title: String,
    #[serde(rename = "IMAGES")]
    pub images: String,
    #[serde(rename = "SOLD_PRICE")]
    pub sold_price: String,
    #[serde(rename = "BROWSE_COUNT")]
    pub browse_count: String,
    #[serde(rename = "WANT_COUNT")]
    pub want_count: String,
    #[serde(rename = "COLLECT_COUNT")]
    pub collect_count: String,
    #[serde(rename = "QUANTITY")]
    pub quantity: String,
    #[serde(rename = "GMT_CREATE")]
    pub created_at: String,
    #[serde(rename = "SELLER_ID")]
    pub seller_id: String,
}

impl TryFrom<&ItemRecord> for OutputRow {
    type Error = StoreError;

    fn try_from(record: &ItemRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            url: record.source_url.clone(),
            item_id: record.item_id.clone(),
            category_id: record.category_id.clone(),
            title: record.title.clone(),
            images: serde_json::to_string(&record.images)?,
            sold_price: record.sold_price.clone(),
            browse_count: record.browse_count.to_string(),
            want_count: record.want_count.to_string(),
            collect_count: record.collect_count.to_string(),
            quantity: record.quantity.to_string(),
            created_at: record.created_at.clone().unwrap_or_default(),
            seller_id: record.seller_id.clone(),
        })
    }
}

/// Item ids already present in the output store.
#[derive(Debug, Clone, Default)]
pub struct DedupCache {
    ids: HashSet<String>,
}

impl DedupCache {
    pub fn contains(&self, item_id: &str) -> bool {
        self.ids.contains(item_id)
    }

    /// Returns `false` when the id was already present.
    pub fn insert(&mut self, item_id: impl Into<String>) -> bool {
        self.ids.insert(item_id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<String> for DedupCache {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().filter(|id| !id.is_empty()).collect(),
        }
    }
}

/// Result of one persistence pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistStats {
    pub rows: usize,
    pub added: usize,
}

#[derive(Debug, Clone)]
pub struct OutputStore {
    path: PathBuf,
}

impl OutputStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Existing rows in file order; a missing file reads as empty.
    pub fn load_rows(&self) -> Result<Vec<OutputRow>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        reader
            .deserialize()
            .collect::<Result<Vec<OutputRow>, _>>()
            .map_err(StoreError::from)
    }

    pub fn load_dedup_cache(&self) -> Result<DedupCache, StoreError> {
        let cache: DedupCache = self.load_rows()?.into_iter().map(|row| row.item_id).collect();
        log::info!("dedup cache: {} item(s) already in {}", cache.len(), self.path.display());
        Ok(cache)
    }

    /// Rewrites the store with the existing rows followed by every record
    /// whose id is not yet present. First occurrence of an id wins.
    pub fn persist(&self, records: &[ItemRecord]) -> Result<PersistStats, StoreError> {
        let mut seen = DedupCache::default();
        let mut rows = Vec::new();
        for row in self.load_rows()? {
            if !row.item_id.is_empty() && seen.insert(row.item_id.clone()) {
                rows.push(row);
            }
        }
        let existing = rows.len();

        for record in records {
            if !record.item_id.is_empty() && seen.insert(record.item_id.clone()) {
                rows.push(OutputRow::try_from(record)?);
            }
        }

        self.write_atomic(&rows)?;
        Ok(PersistStats {
            rows: rows.len(),
            added: rows.len() - existing,
        })
    }

    fn write_atomic(&self, rows: &[OutputRow]) -> Result<(), StoreError> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut writer = csv::Writer::from_path(&tmp)?;
        if rows.is_empty() {
            writer.write_record(OUTPUT_COLUMNS)?;
        }
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush().map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        drop(writer);

        fs::rename(&tmp, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Reads the `URL` column of the input CSV in file order.
pub fn read_input_urls(path: impl AsRef<Path>) -> Result<Vec<String>, StoreError> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let column = reader
        .headers()?
        .iter()
        .position(|name| name.trim() == URL_COLUMN)
        .ok_or_else(|| StoreError::MissingColumn {
            path: path.to_path_buf(),
            column: URL_COLUMN,
        })?;

    let mut urls = Vec::new();
    for row in reader.records() {
        if let Some(url) = row?.get(column).map(str::trim).filter(|url| !url.is_empty()) {
            urls.push(url.to_string());
        }
    }
    Ok(urls)
}
