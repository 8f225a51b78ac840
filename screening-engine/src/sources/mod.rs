pub mod eu;
pub mod ofac;
pub mod opensanctions;
pub mod snapshot;
pub mod static_list;
pub mod transport;
pub mod un;

use crate::error::SourceError;
use crate::types::SourceRecord;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

pub use eu::EuAdapter;
pub use ofac::OfacAdapter;
pub use opensanctions::OpenSanctionsAdapter;
pub use snapshot::ListSnapshot;
pub use static_list::StaticListAdapter;
pub use transport::{HttpTransport, Transport, TransportError};
pub use un::UnAdapter;

/// Per-invocation settings passed to an adapter
#[derive(Debug, Clone, Copy)]
pub struct FetchContext {
    /// Bound on any download this call performs
    pub timeout: Duration,
}

impl FetchContext {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Immutable view of one list download. Cheap to clone and restart iteration over.
#[derive(Debug, Clone)]
pub struct RecordSet {
    records: Arc<[SourceRecord]>,
    fetched_at: DateTime<Utc>,
    content_hash: String,
}

impl RecordSet {
    pub fn new(records: Vec<SourceRecord>, fetched_at: DateTime<Utc>, content_hash: String) -> Self {
        Self {
            records: records.into(),
            fetched_at,
            content_hash,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SourceRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a SourceRecord;
    type IntoIter = std::slice::Iter<'a, SourceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub last_successful_fetch: Option<DateTime<Utc>>,
    pub record_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub record_count: usize,
    pub content_hash: String,
    /// False when the new download is byte-identical to the previous one
    pub changed: bool,
}

/// One watch-list provider. Implementations translate a provider feed into
/// canonical records and own their download cache.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;

    /// Current records, downloading only when the held copy is missing or stale
    async fn fetch(&self, ctx: &FetchContext) -> Result<RecordSet, SourceError>;

    /// Unconditionally download and replace the held copy
    async fn refresh(&self, ctx: &FetchContext) -> Result<RefreshOutcome, SourceError>;

    fn health_check(&self) -> SourceHealth;
}

/// Raw list payload reduced to canonical records
#[derive(Debug)]
pub struct ParsedList {
    pub records: Vec<SourceRecord>,
    pub content_hash: String,
}

impl ParsedList {
    pub fn new(records: Vec<SourceRecord>, payload: &[u8]) -> Self {
        Self {
            records,
            content_hash: content_hash(payload),
        }
    }
}

pub fn content_hash(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}

/// Full dates only; year-only or partial values cannot support an exact DOB match
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    ["%Y-%m-%d", "%d %b %Y", "%d/%m/%Y", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

pub(crate) fn join_name(parts: &[Option<&str>]) -> String {
    parts
        .iter()
        .flatten()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
