//! Locally maintained watch list: seeded records or a JSON file of records

use super::{FetchContext, ListSnapshot, ParsedList, RecordSet, RefreshOutcome};
use super::{SourceAdapter, SourceHealth};
use crate::error::SourceError;
use crate::types::SourceRecord;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone)]
enum Origin {
    Seeded(Vec<SourceRecord>),
    File(PathBuf),
}

/// Never goes stale on its own; `refresh` re-reads the file or re-installs the seed
pub struct StaticListAdapter {
    source_id: String,
    origin: parking_lot::RwLock<Origin>,
    snapshot: ListSnapshot,
}

impl StaticListAdapter {
    pub fn new(source_id: impl Into<String>, records: Vec<SourceRecord>) -> Self {
        Self::with_origin(source_id.into(), Origin::Seeded(records))
    }

    pub fn from_file(source_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::with_origin(source_id.into(), Origin::File(path.into()))
    }

    fn with_origin(source_id: String, origin: Origin) -> Self {
        Self {
            snapshot: ListSnapshot::new(source_id.clone(), Duration::MAX),
            source_id,
            origin: parking_lot::RwLock::new(origin),
        }
    }

    /// Swap the seeded records. Takes effect on the next refresh.
    pub fn replace_records(&self, records: Vec<SourceRecord>) {
        *self.origin.write() = Origin::Seeded(records);
    }

    async fn load(&self) -> Result<ParsedList, SourceError> {
        let origin = self.origin.read().clone();
        let (records, payload) = match origin {
            Origin::Seeded(records) => {
                let payload = serde_json::to_vec(&records)
                    .map_err(|e| SourceError::format(&self.source_id, e.to_string()))?;
                (records, payload)
            }
            Origin::File(path) => {
                let payload = tokio::fs::read(&path).await.map_err(|e| {
                    SourceError::unavailable(&self.source_id, format!("{}: {}", path.display(), e))
                })?;
                let records: Vec<SourceRecord> = serde_json::from_slice(&payload)
                    .map_err(|e| SourceError::format(&self.source_id, e.to_string()))?;
                (records, payload)
            }
        };

        let records = records
            .into_iter()
            .map(|mut r| {
                r.source_id = self.source_id.clone();
                r
            })
            .collect();

        Ok(ParsedList::new(records, &payload))
    }
}

#[async_trait]
impl SourceAdapter for StaticListAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch(&self, _ctx: &FetchContext) -> Result<RecordSet, SourceError> {
        self.snapshot.get_or_load(|| self.load()).await
    }

    async fn refresh(&self, _ctx: &FetchContext) -> Result<RefreshOutcome, SourceError> {
        let (set, changed) = self.snapshot.reload(|| self.load()).await?;
        Ok(RefreshOutcome {
            record_count: set.len(),
            content_hash: set.content_hash().to_string(),
            changed,
        })
    }

    fn health_check(&self) -> SourceHealth {
        self.snapshot.health()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn record(id: &str, name: &str) -> SourceRecord {
        SourceRecord {
            source_id: "ignored".to_string(),
            list_name: "INTERNAL".to_string(),
            record_id: id.to_string(),
            primary_name: name.to_string(),
            aliases: Default::default(),
            birth_date: None,
            nationality: None,
            subject_type: None,
        }
    }

    fn ctx() -> FetchContext {
        FetchContext::new(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_seeded_records_carry_source_id() {
        let adapter = StaticListAdapter::new("internal", vec![record("1", "Ivan Petrov")]);
        let set = adapter.fetch(&ctx()).await.unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().source_id, "internal");
    }

    #[tokio::test]
    async fn test_replace_records_detected_on_refresh() {
        let adapter = StaticListAdapter::new("internal", vec![record("1", "Ivan Petrov")]);
        adapter.fetch(&ctx()).await.unwrap();

        let same = adapter.refresh(&ctx()).await.unwrap();
        assert!(!same.changed);

        adapter.replace_records(vec![record("1", "Ivan Petrov"), record("2", "Olga Petrova")]);
        assert_eq!(adapter.fetch(&ctx()).await.unwrap().len(), 1);

        let changed = adapter.refresh(&ctx()).await.unwrap();
        assert!(changed.changed);
        assert_eq!(changed.record_count, 2);
    }

    #[tokio::test]
    async fn test_file_backed_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_json::to_string(&vec![record("7", "Acme Trading LLC")]).unwrap()).unwrap();

        let adapter = StaticListAdapter::from_file("internal", file.path());
        let set = adapter.fetch(&ctx()).await.unwrap();
        assert_eq!(set.iter().next().unwrap().primary_name, "Acme Trading LLC");

        let missing = StaticListAdapter::from_file("internal", "/nonexistent/list.json");
        assert!(missing.fetch(&ctx()).await.unwrap_err().is_transient());
    }
}
