use super::{ParsedList, RecordSet, SourceHealth};
use crate::error::SourceError;
use chrono::Utc;
use parking_lot::RwLock;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Last good download of a list, shared by every screening that reads it.
/// Concurrent loads are serialized so a stale list is downloaded once.
pub struct ListSnapshot {
    source_id: String,
    max_age: Duration,
    current: RwLock<Option<RecordSet>>,
    load_lock: Mutex<()>,
}

impl ListSnapshot {
    pub fn new(source_id: impl Into<String>, max_age: Duration) -> Self {
        Self {
            source_id: source_id.into(),
            max_age,
            current: RwLock::new(None),
            load_lock: Mutex::new(()),
        }
    }

    pub fn current(&self) -> Option<RecordSet> {
        self.current.read().clone()
    }

    /// The held copy if it is younger than `max_age`
    pub fn fresh(&self) -> Option<RecordSet> {
        let guard = self.current.read();
        let set = guard.as_ref()?;
        let age = Utc::now()
            .signed_duration_since(set.fetched_at())
            .to_std()
            .unwrap_or_default();
        if age < self.max_age {
            Some(set.clone())
        } else {
            None
        }
    }

    /// Returns a fresh set, running `load` only when none is held.
    /// A failed load leaves the previous copy in place but does not serve it.
    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<RecordSet, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ParsedList, SourceError>>,
    {
        if let Some(set) = self.fresh() {
            return Ok(set);
        }

        let _guard = self.load_lock.lock().await;
        // Another caller may have finished the download while we waited
        if let Some(set) = self.fresh() {
            return Ok(set);
        }

        let parsed = load().await?;
        Ok(self.install(parsed).0)
    }

    /// Always runs `load`. Returns the new set and whether its content changed.
    pub async fn reload<F, Fut>(&self, load: F) -> Result<(RecordSet, bool), SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ParsedList, SourceError>>,
    {
        let _guard = self.load_lock.lock().await;
        let parsed = load().await?;
        Ok(self.install(parsed))
    }

    pub fn install(&self, parsed: ParsedList) -> (RecordSet, bool) {
        let set = RecordSet::new(parsed.records, Utc::now(), parsed.content_hash);

        let mut current = self.current.write();
        let changed = current
            .as_ref()
            .map_or(true, |prev| prev.content_hash() != set.content_hash());
        *current = Some(set.clone());
        drop(current);

        if changed {
            info!(
                "Loaded {} records for source {} (hash {})",
                set.len(),
                self.source_id,
                set.content_hash().get(..12).unwrap_or(set.content_hash())
            );
        } else {
            debug!("Source {} content unchanged", self.source_id);
        }

        (set, changed)
    }

    pub fn health(&self) -> SourceHealth {
        match self.current.read().as_ref() {
            Some(set) => SourceHealth {
                last_successful_fetch: Some(set.fetched_at()),
                record_count: set.len(),
            },
            None => SourceHealth::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceRecord;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn parsed(names: &[&str]) -> ParsedList {
        let records = names
            .iter()
            .enumerate()
            .map(|(i, n)| SourceRecord {
                source_id: "test".to_string(),
                list_name: "TEST".to_string(),
                record_id: i.to_string(),
                primary_name: n.to_string(),
                aliases: Default::default(),
                birth_date: None,
                nationality: None,
                subject_type: None,
            })
            .collect();
        ParsedList::new(records, names.join(",").as_bytes())
    }

    #[tokio::test]
    async fn test_fresh_copy_is_reused() {
        let snapshot = ListSnapshot::new("test", Duration::from_secs(3600));
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let set = snapshot
                .get_or_load(|| async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(parsed(&["a", "b"]))
                })
                .await
                .unwrap();
            assert_eq!(set.len(), 2);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(snapshot.health().record_count, 2);
    }

    #[tokio::test]
    async fn test_concurrent_stale_loads_download_once() {
        let snapshot = Arc::new(ListSnapshot::new("test", Duration::from_secs(3600)));
        let loads = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let snapshot = snapshot.clone();
                let loads = loads.clone();
                tokio::spawn(async move {
                    snapshot
                        .get_or_load(|| async {
                            loads.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(parsed(&["a"]))
                        })
                        .await
                })
            })
            .collect();

        for t in futures::future::join_all(tasks).await {
            assert!(t.unwrap().is_ok());
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_copy_not_served_on_failure() {
        let snapshot = ListSnapshot::new("test", Duration::ZERO);
        snapshot.install(parsed(&["a"]));

        let result = snapshot
            .get_or_load(|| async { Err(SourceError::unavailable("test", "down")) })
            .await;
        assert!(result.is_err());
        assert_eq!(snapshot.health().record_count, 1);
    }

    #[tokio::test]
    async fn test_reload_reports_change() {
        let snapshot = ListSnapshot::new("test", Duration::from_secs(3600));
        let (_, first) = snapshot.reload(|| async { Ok(parsed(&["a"])) }).await.unwrap();
        let (_, same) = snapshot.reload(|| async { Ok(parsed(&["a"])) }).await.unwrap();
        let (set, changed) = snapshot.reload(|| async { Ok(parsed(&["a", "b"])) }).await.unwrap();

        assert!(first);
        assert!(!same);
        assert!(changed);
        assert_eq!(set.len(), 2);
    }
}
