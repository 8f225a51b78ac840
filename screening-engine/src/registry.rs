use crate::config::SourceConfig;
use crate::error::{Result, ScreeningError, SourceError};
use crate::sources::{RefreshOutcome, SourceAdapter};
use crate::types::ListKind;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    pub enabled: bool,
    pub list_kind: ListKind,
    /// Lower value wins equal-score tie-breaks
    pub priority: u32,
    pub timeout: Duration,
}

impl SourceSettings {
    pub fn new(list_kind: ListKind, priority: u32, timeout: Duration) -> Self {
        Self {
            enabled: true,
            list_kind,
            priority,
            timeout,
        }
    }

    pub fn from_config(config: &SourceConfig, default_timeout: Duration) -> Self {
        Self {
            enabled: config.enabled,
            list_kind: config.list_kind,
            priority: config.priority,
            timeout: config.timeout(default_timeout),
        }
    }
}

/// Operational view of one source, latest-wins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub enabled: bool,
    pub list_kind: ListKind,
    pub priority: u32,
    pub last_successful_fetch: Option<DateTime<Utc>>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub record_count: usize,
    pub content_hash: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct SourceState {
    last_successful_fetch: Option<DateTime<Utc>>,
    last_refresh: Option<DateTime<Utc>>,
    record_count: usize,
    content_hash: Option<String>,
    last_error: Option<String>,
}

struct RegisteredSource {
    adapter: Arc<dyn SourceAdapter>,
    settings: RwLock<SourceSettings>,
    state: RwLock<SourceState>,
}

/// A source chosen for one screening, with settings captured at selection time
#[derive(Clone)]
pub struct SelectedSource {
    pub source_id: String,
    pub adapter: Arc<dyn SourceAdapter>,
    pub settings: SourceSettings,
}

impl std::fmt::Debug for SelectedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedSource")
            .field("source_id", &self.source_id)
            .field("settings", &self.settings)
            .finish()
    }
}

pub struct SourceRegistry {
    sources: DashMap<String, Arc<RegisteredSource>>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self { sources: DashMap::new() }
    }

    /// Registers an adapter under its own source id, replacing any previous one
    pub fn register(&self, adapter: Arc<dyn SourceAdapter>, settings: SourceSettings) {
        let source_id = adapter.source_id().to_string();
        info!(
            "Registering source {} ({}, priority {}, enabled {})",
            source_id, settings.list_kind, settings.priority, settings.enabled
        );

        let entry = Arc::new(RegisteredSource {
            adapter,
            settings: RwLock::new(settings),
            state: RwLock::new(SourceState::default()),
        });
        if self.sources.insert(source_id.clone(), entry).is_some() {
            warn!("Source {} was already registered and has been replaced", source_id);
        }
    }

    pub fn set_enabled(&self, source_id: &str, enabled: bool) -> Result<()> {
        let entry = self.entry(source_id)?;
        entry.settings.write().enabled = enabled;
        info!("Source {} enabled={}", source_id, enabled);
        Ok(())
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.sources.contains_key(source_id)
    }

    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn get(&self, source_id: &str) -> Result<SelectedSource> {
        let entry = self.entry(source_id)?;
        let settings = entry.settings.read().clone();
        Ok(SelectedSource {
            source_id: source_id.to_string(),
            adapter: entry.adapter.clone(),
            settings,
        })
    }

    /// Enabled sources matching the request, ordered by source id.
    /// Explicitly named ids must all be registered.
    pub fn select(
        &self,
        requested: Option<&BTreeSet<String>>,
        list_kinds: Option<&BTreeSet<ListKind>>,
    ) -> Result<Vec<SelectedSource>> {
        let ids = match requested {
            Some(ids) => {
                if let Some(unknown) = ids.iter().find(|id| !self.contains(id)) {
                    return Err(ScreeningError::UnknownSource(unknown.clone()));
                }
                ids.iter().cloned().collect()
            }
            None => self.source_ids(),
        };

        let selected: Vec<SelectedSource> = ids
            .iter()
            .filter_map(|id| self.get(id).ok())
            .filter(|s| s.settings.enabled)
            .filter(|s| list_kinds.map_or(true, |kinds| kinds.contains(&s.settings.list_kind)))
            .collect();

        if selected.is_empty() {
            return Err(ScreeningError::NoSourcesSelected);
        }
        Ok(selected)
    }

    pub fn record_success(&self, source_id: &str, record_count: usize) {
        if let Ok(entry) = self.entry(source_id) {
            let mut state = entry.state.write();
            state.last_successful_fetch = Some(Utc::now());
            state.record_count = record_count;
            state.last_error = None;
        }
    }

    pub fn record_failure(&self, source_id: &str, error: &SourceError) {
        if let Ok(entry) = self.entry(source_id) {
            entry.state.write().last_error = Some(error.to_string());
        }
    }

    pub fn record_refresh(&self, source_id: &str, outcome: &RefreshOutcome) {
        if let Ok(entry) = self.entry(source_id) {
            let now = Utc::now();
            let mut state = entry.state.write();
            state.last_refresh = Some(now);
            state.last_successful_fetch = Some(now);
            state.record_count = outcome.record_count;
            state.content_hash = Some(outcome.content_hash.clone());
            state.last_error = None;
        }
    }

    pub fn status(&self) -> BTreeMap<String, SourceStatus> {
        self.sources
            .iter()
            .map(|e| {
                let source = e.value();
                let settings = source.settings.read().clone();
                let state = source.state.read();
                let health = source.adapter.health_check();

                let status = SourceStatus {
                    source_id: e.key().clone(),
                    enabled: settings.enabled,
                    list_kind: settings.list_kind,
                    priority: settings.priority,
                    last_successful_fetch: state.last_successful_fetch.max(health.last_successful_fetch),
                    last_refresh: state.last_refresh,
                    record_count: if health.last_successful_fetch.is_some() {
                        health.record_count
                    } else {
                        state.record_count
                    },
                    content_hash: state.content_hash.clone(),
                    last_error: state.last_error.clone(),
                };
                (e.key().clone(), status)
            })
            .collect()
    }

    fn entry(&self, source_id: &str) -> Result<Arc<RegisteredSource>> {
        self.sources
            .get(source_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| ScreeningError::UnknownSource(source_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::StaticListAdapter;

    fn registry() -> SourceRegistry {
        let registry = SourceRegistry::new();
        for (id, kind, priority) in [
            ("ofac", ListKind::Sanctions, 0),
            ("un", ListKind::Sanctions, 1),
            ("pep", ListKind::Pep, 2),
        ] {
            registry.register(
                Arc::new(StaticListAdapter::new(id, Vec::new())),
                SourceSettings::new(kind, priority, Duration::from_secs(1)),
            );
        }
        registry
    }

    fn ids(selected: &[SelectedSource]) -> Vec<&str> {
        selected.iter().map(|s| s.source_id.as_str()).collect()
    }

    #[test]
    fn test_select_all_enabled() {
        let registry = registry();
        assert_eq!(ids(&registry.select(None, None).unwrap()), vec!["ofac", "pep", "un"]);

        registry.set_enabled("un", false).unwrap();
        assert_eq!(ids(&registry.select(None, None).unwrap()), vec!["ofac", "pep"]);
    }

    #[test]
    fn test_select_by_list_kind() {
        let registry = registry();
        let kinds: BTreeSet<ListKind> = [ListKind::Pep].into_iter().collect();
        assert_eq!(ids(&registry.select(None, Some(&kinds)).unwrap()), vec!["pep"]);
    }

    #[test]
    fn test_select_unknown_and_empty() {
        let registry = registry();
        let requested: BTreeSet<String> = ["ofac".to_string(), "interpol".to_string()].into_iter().collect();
        assert_eq!(
            registry.select(Some(&requested), None).unwrap_err(),
            ScreeningError::UnknownSource("interpol".to_string())
        );

        registry.set_enabled("ofac", false).unwrap();
        let requested: BTreeSet<String> = ["ofac".to_string()].into_iter().collect();
        assert_eq!(
            registry.select(Some(&requested), None).unwrap_err(),
            ScreeningError::NoSourcesSelected
        );
        assert!(registry.set_enabled("interpol", true).is_err());
    }

    #[test]
    fn test_status_tracks_outcomes() {
        let registry = registry();
        registry.record_failure("un", &SourceError::unavailable("un", "connection refused"));
        registry.record_refresh(
            "ofac",
            &RefreshOutcome {
                record_count: 3,
                content_hash: "abc".to_string(),
                changed: true,
            },
        );

        let status = registry.status();
        assert_eq!(status.len(), 3);
        assert!(status["un"].last_error.as_deref().unwrap().contains("connection refused"));
        assert_eq!(status["ofac"].record_count, 3);
        assert_eq!(status["ofac"].content_hash.as_deref(), Some("abc"));
        assert!(status["ofac"].last_refresh.is_some());

        registry.record_success("un", 10);
        let status = registry.status();
        assert_eq!(status["un"].last_error, None);
        assert_eq!(status["un"].record_count, 10);
    }
}
