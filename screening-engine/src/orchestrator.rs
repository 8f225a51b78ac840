//! Screening orchestration
//!
//! One `screen()` call: validate, select sources, consult the cache, then join or
//! start the single computation for the query fingerprint. The computation fans
//! out to every selected source concurrently, each under its own deadline, and
//! merges whatever came back.

use crate::aggregate::{build_match, classify_risk, merge_matches, resolve_status};
use crate::alerting::{AlertEvent, AlertSink};
use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::error::{Result, ScreeningError, SourceError};
use crate::fingerprint::{query_fingerprint, subject_fingerprint};
use crate::inflight::{CompletionGuard, InFlight, ScreeningOutcome};
use crate::matcher::{round_score, FuzzyMatcher, PreparedQuery};
use crate::metrics;
use crate::registry::{SelectedSource, SourceRegistry, SourceSettings, SourceStatus};
use crate::sources::{FetchContext, RecordSet, RefreshOutcome};
use crate::types::{ListKind, Match, RiskLevel, ScreeningQuery, ScreeningResult, ScreeningStatus};
use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Extra wait past the request budget for the merge step to hand over its result
const RESULT_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreenOptions {
    /// Restrict to these source ids. Unknown ids are rejected.
    pub sources: Option<BTreeSet<String>>,
    /// Restrict to sources publishing these list kinds
    pub list_kinds: Option<BTreeSet<ListKind>>,
    /// Raises the match threshold above the configured one. Lower values are rejected.
    pub min_score: Option<f64>,
    /// Overall budget; also caps each source's own timeout
    pub timeout: Option<Duration>,
}

impl ScreenOptions {
    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = Some(sources.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_list_kinds(mut self, kinds: impl IntoIterator<Item = ListKind>) -> Self {
        self.list_kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct ScreeningJob {
    query: ScreeningQuery,
    selected: Vec<SelectedSource>,
    query_fingerprint: String,
    subject_fingerprint: String,
    min_score: f64,
    budget: Duration,
}

struct Inner {
    registry: Arc<SourceRegistry>,
    cache: Arc<ResultCache>,
    matcher: Arc<FuzzyMatcher>,
    alerts: Arc<dyn AlertSink>,
    inflight: Arc<InFlight>,
    min_score: f64,
    high_risk_cutoff: f64,
    request_timeout: Duration,
    refresh_timeout: Duration,
    result_ttl: Duration,
    partial_ttl: Duration,
}

#[derive(Clone)]
pub struct ScreeningOrchestrator {
    inner: Arc<Inner>,
}

impl ScreeningOrchestrator {
    pub fn new(
        config: &EngineConfig,
        registry: Arc<SourceRegistry>,
        cache: Arc<ResultCache>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                cache,
                matcher: Arc::new(FuzzyMatcher::new(&config.matching)),
                alerts,
                inflight: InFlight::new(),
                min_score: config.matching.min_score,
                high_risk_cutoff: config.matching.high_risk_cutoff,
                request_timeout: config.orchestrator.request_timeout(),
                refresh_timeout: config.orchestrator.refresh_timeout(),
                result_ttl: config.cache.result_ttl(),
                partial_ttl: config.cache.partial_ttl(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.inner.registry
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.inner.cache
    }

    pub async fn screen(&self, query: &ScreeningQuery, options: &ScreenOptions) -> Result<ScreeningResult> {
        let started = Instant::now();
        let outcome = self.screen_inner(query, options).await;
        metrics::SCREENING_DURATION.observe(started.elapsed().as_secs_f64());

        if let Err(e) = &outcome {
            let label = match e {
                ScreeningError::Timeout { .. } => "timeout",
                _ => "error",
            };
            metrics::record_request(label);
        }
        outcome
    }

    /// Screens several subjects concurrently. Results keep input order.
    pub async fn screen_batch(
        &self,
        queries: &[ScreeningQuery],
        options: &ScreenOptions,
    ) -> Vec<Result<ScreeningResult>> {
        join_all(queries.iter().map(|q| self.screen(q, options))).await
    }

    pub fn get_source_status(&self) -> BTreeMap<String, SourceStatus> {
        self.inner.registry.status()
    }

    pub fn subject_fingerprint(&self, query: &ScreeningQuery) -> String {
        subject_fingerprint(query, self.inner.matcher.normalizer())
    }

    /// Drops every cached result for a subject, e.g. after a reviewer decision
    pub async fn invalidate_subject(&self, subject_fingerprint: &str) -> usize {
        self.inner.cache.invalidate_by_subject(subject_fingerprint).await
    }

    /// Reloads one source. Cached results that involved it are dropped when its content changed.
    pub async fn refresh_source(&self, source_id: &str) -> Result<RefreshOutcome> {
        let source = self.inner.registry.get(source_id)?;
        self.inner.refresh(&source).await.map_err(ScreeningError::from)
    }

    /// Reloads every enabled source concurrently
    pub async fn refresh_all(&self) -> BTreeMap<String, std::result::Result<RefreshOutcome, SourceError>> {
        let selected = match self.inner.registry.select(None, None) {
            Ok(selected) => selected,
            Err(_) => return BTreeMap::new(),
        };

        let outcomes = join_all(selected.iter().map(|s| self.inner.refresh(s))).await;
        let results: BTreeMap<_, _> = selected
            .into_iter()
            .map(|s| s.source_id)
            .zip(outcomes)
            .collect();

        let failed = results.values().filter(|r| r.is_err()).count();
        info!("Refresh cycle finished: {} sources, {} failed", results.len(), failed);
        self.inner.cache.purge_expired().await;
        results
    }

    async fn screen_inner(&self, query: &ScreeningQuery, options: &ScreenOptions) -> Result<ScreeningResult> {
        let min_score = validate(query, options, self.inner.min_score)?;
        let budget = options.timeout.unwrap_or(self.inner.request_timeout);

        let selected = self
            .inner
            .registry
            .select(options.sources.as_ref(), options.list_kinds.as_ref())?;
        let source_ids: BTreeSet<String> = selected.iter().map(|s| s.source_id.clone()).collect();

        let normalizer = self.inner.matcher.normalizer();
        let query_fp = query_fingerprint(query, normalizer, &source_ids, min_score);

        if let Some(hit) = self.inner.cache.get(&query_fp).await {
            debug!("Cache hit for {}", short(&query_fp));
            metrics::record_cache("hit");
            metrics::record_request("cached");
            return Ok(hit);
        }

        let job = ScreeningJob {
            query: query.clone(),
            selected,
            query_fingerprint: query_fp.clone(),
            subject_fingerprint: subject_fingerprint(query, normalizer),
            min_score,
            budget,
        };

        let inner = self.inner.clone();
        let (shared, leader) = self
            .inner
            .inflight
            .join_or_spawn(&query_fp, move |guard| inner.execute(job, guard));
        metrics::record_cache(if leader { "miss" } else { "joined" });

        match timeout(budget.saturating_add(RESULT_GRACE), shared).await {
            Ok(Ok(result)) => Ok(result.as_ref().clone()),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    "Screening {} exceeded its {}ms budget; result will still be cached",
                    short(&query_fp),
                    budget.as_millis()
                );
                Err(ScreeningError::Timeout {
                    budget_ms: budget.as_millis() as u64,
                })
            }
        }
    }
}

/// Checks the request and returns the effective threshold, rounded the way
/// scores and fingerprints are
fn validate(query: &ScreeningQuery, options: &ScreenOptions, base_min_score: f64) -> Result<f64> {
    if query.subject_name().trim().is_empty() {
        return Err(ScreeningError::InvalidQuery("subject name is empty".to_string()));
    }
    if options.timeout == Some(Duration::ZERO) {
        return Err(ScreeningError::InvalidQuery("timeout must be non-zero".to_string()));
    }

    let base = round_score(base_min_score);
    let requested = match options.min_score {
        Some(requested) => requested,
        None => return Ok(base),
    };
    if !(0.0..=1.0).contains(&requested) {
        return Err(ScreeningError::InvalidQuery(format!(
            "min_score must be within [0, 1], got {}",
            requested
        )));
    }
    let requested = round_score(requested);
    if requested < base {
        return Err(ScreeningError::InvalidQuery(format!(
            "min_score may only raise the threshold of {}, got {}",
            base, requested
        )));
    }
    Ok(requested)
}

fn short(fingerprint: &str) -> &str {
    &fingerprint[..fingerprint.len().min(12)]
}

fn match_records(
    matcher: &FuzzyMatcher,
    query: &PreparedQuery,
    records: &RecordSet,
    settings: &SourceSettings,
    min_score: f64,
) -> Vec<Match> {
    records
        .iter()
        .filter_map(|record| {
            matcher
                .evaluate(query, record)
                .filter(|scored| scored.score >= min_score)
                .map(|scored| build_match(record, settings, scored))
        })
        .collect()
}

impl Inner {
    async fn execute(self: Arc<Self>, job: ScreeningJob, guard: CompletionGuard) -> ScreeningOutcome {
        // A previous computation may have populated the cache after our caller's lookup
        if let Some(hit) = self.cache.get(&job.query_fingerprint).await {
            return Ok(Arc::new(hit));
        }

        let started = Instant::now();
        let generation = self.cache.generation();
        let prepared = Arc::new(self.matcher.prepare(&job.query));

        let outcomes = join_all(
            job.selected
                .iter()
                .map(|source| self.query_source(source, &prepared, job.min_score, job.budget)),
        )
        .await;

        let mut matches = Vec::new();
        let mut sources_queried = BTreeSet::new();
        let mut sources_failed = BTreeSet::new();
        for (source, outcome) in job.selected.iter().zip(outcomes) {
            match outcome {
                Ok(mut found) => {
                    sources_queried.insert(source.source_id.clone());
                    matches.append(&mut found);
                }
                Err(_) => {
                    sources_failed.insert(source.source_id.clone());
                }
            }
        }

        let matches = merge_matches(matches);
        let risk_level = classify_risk(&matches, self.high_risk_cutoff);
        let status = resolve_status(sources_queried.len(), sources_failed.len());

        let result = ScreeningResult {
            screening_id: Uuid::new_v4(),
            query_fingerprint: job.query_fingerprint,
            subject_fingerprint: job.subject_fingerprint,
            status,
            risk_level,
            matches,
            sources_queried,
            sources_failed,
            completed_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            fingerprint = short(&result.query_fingerprint),
            status = ?result.status,
            risk = result.risk_level.as_str(),
            matches = result.matches.len(),
            failed = result.sources_failed.len(),
            duration_ms = result.duration_ms,
            "Screening completed"
        );
        metrics::record_request(match result.status {
            ScreeningStatus::Completed => "completed",
            ScreeningStatus::PartialFailure => "partial_failure",
            ScreeningStatus::Failed => "failed",
        });

        let result = self.store(result, generation).await;
        drop(guard);

        if result.risk_level == RiskLevel::High {
            self.raise_alert(&result);
        }
        Ok(Arc::new(result))
    }

    async fn query_source(
        &self,
        source: &SelectedSource,
        prepared: &Arc<PreparedQuery>,
        min_score: f64,
        budget: Duration,
    ) -> std::result::Result<Vec<Match>, SourceError> {
        let source_id = source.source_id.as_str();
        let bound = source.settings.timeout.min(budget);
        let ctx = FetchContext::new(bound);

        let started = Instant::now();
        let fetched = match timeout(bound, source.adapter.fetch(&ctx)).await {
            Ok(fetched) => fetched,
            Err(_) => Err(SourceError::unavailable(
                source_id,
                format!("no response within {}ms", bound.as_millis()),
            )),
        };
        let elapsed = started.elapsed().as_secs_f64();

        let records = match fetched {
            Ok(records) => {
                metrics::record_source_fetch(source_id, "success", elapsed);
                self.registry.record_success(source_id, records.len());
                records
            }
            Err(e) => {
                warn!(source_id, error = %e, "Source fetch failed");
                metrics::record_source_fetch(source_id, "failure", elapsed);
                self.registry.record_failure(source_id, &e);
                return Err(e);
            }
        };

        // Whole-list matching is CPU-bound
        let matcher = self.matcher.clone();
        let prepared = prepared.clone();
        let settings = source.settings.clone();
        tokio::task::spawn_blocking(move || match_records(&matcher, &prepared, &records, &settings, min_score))
            .await
            .map_err(|e| {
                let err = SourceError::format(source_id, format!("matching task failed: {}", e));
                self.registry.record_failure(source_id, &err);
                err
            })
    }

    /// Caches per status and returns the value that now stands for this fingerprint
    async fn store(&self, result: ScreeningResult, generation: u64) -> ScreeningResult {
        let ttl = match result.status {
            ScreeningStatus::Completed => self.result_ttl,
            ScreeningStatus::PartialFailure => self.partial_ttl,
            ScreeningStatus::Failed => return result,
        };
        if ttl.is_zero() {
            return result;
        }
        let key = result.query_fingerprint.clone();
        self.cache.put_if_current(&key, result, Some(ttl), generation).await
    }

    fn raise_alert(&self, result: &ScreeningResult) {
        let event = AlertEvent::high_risk(result);
        let alerts = self.alerts.clone();
        tokio::spawn(async move {
            match alerts.publish(event).await {
                Ok(()) => metrics::SCREENING_ALERTS_TOTAL.inc(),
                Err(e) => warn!("Failed to publish high-risk alert: {}", e),
            }
        });
    }

    async fn refresh(&self, source: &SelectedSource) -> std::result::Result<RefreshOutcome, SourceError> {
        let source_id = source.source_id.as_str();
        let ctx = FetchContext::new(self.refresh_timeout);

        let started = Instant::now();
        let outcome = match timeout(self.refresh_timeout, source.adapter.refresh(&ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SourceError::unavailable(
                source_id,
                format!("refresh did not finish within {}ms", self.refresh_timeout.as_millis()),
            )),
        };
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(outcome) => {
                metrics::record_source_fetch(source_id, "refresh", elapsed);
                self.registry.record_refresh(source_id, &outcome);
                if outcome.changed {
                    let removed = self.cache.invalidate_by_source(source_id).await;
                    info!(
                        "Source {} refreshed with {} records; {} cached results invalidated",
                        source_id, outcome.record_count, removed
                    );
                } else {
                    debug!("Source {} refreshed, content unchanged", source_id);
                }
                Ok(outcome)
            }
            Err(e) => {
                warn!(source_id, error = %e, "Source refresh failed");
                metrics::record_source_fetch(source_id, "refresh_failure", elapsed);
                self.registry.record_failure(source_id, &e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::LogAlertSink;
    use crate::sources::StaticListAdapter;
    use crate::types::SourceRecord;

    fn record(source: &str, id: &str, name: &str) -> SourceRecord {
        SourceRecord {
            source_id: source.to_string(),
            list_name: "TEST".to_string(),
            record_id: id.to_string(),
            primary_name: name.to_string(),
            aliases: Default::default(),
            birth_date: None,
            nationality: None,
            subject_type: None,
        }
    }

    fn orchestrator(records: Vec<SourceRecord>) -> ScreeningOrchestrator {
        let config = EngineConfig::default();
        let registry = Arc::new(SourceRegistry::new());
        registry.register(
            Arc::new(StaticListAdapter::new("internal", records)),
            SourceSettings::new(ListKind::Sanctions, 0, Duration::from_secs(1)),
        );
        ScreeningOrchestrator::new(
            &config,
            registry,
            Arc::new(ResultCache::in_memory(Duration::from_secs(60))),
            Arc::new(LogAlertSink),
        )
    }

    fn two_source_orchestrator(name: &str) -> ScreeningOrchestrator {
        let registry = Arc::new(SourceRegistry::new());
        for (priority, source) in ["ofac", "un"].into_iter().enumerate() {
            registry.register(
                Arc::new(StaticListAdapter::new(source, vec![record(source, "1", name)])),
                SourceSettings::new(ListKind::Sanctions, priority as u32, Duration::from_secs(1)),
            );
        }
        ScreeningOrchestrator::new(
            &EngineConfig::default(),
            registry,
            Arc::new(ResultCache::in_memory(Duration::from_secs(60))),
            Arc::new(LogAlertSink),
        )
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let o = orchestrator(Vec::new());
        let err = o
            .screen(&ScreeningQuery::individual("   "), &ScreenOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScreeningError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let o = orchestrator(Vec::new());
        let q = ScreeningQuery::individual("Ivan Petrov");
        assert!(o.screen(&q, &ScreenOptions::default().with_min_score(1.5)).await.is_err());
        assert!(o.screen(&q, &ScreenOptions::default().with_timeout(Duration::ZERO)).await.is_err());
        assert_eq!(
            o.screen(&q, &ScreenOptions::default().with_sources(["nowhere"])).await.unwrap_err(),
            ScreeningError::UnknownSource("nowhere".to_string())
        );
        assert_eq!(
            o.screen(&q, &ScreenOptions::default().with_list_kinds([ListKind::Pep]))
                .await
                .unwrap_err(),
            ScreeningError::NoSourcesSelected
        );
    }

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let o = orchestrator(vec![record("internal", "1", "Ivan Petrov")]);
        let q = ScreeningQuery::individual("Ivan Petrov");

        let first = o.screen(&q, &ScreenOptions::default()).await.unwrap();
        let second = o.screen(&q, &ScreenOptions::default()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.matches.len(), 1);
        assert_eq!(first.risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn test_min_score_option_filters() {
        let o = orchestrator(vec![record("internal", "1", "Victor Petrenko")]);
        let q = ScreeningQuery::individual("Viktor Petrenko");

        let loose = o.screen(&q, &ScreenOptions::default()).await.unwrap();
        assert_eq!(loose.risk_level, RiskLevel::Medium);

        let strict = o.screen(&q, &ScreenOptions::default().with_min_score(0.95)).await.unwrap();
        assert!(strict.matches.is_empty());
        assert_eq!(strict.risk_level, RiskLevel::Low);
        assert_ne!(loose.query_fingerprint, strict.query_fingerprint);
    }

    #[tokio::test]
    async fn test_batch_keeps_input_order() {
        let o = orchestrator(vec![record("internal", "1", "Ivan Petrov")]);
        let queries = vec![
            ScreeningQuery::individual("Zzqx Flibber"),
            ScreeningQuery::individual("Ivan Petrov"),
            ScreeningQuery::individual(""),
        ];

        let results = o.screen_batch(&queries, &ScreenOptions::default()).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().risk_level, RiskLevel::Low);
        assert_eq!(results[1].as_ref().unwrap().risk_level, RiskLevel::High);
        assert!(results[2].is_err());
    }

    #[tokio::test]
    async fn test_min_score_cannot_lower_threshold() {
        let o = two_source_orchestrator("Ivan Petrovsky");
        let q = ScreeningQuery::individual("Ivanna Petrov");

        let default = o.screen(&q, &ScreenOptions::default()).await.unwrap();
        assert!(default.matches.is_empty());
        assert_eq!(default.risk_level, RiskLevel::Low);

        let err = o
            .screen(&q, &ScreenOptions::default().with_min_score(0.5))
            .await
            .unwrap_err();
        assert!(matches!(err, ScreeningError::InvalidQuery(_)));
        assert!(o.screen(&q, &ScreenOptions::default().with_min_score(0.799)).await.is_err());
    }

    #[tokio::test]
    async fn test_min_score_rounded_once() {
        let o = orchestrator(vec![record("internal", "1", "Victor Petrenko")]);
        let q = ScreeningQuery::individual("Viktor Petrenko");

        let base = o.screen(&q, &ScreenOptions::default()).await.unwrap();
        let exact = o.screen(&q, &ScreenOptions::default().with_min_score(0.8)).await.unwrap();
        let noisy = o
            .screen(&q, &ScreenOptions::default().with_min_score(0.80004))
            .await
            .unwrap();

        assert_eq!(base.query_fingerprint, exact.query_fingerprint);
        assert_eq!(exact.query_fingerprint, noisy.query_fingerprint);
        assert_eq!(exact.matches, noisy.matches);
        assert_eq!(noisy.screening_id, base.screening_id);
    }

    #[tokio::test]
    async fn test_unbounded_timeout_accepted() {
        let o = orchestrator(vec![record("internal", "1", "Ivan Petrov")]);
        let q = ScreeningQuery::individual("Ivan Petrov");

        let result = o
            .screen(&q, &ScreenOptions::default().with_timeout(Duration::MAX))
            .await
            .unwrap();
        assert_eq!(result.status, ScreeningStatus::Completed);
        assert_eq!(result.risk_level, RiskLevel::High);
    }
}
