//! UN Security Council consolidated list (JSON rendition)

use super::{join_name, parse_date, FetchContext, ListSnapshot, ParsedList, RecordSet, RefreshOutcome};
use super::{SourceAdapter, SourceHealth, Transport};
use crate::error::SourceError;
use crate::normalizer::normalize_country;
use crate::types::{SourceRecord, SubjectType};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const LIST_NAME: &str = "UN_CONSOLIDATED";

/// The feed renders single-element collections as a bare object
fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(v @ Value::Object(_)) => vec![v],
        _ => Vec::new(),
    }
}

fn text<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

fn data_id(value: &Value) -> Option<String> {
    ["DATAID", "@dataid"].iter().find_map(|key| match value.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn parse_entry(source_id: &str, entry: &Value, subject_type: SubjectType) -> Option<SourceRecord> {
    let record_id = data_id(entry)?;

    let primary_name = join_name(&[
        text(entry, "FIRST_NAME"),
        text(entry, "SECOND_NAME"),
        text(entry, "THIRD_NAME"),
        text(entry, "FOURTH_NAME"),
    ]);
    if primary_name.is_empty() {
        warn!("Skipping UN entry {} with no name", record_id);
        return None;
    }

    let alias_key = match subject_type {
        SubjectType::Individual => "INDIVIDUAL_ALIAS",
        SubjectType::Entity => "ENTITY_ALIAS",
    };
    let aliases: BTreeSet<String> = as_list(entry.get(alias_key))
        .into_iter()
        .filter_map(|a| text(a, "ALIAS_NAME"))
        .filter(|a| *a != primary_name)
        .map(String::from)
        .collect();

    let birth_date = as_list(entry.get("INDIVIDUAL_DATE_OF_BIRTH"))
        .into_iter()
        .filter_map(|d| text(d, "DATE"))
        .find_map(parse_date);

    let nationality = as_list(entry.get("NATIONALITY"))
        .into_iter()
        .filter_map(|n| match n.get("VALUE") {
            Some(Value::String(s)) => Some(s.as_str()),
            Some(Value::Array(values)) => values.first().and_then(Value::as_str),
            _ => None,
        })
        .find_map(normalize_country);

    Some(SourceRecord {
        source_id: source_id.to_string(),
        list_name: LIST_NAME.to_string(),
        record_id,
        primary_name,
        aliases,
        birth_date,
        nationality,
        subject_type: Some(subject_type),
    })
}

pub fn parse_consolidated(source_id: &str, payload: &[u8]) -> Result<ParsedList, SourceError> {
    let doc: Value = serde_json::from_slice(payload).map_err(|e| SourceError::format(source_id, e.to_string()))?;
    let list = doc
        .get("CONSOLIDATED_LIST")
        .ok_or_else(|| SourceError::format(source_id, "missing CONSOLIDATED_LIST"))?;

    let individuals = as_list(list.get("INDIVIDUALS").and_then(|v| v.get("INDIVIDUAL")));
    let entities = as_list(list.get("ENTITIES").and_then(|v| v.get("ENTITY")));

    let records = individuals
        .into_iter()
        .filter_map(|e| parse_entry(source_id, e, SubjectType::Individual))
        .chain(
            entities
                .into_iter()
                .filter_map(|e| parse_entry(source_id, e, SubjectType::Entity)),
        )
        .collect();

    Ok(ParsedList::new(records, payload))
}

pub struct UnAdapter {
    source_id: String,
    endpoint: String,
    transport: Arc<dyn Transport>,
    snapshot: ListSnapshot,
}

impl UnAdapter {
    pub fn new(
        source_id: impl Into<String>,
        endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        max_age: Duration,
    ) -> Self {
        let source_id = source_id.into();
        Self {
            snapshot: ListSnapshot::new(source_id.clone(), max_age),
            source_id,
            endpoint: endpoint.into(),
            transport,
        }
    }

    async fn download(&self, ctx: &FetchContext) -> Result<ParsedList, SourceError> {
        let payload = self
            .transport
            .get(&self.endpoint, ctx.timeout)
            .await
            .map_err(|e| SourceError::unavailable(&self.source_id, e.to_string()))?;
        parse_consolidated(&self.source_id, &payload)
    }
}

#[async_trait]
impl SourceAdapter for UnAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<RecordSet, SourceError> {
        self.snapshot.get_or_load(|| self.download(ctx)).await
    }

    async fn refresh(&self, ctx: &FetchContext) -> Result<RefreshOutcome, SourceError> {
        let (set, changed) = self.snapshot.reload(|| self.download(ctx)).await?;
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
