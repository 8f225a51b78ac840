//! OpenSanctions bulk export (`targets.simple.csv`)

use super::{parse_date, FetchContext, ListSnapshot, ParsedList, RecordSet, RefreshOutcome};
use super::{SourceAdapter, SourceHealth, Transport};
use crate::error::SourceError;
use crate::types::{SourceRecord, SubjectType};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const LIST_NAME: &str = "OPENSANCTIONS";
const MULTI_VALUE_SEPARATOR: char = ';';

#[derive(Debug, Deserialize)]
struct TargetRow {
    id: String,
    #[serde(default)]
    schema: String,
    name: String,
    #[serde(default)]
    aliases: String,
    #[serde(default)]
    birth_date: String,
    #[serde(default)]
    countries: String,
}

fn split_values(field: &str) -> impl Iterator<Item = &str> {
    field.split(MULTI_VALUE_SEPARATOR).map(str::trim).filter(|v| !v.is_empty())
}

pub fn parse_targets(source_id: &str, payload: &[u8]) -> Result<ParsedList, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(payload);

    let headers = reader
        .headers()
        .map_err(|e| SourceError::format(source_id, e.to_string()))?
        .clone();
    for required in ["id", "name"] {
        if !headers.iter().any(|h| h == required) {
            return Err(SourceError::format(source_id, format!("missing column {}", required)));
        }
    }

    let mut records = Vec::new();
    for row in reader.deserialize::<TargetRow>() {
        let row = row.map_err(|e| SourceError::format(source_id, e.to_string()))?;
        let primary_name = row.name.trim().to_string();
        if row.id.trim().is_empty() || primary_name.is_empty() {
            continue;
        }

        let aliases: BTreeSet<String> = split_values(&row.aliases)
            .filter(|a| *a != primary_name)
            .map(String::from)
            .collect();

        let subject_type = match row.schema.as_str() {
            "Person" => Some(SubjectType::Individual),
            "Organization" | "Company" | "LegalEntity" | "PublicBody" => Some(SubjectType::Entity),
            _ => None,
        };

        records.push(SourceRecord {
            source_id: source_id.to_string(),
            list_name: LIST_NAME.to_string(),
            record_id: row.id.trim().to_string(),
            birth_date: split_values(&row.birth_date).find_map(parse_date),
            nationality: split_values(&row.countries)
                .find(|c| c.len() == 2)
                .map(str::to_uppercase),
            primary_name,
            aliases,
            subject_type,
        });
    }

    Ok(ParsedList::new(records, payload))
}

pub struct OpenSanctionsAdapter {
    source_id: String,
    endpoint: String,
    transport: Arc<dyn Transport>,
    snapshot: ListSnapshot,
}

impl OpenSanctionsAdapter {
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
        parse_targets(&self.source_id, &payload)
    }
}

#[async_trait]
impl SourceAdapter for OpenSanctionsAdapter {
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
