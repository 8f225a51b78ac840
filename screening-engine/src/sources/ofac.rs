//! OFAC lists in the sdnList XML schema
//!
//! The SDN list (sdn.xml) and the consolidated non-SDN list (nonsdn.xml) share
//! one document format, so one adapter serves both under different list names.

use super::{join_name, parse_date, FetchContext, ListSnapshot, ParsedList, RecordSet, RefreshOutcome};
use super::{SourceAdapter, SourceHealth, Transport};
use crate::error::SourceError;
use crate::normalizer::normalize_country;
use crate::types::{SourceRecord, SubjectType};
use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const SDN_LIST_NAME: &str = "SDN";
pub const NON_SDN_LIST_NAME: &str = "NON-SDN";

#[derive(Debug, Deserialize)]
struct SdnList {
    #[serde(rename = "sdnEntry", default)]
    entries: Vec<SdnEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SdnEntry {
    uid: String,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    sdn_type: Option<String>,
    #[serde(default)]
    aka_list: Option<AkaList>,
    #[serde(default)]
    date_of_birth_list: Option<DateOfBirthList>,
    #[serde(default)]
    nationality_list: Option<NationalityList>,
}

#[derive(Debug, Deserialize)]
struct AkaList {
    #[serde(rename = "aka", default)]
    items: Vec<Aka>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Aka {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DateOfBirthList {
    #[serde(rename = "dateOfBirthItem", default)]
    items: Vec<DateOfBirthItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DateOfBirthItem {
    #[serde(default)]
    date_of_birth: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NationalityList {
    #[serde(rename = "nationality", default)]
    items: Vec<Nationality>,
}

#[derive(Debug, Deserialize)]
struct Nationality {
    #[serde(default)]
    country: Option<String>,
}

pub fn parse_sdn(source_id: &str, list_name: &str, payload: &[u8]) -> Result<ParsedList, SourceError> {
    let xml = std::str::from_utf8(payload).map_err(|e| SourceError::format(source_id, e.to_string()))?;
    if !xml.contains("<sdnList") {
        return Err(SourceError::format(source_id, "missing sdnList root element"));
    }

    let list: SdnList = from_str(xml).map_err(|e| SourceError::format(source_id, e.to_string()))?;

    let mut records = Vec::with_capacity(list.entries.len());
    for entry in list.entries {
        let primary_name = join_name(&[entry.first_name.as_deref(), entry.last_name.as_deref()]);
        if primary_name.is_empty() {
            warn!("Skipping {} entry {} with no name", list_name, entry.uid);
            continue;
        }

        let aliases = entry
            .aka_list
            .map(|l| l.items)
            .unwrap_or_default()
            .into_iter()
            .map(|a| join_name(&[a.first_name.as_deref(), a.last_name.as_deref()]))
            .filter(|a| !a.is_empty() && *a != primary_name)
            .collect();

        let birth_date = entry
            .date_of_birth_list
            .map(|l| l.items)
            .unwrap_or_default()
            .iter()
            .filter_map(|d| d.date_of_birth.as_deref())
            .find_map(parse_date);

        let nationality = entry
            .nationality_list
            .map(|l| l.items)
            .unwrap_or_default()
            .iter()
            .filter_map(|n| n.country.as_deref())
            .find_map(normalize_country);

        let subject_type = match entry.sdn_type.as_deref() {
            Some("Individual") => Some(SubjectType::Individual),
            Some(_) => Some(SubjectType::Entity),
            None => None,
        };

        records.push(SourceRecord {
            source_id: source_id.to_string(),
            list_name: list_name.to_string(),
            record_id: entry.uid.trim().to_string(),
            primary_name,
            aliases,
            birth_date,
            nationality,
            subject_type,
        });
    }

    Ok(ParsedList::new(records, payload))
}

pub struct OfacAdapter {
    source_id: String,
    list_name: String,
    endpoint: String,
    transport: Arc<dyn Transport>,
    snapshot: ListSnapshot,
}

impl OfacAdapter {
    pub fn new(
        source_id: impl Into<String>,
        list_name: impl Into<String>,
        endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        max_age: Duration,
    ) -> Self {
        let source_id = source_id.into();
        Self {
            snapshot: ListSnapshot::new(source_id.clone(), max_age),
            source_id,
            list_name: list_name.into(),
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
        parse_sdn(&self.source_id, &self.list_name, &payload)
    }
}

#[async_trait]
impl SourceAdapter for OfacAdapter {
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
