//! EU Financial Sanctions Files consolidated list

use super::{parse_date, FetchContext, ListSnapshot, ParsedList, RecordSet, RefreshOutcome};
use super::{SourceAdapter, SourceHealth, Transport};
use crate::error::SourceError;
use crate::types::{SourceRecord, SubjectType};
use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const LIST_NAME: &str = "EU_FSF";

#[derive(Debug, Deserialize)]
struct Export {
    #[serde(rename = "sanctionEntity", default)]
    entities: Vec<SanctionEntity>,
}

#[derive(Debug, Deserialize)]
struct SanctionEntity {
    #[serde(rename = "@logicalId", default)]
    logical_id: Option<String>,
    #[serde(rename = "subjectType", default)]
    subject_type: Option<SubjectTypeElement>,
    #[serde(rename = "nameAlias", default)]
    name_aliases: Vec<NameAlias>,
    #[serde(rename = "birthdate", default)]
    birthdates: Vec<BirthDate>,
    #[serde(rename = "citizenship", default)]
    citizenships: Vec<Citizenship>,
}

#[derive(Debug, Deserialize)]
struct SubjectTypeElement {
    #[serde(rename = "@code", default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NameAlias {
    #[serde(rename = "@wholeName", default)]
    whole_name: Option<String>,
    #[serde(rename = "@strong", default)]
    strong: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BirthDate {
    #[serde(rename = "@birthdate", default)]
    birthdate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Citizenship {
    #[serde(rename = "@countryIso2Code", default)]
    country: Option<String>,
}

pub fn parse_fsf(source_id: &str, payload: &[u8]) -> Result<ParsedList, SourceError> {
    let xml = std::str::from_utf8(payload).map_err(|e| SourceError::format(source_id, e.to_string()))?;
    if !xml.contains("<export") {
        return Err(SourceError::format(source_id, "missing export root element"));
    }

    let export: Export = from_str(xml).map_err(|e| SourceError::format(source_id, e.to_string()))?;

    let mut records = Vec::with_capacity(export.entities.len());
    for entity in export.entities {
        let record_id = match entity.logical_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => continue,
        };

        let mut primary_name: Option<String> = None;
        let mut others: Vec<String> = Vec::new();
        for alias in &entity.name_aliases {
            let name = match alias.whole_name.as_deref().map(str::trim) {
                Some(n) if !n.is_empty() => n.to_string(),
                _ => continue,
            };
            let strong = alias.strong.as_deref().map_or(false, |s| s.eq_ignore_ascii_case("true"));
            if strong && primary_name.is_none() {
                primary_name = Some(name);
            } else {
                others.push(name);
            }
        }

        // No strong alias: the first listed name stands in
        let primary_name = match primary_name {
            Some(name) => name,
            None if !others.is_empty() => others.remove(0),
            None => {
                warn!("Skipping EU entity {} with no name", record_id);
                continue;
            }
        };
        let aliases: BTreeSet<String> = others.into_iter().filter(|a| *a != primary_name).collect();

        let birth_date = entity
            .birthdates
            .iter()
            .filter_map(|b| b.birthdate.as_deref())
            .find_map(parse_date);

        let nationality = entity
            .citizenships
            .iter()
            .filter_map(|c| c.country.as_deref().map(str::trim))
            .find(|c| c.len() == 2 && *c != "00")
            .map(str::to_uppercase);

        let subject_type = entity.subject_type.and_then(|s| s.code).and_then(|code| match code.as_str() {
            "person" => Some(SubjectType::Individual),
            "enterprise" => Some(SubjectType::Entity),
            _ => None,
        });

        records.push(SourceRecord {
            source_id: source_id.to_string(),
            list_name: LIST_NAME.to_string(),
            record_id,
            primary_name,
            aliases,
            birth_date,
            nationality,
            subject_type,
        });
    }

    Ok(ParsedList::new(records, payload))
}

pub struct EuAdapter {
    source_id: String,
    endpoint: String,
    fallback_endpoint: Option<String>,
    transport: Arc<dyn Transport>,
    snapshot: ListSnapshot,
}

impl EuAdapter {
    pub fn new(
        source_id: impl Into<String>,
        endpoint: impl Into<String>,
        fallback_endpoint: Option<String>,
        transport: Arc<dyn Transport>,
        max_age: Duration,
    ) -> Self {
        let source_id = source_id.into();
        Self {
            snapshot: ListSnapshot::new(source_id.clone(), max_age),
            source_id,
            endpoint: endpoint.into(),
            fallback_endpoint,
            transport,
        }
    }

    async fn download(&self, ctx: &FetchContext) -> Result<ParsedList, SourceError> {
        let payload = match self.transport.get(&self.endpoint, ctx.timeout).await {
            Ok(payload) => payload,
            Err(primary_err) => match &self.fallback_endpoint {
                Some(fallback) => {
                    debug!("EU primary endpoint failed ({}), trying fallback", primary_err);
                    self.transport
                        .get(fallback, ctx.timeout)
                        .await
                        .map_err(|e| SourceError::unavailable(&self.source_id, e.to_string()))?
                }
                None => return Err(SourceError::unavailable(&self.source_id, primary_err.to_string())),
            },
        };
        parse_fsf(&self.source_id, &payload)
    }
}

#[async_trait]
impl SourceAdapter for EuAdapter {
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
