use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectType {
    Individual,
    Entity,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Individual => "INDIVIDUAL",
            SubjectType::Entity => "ENTITY",
        }
    }
}

/// What kind of watch list a source publishes. Sanctions lists win tie-breaks over PEP lists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ListKind {
    Sanctions,
    Pep,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Sanctions => "SANCTIONS",
            ListKind::Pep => "PEP",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A person or organisation to screen. Built once per request and never changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreeningQuery {
    subject_name: String,
    subject_type: SubjectType,
    date_of_birth: Option<NaiveDate>,
    nationality: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

impl ScreeningQuery {
    pub fn new(subject_name: impl Into<String>, subject_type: SubjectType) -> Self {
        Self {
            subject_name: subject_name.into(),
            subject_type,
            date_of_birth: None,
            nationality: None,
            aliases: Vec::new(),
        }
    }

    pub fn individual(subject_name: impl Into<String>) -> Self {
        Self::new(subject_name, SubjectType::Individual)
    }

    pub fn entity(subject_name: impl Into<String>) -> Self {
        Self::new(subject_name, SubjectType::Entity)
    }

    pub fn with_date_of_birth(mut self, dob: NaiveDate) -> Self {
        self.date_of_birth = Some(dob);
        self
    }

    /// ISO-3166 alpha-2 code, stored upper-cased
    pub fn with_nationality(mut self, code: impl Into<String>) -> Self {
        self.nationality = Some(code.into().trim().to_uppercase());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    pub fn subject_name(&self) -> &str {
        &self.subject_name
    }

    pub fn subject_type(&self) -> SubjectType {
        self.subject_type
    }

    pub fn date_of_birth(&self) -> Option<NaiveDate> {
        self.date_of_birth
    }

    pub fn nationality(&self) -> Option<&str> {
        self.nationality.as_deref()
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }
}

/// Canonical watch-list record produced by a source adapter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRecord {
    pub source_id: String,
    pub list_name: String,
    pub record_id: String,
    pub primary_name: String,
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub subject_type: Option<SubjectType>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchedField {
    Name,
    Dob,
    Nationality,
    Alias,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Match {
    pub source_id: String,
    pub record_id: String,
    pub list_name: String,
    pub list_kind: ListKind,
    pub source_priority: u32,
    pub matched_name: String,
    pub score: f64, // 0.0-1.0
    pub matched_fields: BTreeSet<MatchedField>,
    pub subject_type: Option<SubjectType>,
    pub birth_date: Option<NaiveDate>,
    /// Every source that reported this same entity, including `source_id`
    pub contributing_sources: BTreeSet<String>,
}

impl Match {
    pub fn dob_matched(&self) -> bool {
        self.matched_fields.contains(&MatchedField::Dob)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScreeningStatus {
    Completed,
    PartialFailure,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreeningResult {
    pub screening_id: Uuid,
    pub query_fingerprint: String,
    pub subject_fingerprint: String,
    pub status: ScreeningStatus,
    pub risk_level: RiskLevel,
    pub matches: Vec<Match>,
    pub sources_queried: BTreeSet<String>,
    pub sources_failed: BTreeSet<String>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ScreeningResult {
    /// Sources this result depends on, whether they answered or not
    pub fn sources_involved(&self) -> impl Iterator<Item = &String> {
        self.sources_queried.iter().chain(self.sources_failed.iter())
    }

    /// `Failed` means no screening decision was made; it is not the same as low risk
    pub fn is_decision(&self) -> bool {
        self.status != ScreeningStatus::Failed
    }
}
