use crate::error::{Result, ScreeningError};
use crate::sources::ofac::NON_SDN_LIST_NAME;
use crate::types::ListKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "SCREENING";
const ENV_SEPARATOR: &str = "__";

pub const OFAC_SDN_URL: &str = "https://www.treasury.gov/ofac/downloads/sdn.xml";
pub const OFAC_NON_SDN_URL: &str = "https://www.treasury.gov/ofac/downloads/nonsdn.xml";
pub const UN_CONSOLIDATED_URL: &str =
    "https://scsanctions.un.org/resources/xml/en/consolidated.json";
pub const EU_FSF_URL: &str = "https://webgate.ec.europa.eu/fsd/fsf/public/files/xmlFullSanctionsList_1_1/content?token=dG9rZW4tMjAxNw";
pub const EU_FSF_FALLBACK_URL: &str = "https://webgate.ec.europa.eu/fsd/fsf/public/files/xmlFullSanctionsList/content?token=dG9rZW4tMjAxNw";
pub const OPENSANCTIONS_PEP_URL: &str =
    "https://data.opensanctions.org/datasets/latest/peps/targets.simple.csv";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub matching: MatchingConfig,
    pub cache: CacheConfig,
    pub orchestrator: OrchestratorConfig,
    pub sources: BTreeMap<String, SourceConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut sources = BTreeMap::new();
        sources.insert(
            "ofac".to_string(),
            SourceConfig::remote(Provider::Ofac, ListKind::Sanctions, OFAC_SDN_URL, 0),
        );
        sources.insert(
            "un".to_string(),
            SourceConfig::remote(Provider::Un, ListKind::Sanctions, UN_CONSOLIDATED_URL, 1),
        );
        let mut eu = SourceConfig::remote(Provider::Eu, ListKind::Sanctions, EU_FSF_URL, 2);
        eu.fallback_endpoint = Some(EU_FSF_FALLBACK_URL.to_string());
        sources.insert("eu".to_string(), eu);
        sources.insert(
            "opensanctions".to_string(),
            SourceConfig::remote(Provider::OpenSanctions, ListKind::Pep, OPENSANCTIONS_PEP_URL, 3),
        );
        let mut non_sdn = SourceConfig::remote(Provider::Ofac, ListKind::Sanctions, OFAC_NON_SDN_URL, 4);
        non_sdn.list_name = Some(NON_SDN_LIST_NAME.to_string());
        sources.insert("ofac_consolidated".to_string(), non_sdn);

        Self {
            matching: MatchingConfig::default(),
            cache: CacheConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            sources,
        }
    }
}

// ==================== Matching ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum score for a candidate to be reported
    pub min_score: f64,
    /// A single match at or above this is high risk on its own
    pub high_risk_cutoff: f64,
    pub dob_bonus: f64,
    pub nationality_bonus: f64,
    /// Subtracted in proportion to how many aligned tokens appear out of order
    pub order_penalty: f64,
    /// Similarity credited when a single-letter token is the initial of the other
    pub initial_similarity: f64,
    /// Honorifics and particles dropped before matching
    pub stop_words: Vec<String>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            min_score: 0.80,
            high_risk_cutoff: 0.95,
            dob_bonus: 0.10,
            nationality_bonus: 0.05,
            order_penalty: 0.05,
            initial_similarity: 0.90,
            stop_words: [
                "mr", "mrs", "ms", "miss", "dr", "prof", "sir", "dame", "lord", "lady", "hon",
                "rev", "sheikh", "shaikh", "haji", "hajji", "jr", "sr", "de", "del", "della",
                "der", "van", "von", "bin", "ibn", "al", "el", "la", "le",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

// ==================== Cache ====================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Watch lists change rarely, so completed results live long
    pub result_ttl_secs: u64,
    /// Results with failed sources are kept briefly so the next request retries them
    pub partial_ttl_secs: u64,
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            result_ttl_secs: 86_400,
            partial_ttl_secs: 300,
            key_prefix: "screening:result".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn partial_ttl(&self) -> Duration {
        Duration::from_secs(self.partial_ttl_secs)
    }
}

// ==================== Orchestrator ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Overall budget for one screen() call
    pub request_timeout_ms: u64,
    /// Per-source bound when neither the source nor the request sets one
    pub default_source_timeout_ms: u64,
    /// Interval between scheduled source refresh cycles
    pub refresh_interval_secs: u64,
    /// Bound on one full list download during a refresh
    pub refresh_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            default_source_timeout_ms: 5_000,
            refresh_interval_secs: 6 * 3600,
            refresh_timeout_ms: 300_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn default_source_timeout(&self) -> Duration {
        Duration::from_millis(self.default_source_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }
}

// ==================== Sources ====================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ofac,
    Un,
    Eu,
    OpenSanctions,
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub provider: Provider,
    #[serde(default = "default_list_kind")]
    pub list_kind: ListKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub fallback_endpoint: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Lower value wins equal-score tie-breaks
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
    /// JSON file of records for `static` sources
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Label stamped on records; OFAC sources default to SDN
    #[serde(default)]
    pub list_name: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_list_kind() -> ListKind {
    ListKind::Sanctions
}

fn default_max_age_hours() -> u64 {
    24
}

impl SourceConfig {
    pub fn remote(provider: Provider, list_kind: ListKind, endpoint: &str, priority: u32) -> Self {
        Self {
            enabled: true,
            provider,
            list_kind,
            endpoint: Some(endpoint.to_string()),
            fallback_endpoint: None,
            timeout_ms: None,
            priority,
            max_age_hours: default_max_age_hours(),
            path: None,
            list_name: None,
        }
    }

    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 3600)
    }
}

impl EngineConfig {
    /// Defaults, then `SCREENING_CONFIG` file if set, then `SCREENING__*` env overrides
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let path = env::var("SCREENING_CONFIG").ok().map(PathBuf::from);
        Self::build(path.as_deref())
    }

    /// Load from a config file (format from extension) layered over the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenv::dotenv().ok();
        Self::build(Some(path.as_ref()))
    }

    fn build(path: Option<&Path>) -> Result<Self> {
        let defaults = serde_json::to_string(&EngineConfig::default())
            .map_err(|e| ScreeningError::Config(e.to_string()))?;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(&defaults, config::FileFormat::Json));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let loaded: EngineConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ScreeningError::Config(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.matching;
        for (name, value) in [
            ("min_score", m.min_score),
            ("high_risk_cutoff", m.high_risk_cutoff),
            ("dob_bonus", m.dob_bonus),
            ("nationality_bonus", m.nationality_bonus),
            ("order_penalty", m.order_penalty),
            ("initial_similarity", m.initial_similarity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ScreeningError::Config(format!(
                    "matching.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if m.high_risk_cutoff < m.min_score {
            return Err(ScreeningError::Config(format!(
                "matching.high_risk_cutoff ({}) is below matching.min_score ({})",
                m.high_risk_cutoff, m.min_score
            )));
        }

        let o = &self.orchestrator;
        if o.request_timeout_ms == 0
            || o.default_source_timeout_ms == 0
            || o.refresh_timeout_ms == 0
            || o.refresh_interval_secs == 0
        {
            return Err(ScreeningError::Config("orchestrator timeouts and refresh interval must be non-zero".to_string()));
        }

        for (id, source) in &self.sources {
            if source.timeout_ms == Some(0) {
                return Err(ScreeningError::Config(format!("source {} has a zero timeout", id)));
            }
            match source.provider {
                Provider::Static => {
                    if source.path.is_none() {
                        return Err(ScreeningError::Config(format!(
                            "static source {} needs a path",
                            id
                        )));
                    }
                }
                _ => {
                    if source.endpoint.is_none() {
                        return Err(ScreeningError::Config(format!(
                            "source {} needs an endpoint",
                            id
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sources.len(), 5);
        assert_eq!(config.sources["opensanctions"].list_kind, ListKind::Pep);
        assert_eq!(config.sources["ofac_consolidated"].provider, Provider::Ofac);
        assert_eq!(config.sources["ofac_consolidated"].list_name.as_deref(), Some("NON-SDN"));
        assert_eq!(config.sources["ofac"].list_name, None);
        assert_eq!(config.matching.min_score, 0.80);
        assert_eq!(config.matching.high_risk_cutoff, 0.95);
    }

    #[test]
    fn test_cutoff_below_threshold_rejected() {
        let mut config = EngineConfig::default();
        config.matching.high_risk_cutoff = 0.5;
        assert!(matches!(config.validate(), Err(ScreeningError::Config(_))));
    }

    #[test]
    fn test_static_source_requires_path() {
        let mut config = EngineConfig::default();
        config.sources.insert(
            "internal".to_string(),
            SourceConfig {
                enabled: true,
                provider: Provider::Static,
                list_kind: ListKind::Sanctions,
                endpoint: None,
                fallback_endpoint: None,
                timeout_ms: None,
                priority: 9,
                max_age_hours: 24,
                path: None,
                list_name: None,
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_file_layers_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "matching": {{ "min_score": 0.85 }},
                "cache": {{ "result_ttl_secs": 60 }},
                "sources": {{ "ofac": {{ "provider": "ofac", "endpoint": "http://localhost/sdn.xml", "enabled": false }} }}
            }}"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.matching.min_score, 0.85);
        assert_eq!(config.matching.high_risk_cutoff, 0.95);
        assert_eq!(config.cache.result_ttl_secs, 60);
        assert!(!config.sources["ofac"].enabled);
        assert_eq!(config.sources["ofac"].endpoint.as_deref(), Some("http://localhost/sdn.xml"));
        assert!(config.sources["un"].enabled);
    }
}
