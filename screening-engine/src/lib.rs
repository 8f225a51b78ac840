//! Sanctions and PEP screening engine
//!
//! Screens a subject against several independently maintained watch lists,
//! tolerating spelling variation, and returns one ranked, risk-classified result.

pub mod aggregate;
pub mod alerting;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod inflight;
pub mod matcher;
pub mod metrics;
pub mod normalizer;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod sources;
pub mod types;

pub use alerting::{AlertEvent, AlertSink, ChannelAlertSink, LogAlertSink};
pub use cache::{CacheStore, InMemoryStore, RedisStore, ResultCache};
pub use config::EngineConfig;
pub use error::{CacheError, Result, ScreeningError, SourceError};
pub use matcher::FuzzyMatcher;
pub use normalizer::{NormalizedName, Normalizer};
pub use orchestrator::{ScreenOptions, ScreeningOrchestrator};
pub use registry::{SourceRegistry, SourceSettings, SourceStatus};
pub use scheduler::RefreshScheduler;
pub use sources::{FetchContext, RecordSet, RefreshOutcome, SourceAdapter, SourceHealth};
pub use types::{
    ListKind, Match, MatchedField, RiskLevel, ScreeningQuery, ScreeningResult, ScreeningStatus, SourceRecord,
    SubjectType,
};
