use thiserror::Error;

/// Errors surfaced to the caller of `screen()`
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScreeningError {
    #[error("Invalid screening query: {0}")]
    InvalidQuery(String),

    #[error("Screening timed out after {budget_ms}ms with no result")]
    Timeout { budget_ms: u64 },

    #[error("Unknown screening source: {0}")]
    UnknownSource(String),

    #[error("No enabled screening sources match the request")]
    NoSourcesSelected,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Screening task failed: {0}")]
    Internal(String),
}

/// Per-adapter failures. Always recovered by the orchestrator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Source {source_id} unavailable: {reason}")]
    Unavailable { source_id: String, reason: String },

    #[error("Source {source_id} returned an unparseable payload: {reason}")]
    Format { source_id: String, reason: String },
}

impl SourceError {
    pub fn unavailable(source_id: &str, reason: impl Into<String>) -> Self {
        SourceError::Unavailable {
            source_id: source_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn format(source_id: &str, reason: impl Into<String>) -> Self {
        SourceError::Format {
            source_id: source_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Network and timeout failures are worth retrying on the next cycle
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Unavailable { .. })
    }

    pub fn source_id(&self) -> &str {
        match self {
            SourceError::Unavailable { source_id, .. } | SourceError::Format { source_id, .. } => {
                source_id
            }
        }
    }
}

/// Cache backing-store failures. Logged and bypassed, never returned from `screen()`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScreeningError>;
