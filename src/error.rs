//! Error kinds shared across the indexing core.
//!
//! Library components never let a raw backend error cross a module boundary:
//! everything surfaces as one of the four tagged kinds below. Binaries wrap
//! these in `eyre` at the edge.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = IndexError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum IndexError {
    /// A required parameter is missing or malformed.
    #[error("invalid parameter `{param}`: {reason}")]
    Validation { param: &'static str, reason: String },

    /// The authoritative store or a node RPC call failed.
    #[error("source fetch failed: {0}")]
    SourceFetch(String),

    /// No shard assignment exists for a natural key that a write needs.
    #[error("no shard assignment for `{0}`")]
    ShardNotFound(String),

    /// A cache write failed. Never fatal; logged and swallowed at the point
    /// of occurrence, carried here only for the log message.
    #[error("cache write failed: {0}")]
    CacheWrite(String),
}

impl IndexError {
    pub fn validation(param: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            param,
            reason: reason.into(),
        }
    }

    pub fn source(reason: impl Into<String>) -> Self {
        Self::SourceFetch(reason.into())
    }

    /// Machine-readable identifier for service-boundary callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::SourceFetch(_) => "SOURCE_FETCH_ERROR",
            Self::ShardNotFound(_) => "SHARD_NOT_FOUND",
            Self::CacheWrite(_) => "CACHE_WRITE_ERROR",
        }
    }
}
