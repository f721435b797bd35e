//! Error types for taskloom

use crate::ids::ActivityId;
use thiserror::Error;

/// Taskloom error types
#[derive(Error, Debug)]
pub enum LoomError {
    /// A registered callable has no declared return type
    #[error("no return type was declared for task '{symbol}'")]
    MissingTypeHint { symbol: String },

    /// Upstream output does not satisfy downstream inputs
    #[error("output of '{upstream}' is incompatible with inputs of '{downstream}': {detail}")]
    Compatibility {
        upstream: String,
        downstream: String,
        detail: String,
    },

    /// A dependency reference could not be resolved
    #[error("dependency error: {0}")]
    Dependency(String),

    /// The composed graph contains a cycle
    #[error("circular dependency detected: {0}")]
    CircularDependency(String),

    /// Name lookup failure
    #[error("'{0}' was not found in the DAG")]
    NotFound(String),

    /// A symbol is not present in the task registry
    #[error("task symbol '{symbol}' is not registered")]
    UnknownSymbol { symbol: String },

    /// An activity's callable raised during execution
    #[error("activity '{name}' with id '{id}' failed: {cause}")]
    ActivityFailed {
        name: String,
        id: ActivityId,
        cause: anyhow::Error,
    },

    /// Registration name rejected (path safety, charset, length)
    #[error("invalid job name '{0}': only alphanumeric, underscore, and dash allowed")]
    InvalidJobName(String),

    /// A timed queue operation elapsed
    #[error("queue operation timed out after {0:?}")]
    QueueTimeout(std::time::Duration),

    /// Snapshot encode/decode errors
    #[error("snapshot serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Configuration errors
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Periodic trigger errors
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias using LoomError
pub type Result<T> = std::result::Result<T, LoomError>;
