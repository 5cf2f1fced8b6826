//! Error types for rule loading and validation.

/// Errors that can occur while loading, parsing, or validating rules.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse/deserialization error.
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Malformed rule definition; the rule is never scheduled.
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem watcher error.
    #[error("watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// Backend query failure while test-running a rule.
    #[error(transparent)]
    Query(#[from] crate::reader::QueryError),
}

/// Result alias for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;
