//! Error types for geosearch

use std::fmt;
use thiserror::Error;

/// Result type alias using geosearch's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a data source failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceErrorKind {
    /// Could not reach the database or the connection broke mid-query
    Connection,
    /// No pooled connection became available within the acquire timeout
    PoolTimeout,
    /// The statement exceeded the configured statement timeout
    Timeout,
    /// The database rejected the statement (syntax, missing table, ...)
    Statement,
    /// A result column was missing or had an unexpected type
    Decode,
    Other,
}

impl DataSourceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::PoolTimeout => "pool_timeout",
            Self::Timeout => "timeout",
            Self::Statement => "statement",
            Self::Decode => "decode",
            Self::Other => "other",
        }
    }

    /// Whether a retry of the same read-only statement may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection | Self::PoolTimeout | Self::Timeout)
    }
}

impl fmt::Display for DataSourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geosearch error types with helpful messages and suggestions
///
/// Every variant carries owned data only, so errors can be cloned out of a
/// coalesced cache computation and handed to every waiter.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Selection errors (E001-E099)
    #[error("Search type '{0}' not found. Run `geosearch types` to see all search types.")]
    UnknownSearchType(String),

    #[error("Invalid search type selection: {0}")]
    InvalidSelection(String),

    #[error("Search query is empty")]
    EmptyQuery,

    // Definition errors (E100-E199)
    #[error("Incompatible projection: {0}")]
    IncompatibleProjection(String),

    #[error("Invalid search definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error("Formatter '{0}' not found. Built-in formatters: tokenized_full_text, fuzzy_wildcard, exact.")]
    UnknownFormatter(String),

    // Data source errors (E400-E499)
    #[error("Data source error ({kind}): {message}")]
    DataSource {
        kind: DataSourceErrorKind,
        message: String,
    },

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn data_source(kind: DataSourceErrorKind, message: impl Into<String>) -> Self {
        Self::DataSource {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_definition(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownSearchType(_) => "E001",
            Self::InvalidSelection(_) => "E002",
            Self::EmptyQuery => "E003",
            Self::IncompatibleProjection(_) => "E100",
            Self::InvalidDefinition { .. } => "E101",
            Self::UnknownFormatter(_) => "E102",
            Self::DataSource { .. } => "E400",
            Self::Config(_) => "E600",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::UnknownSearchType(_) => Some("geosearch types".to_string()),
            Self::IncompatibleProjection(_) => {
                Some("Give every search type the roles id, type, label, lng, lat, pid, address".to_string())
            }
            Self::DataSource { kind, .. } if kind.is_transient() => {
                Some("Check database connectivity and retry".to_string())
            }
            Self::Config(_) => Some("geosearch config path".to_string()),
            _ => None,
        }
    }

    /// Whether the engine may retry the operation that produced this error
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DataSource { kind, .. } if kind.is_transient())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::PoolTimedOut => DataSourceErrorKind::PoolTimeout,
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DataSourceErrorKind::Connection,
            sqlx::Error::Database(_) => DataSourceErrorKind::Statement,
            sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => DataSourceErrorKind::Decode,
            _ => DataSourceErrorKind::Other,
        };
        Self::data_source(kind, err.to_string())
    }
}
