//! Geosearch Core Library
//!
//! This crate provides a configuration-driven multi-table search engine for
//! geospatial lookups, including:
//! - Search registry (named search types loaded from configuration)
//! - Query formatting policies (full-text, fuzzy wildcard, exact)
//! - Union query composition with bound parameters
//! - TTL result caching with a uniform cache-control directive
//! - Pooled SQL execution (SQLite or PostgreSQL via sqlx)

pub mod cache;
pub mod composer;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod formatter;
pub mod registry;
pub mod row;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{CacheDirective, CachePrivacy};
    pub use crate::composer::{ComposedQuery, Dialect};
    pub use crate::config::Config;
    pub use crate::engine::{SearchEngine, SearchResponse};
    pub use crate::error::{Error, Result};
    pub use crate::row::ResultRow;
}
