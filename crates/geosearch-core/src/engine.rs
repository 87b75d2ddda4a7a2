//! Search engine
//!
//! Ties the registry, composer, cache and executor together behind the
//! `search` / `list_search_types` surface used by the CLI and any HTTP layer.

use crate::cache::{CacheDirective, CacheKey, SearchCache};
use crate::composer::{ComposedQuery, QueryComposer};
use crate::config::{Config, EngineSettings};
use crate::error::{Error, Result};
use crate::executor::{SearchExecutor, SqlExecutor};
use crate::formatter::FormatterCatalog;
use crate::registry::SearchRegistry;
use crate::row::ResultRow;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Engine behaviour knobs
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Reject queries that are empty after trimming with `EmptyQuery`
    pub reject_empty_query: bool,
    /// Retries after the first attempt on transient data source errors
    pub retry_attempts: u32,
    /// Backoff before the first retry, doubled on each further retry
    pub retry_backoff: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&EngineSettings::default())
    }
}

impl From<&EngineSettings> for EngineOptions {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            reject_empty_query: settings.reject_empty_query,
            retry_attempts: settings.retry_attempts,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
        }
    }
}

/// Rows for one search together with the caching directive to publish
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub rows: Arc<Vec<ResultRow>>,
    pub cache: CacheDirective,
    /// Whether the rows came from the cache
    pub cached: bool,
    pub expires_at: DateTime<Utc>,
}

/// Registry in effect together with its generation
#[derive(Debug, Clone)]
struct RegistrySnapshot {
    registry: Arc<SearchRegistry>,
    /// Bumped on every reload; scopes cache keys
    generation: u64,
}

/// Configuration-driven multi-table search
pub struct SearchEngine {
    current: RwLock<RegistrySnapshot>,
    composer: QueryComposer,
    cache: SearchCache,
    executor: Arc<dyn SearchExecutor>,
    options: EngineOptions,
}

impl fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchEngine")
            .field("search_types", &self.list_search_types())
            .field("dialect", &self.composer.dialect())
            .field("cache", &self.cache)
            .field("options", &self.options)
            .finish()
    }
}

impl SearchEngine {
    /// Create an engine; the composer targets the executor's dialect
    pub fn new(
        registry: SearchRegistry,
        executor: Arc<dyn SearchExecutor>,
        cache: SearchCache,
    ) -> Self {
        Self {
            current: RwLock::new(RegistrySnapshot {
                registry: Arc::new(registry),
                generation: 0,
            }),
            composer: QueryComposer::new(executor.dialect()),
            cache,
            executor,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the registry, connect the database and size the cache from `config`
    pub async fn from_config(config: &Config) -> Result<Self> {
        let registry = config.registry(&FormatterCatalog::builtin())?;
        let executor = SqlExecutor::connect(&config.database.to_database_config()).await?;
        let cache = SearchCache::new(config.cache.directive(), config.cache.max_capacity);

        Ok(Self::new(registry, Arc::new(executor), cache)
            .with_options(EngineOptions::from(&config.engine)))
    }

    /// Snapshot of the current registry
    pub fn registry(&self) -> Arc<SearchRegistry> {
        self.current.read().registry.clone()
    }

    /// Number of reloads applied so far
    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }

    /// Registered search-type names in lexicographic order
    pub fn list_search_types(&self) -> Vec<String> {
        self.registry().all()
    }

    /// Compose the statement a search would run, without executing it
    pub fn explain<S: AsRef<str>>(&self, selected: &[S], raw_query: &str) -> Result<ComposedQuery> {
        self.check_query(raw_query)?;
        self.composer.compose(&self.registry(), selected, raw_query)
    }

    /// Run a search over the selected types
    ///
    /// Selection and projection errors are raised before any cache or
    /// database access. A union either fully succeeds or fully fails.
    pub async fn search<S: AsRef<str>>(
        &self,
        selected: &[S],
        raw_query: &str,
    ) -> Result<SearchResponse> {
        self.check_query(raw_query)?;
        let snapshot = self.current.read().clone();
        let composed = self
            .composer
            .compose(&snapshot.registry, selected, raw_query)?;
        let key = CacheKey::new(selected, raw_query).with_generation(snapshot.generation);

        let executor = self.executor.as_ref();
        let options = &self.options;
        let lookup = self
            .cache
            .get_or_compute(key, || execute_with_retry(executor, &composed, options))
            .await?;

        info!(
            search_types = ?composed.search_types,
            cache_hit = lookup.hit,
            row_count = lookup.entry.rows.len(),
            "Search completed"
        );

        Ok(SearchResponse {
            rows: lookup.entry.rows.clone(),
            cache: self.cache.directive(),
            cached: lookup.hit,
            expires_at: lookup.entry.expires_at,
        })
    }

    /// Replace the registry and drop results cached under the old one
    ///
    /// Searches still running against the old registry may finish after the
    /// swap; their results land under the old generation and are never
    /// served again.
    pub fn reload(&self, registry: SearchRegistry) {
        let search_types = registry.len();
        let generation = {
            let mut current = self.current.write();
            current.generation += 1;
            current.registry = Arc::new(registry);
            current.generation
        };
        self.cache.invalidate_all();
        info!(search_types, generation, "Search registry reloaded");
    }

    fn check_query(&self, raw_query: &str) -> Result<()> {
        if self.options.reject_empty_query && raw_query.trim().is_empty() {
            return Err(Error::EmptyQuery);
        }
        Ok(())
    }
}

/// Execute, retrying transient data source failures with exponential backoff
async fn execute_with_retry(
    executor: &dyn SearchExecutor,
    query: &ComposedQuery,
    options: &EngineOptions,
) -> Result<Vec<ResultRow>> {
    let mut attempts = 0;

    loop {
        attempts += 1;

        match executor.execute(query).await {
            Ok(rows) => return Ok(rows),
            Err(e) if e.is_transient() && attempts <= options.retry_attempts => {
                let backoff = calculate_backoff(options.retry_backoff, attempts);
                warn!(
                    attempt = attempts,
                    wait_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Transient data source error, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn calculate_backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}
