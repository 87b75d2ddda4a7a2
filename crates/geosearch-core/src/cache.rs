//! Result cache for composed searches
//!
//! Keys are derived from the sorted search-type selection plus the raw query
//! string. Entries live for a fixed TTL and are evicted lazily when read
//! after expiry (moka also sweeps them in the background).
//!
//! Concurrent misses on the same key are coalesced: one caller runs the
//! computation and the others wait for its result. Failed computations are
//! not cached.

use crate::error::{Error, Result};
use crate::row::ResultRow;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Default time-to-live for cached results
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Longest TTL accepted for cached results
pub const MAX_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default maximum number of cached result sets
pub const DEFAULT_MAX_CAPACITY: u64 = 10_000;

/// Who may cache a response downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePrivacy {
    /// Only the requesting client may cache
    #[default]
    Private,
    /// Shared caches may store the response
    Public,
}

impl CachePrivacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "private" => Some(Self::Private),
            "public" => Some(Self::Public),
            _ => None,
        }
    }
}

impl fmt::Display for CachePrivacy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caching directive applied uniformly to every response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheDirective {
    pub ttl: Duration,
    pub privacy: CachePrivacy,
}

impl CacheDirective {
    pub fn new(ttl: Duration, privacy: CachePrivacy) -> Self {
        Self { ttl, privacy }
    }

    /// Value for an HTTP `Cache-Control` header
    ///
    /// `max-age` is the TTL in whole seconds, rounded up.
    pub fn header_value(&self) -> String {
        format!(
            "{}, max-age={}",
            self.privacy,
            self.ttl.as_millis().div_ceil(1000)
        )
    }
}

impl Default for CacheDirective {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, CachePrivacy::default())
    }
}

/// Identity of a cached result set
///
/// The registry generation is part of the key, so results composed under a
/// replaced registry are never served for the current one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    search_types: Vec<String>,
    query: String,
    generation: u64,
}

impl CacheKey {
    /// Build a key from a selection (order-insensitive) and the raw query
    pub fn new<S: AsRef<str>>(selected: &[S], raw_query: &str) -> Self {
        let mut search_types: Vec<String> =
            selected.iter().map(|s| s.as_ref().to_string()).collect();
        search_types.sort();
        Self {
            search_types,
            query: raw_query.to_string(),
            generation: 0,
        }
    }

    /// Scope the key to a registry generation
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn search_types(&self) -> &[String] {
        &self.search_types
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:?}@{}",
            self.search_types.join(","),
            self.query,
            self.generation
        )
    }
}

/// A cached result set
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub rows: Arc<Vec<ResultRow>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, rows: Vec<ResultRow>, ttl: Duration) -> Self {
        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            key,
            rows: Arc::new(rows),
            created_at,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of a cache lookup
#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub entry: Arc<CacheEntry>,
    /// False when this call ran the computation
    pub hit: bool,
}

/// TTL cache of search results
#[derive(Clone)]
pub struct SearchCache {
    entries: Cache<CacheKey, Arc<CacheEntry>>,
    directive: CacheDirective,
}

impl fmt::Debug for SearchCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchCache")
            .field("directive", &self.directive)
            .field("entry_count", &self.entries.entry_count())
            .finish()
    }
}

impl SearchCache {
    /// Create a cache; a TTL above [`MAX_TTL`] is clamped to it
    pub fn new(mut directive: CacheDirective, max_capacity: u64) -> Self {
        if directive.ttl > MAX_TTL {
            warn!(
                ttl_ms = directive.ttl.as_millis() as u64,
                max_ttl_ms = MAX_TTL.as_millis() as u64,
                "Cache TTL clamped"
            );
            directive.ttl = MAX_TTL;
        }

        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(directive.ttl)
            .build();

        Self { entries, directive }
    }

    pub fn directive(&self) -> CacheDirective {
        self.directive
    }

    /// Return the fresh entry for `key`, running `compute` on a miss
    ///
    /// `compute` runs at most once per call and only when no fresh entry
    /// exists. Errors from `compute` are returned and nothing is cached.
    pub async fn get_or_compute<F, Fut>(&self, key: CacheKey, compute: F) -> Result<CacheLookup>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ResultRow>>>,
    {
        if let Some(entry) = self.entries.get(&key).await {
            if !entry.is_expired(Utc::now()) {
                debug!(key = %key, "Search cache hit");
                return Ok(CacheLookup { entry, hit: true });
            }
            debug!(key = %key, "Search cache entry expired");
            self.entries.invalidate(&key).await;
        }

        let computed = AtomicBool::new(false);
        let ttl = self.directive.ttl;
        let entry_key = key.clone();
        let init = async {
            computed.store(true, Ordering::Relaxed);
            let rows = compute().await?;
            Ok::<_, Error>(Arc::new(CacheEntry::new(entry_key, rows, ttl)))
        };

        let entry = self
            .entries
            .try_get_with(key.clone(), init)
            .await
            .map_err(|err| (*err).clone())?;

        let hit = !computed.load(Ordering::Relaxed);
        debug!(key = %key, coalesced = hit, rows = entry.rows.len(), "Search cache populated");
        Ok(CacheLookup { entry, hit })
    }

    /// Fresh entry for `key`, without computing
    pub async fn peek(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.entries
            .get(key)
            .await
            .filter(|entry| !entry.is_expired(Utc::now()))
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        self.entries.invalidate(key).await;
    }

    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }

    /// Approximate number of live entries
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataSourceErrorKind;
    use std::sync::atomic::AtomicUsize;

    fn rows(label: &str) -> Vec<ResultRow> {
        vec![ResultRow::new("1", "PARK", label, -80.8, 35.2)]
    }

    fn cache(ttl: Duration) -> SearchCache {
        SearchCache::new(CacheDirective::new(ttl, CachePrivacy::Private), 100)
    }

    #[test]
    fn test_cache_key_ignores_selection_order() {
        let a = CacheKey::new(&["pid", "address"], "123");
        let b = CacheKey::new(&["address", "pid"], "123");
        assert_eq!(a, b);
        assert_eq!(a.search_types(), ["address", "pid"]);
        assert_ne!(a, CacheKey::new(&["address", "pid"], "123 "));
    }

    #[test]
    fn test_directive_header() {
        let directive = CacheDirective::new(Duration::from_millis(30_000), CachePrivacy::Private);
        assert_eq!(directive.header_value(), "private, max-age=30");
        assert_eq!(CachePrivacy::parse("PUBLIC"), Some(CachePrivacy::Public));
        assert_eq!(CachePrivacy::parse("shared"), None);
    }

    #[test]
    fn test_header_max_age_rounds_up() {
        let header = |ms| CacheDirective::new(Duration::from_millis(ms), CachePrivacy::Public).header_value();
        assert_eq!(header(500), "public, max-age=1");
        assert_eq!(header(1_999), "public, max-age=2");
        assert_eq!(header(2_000), "public, max-age=2");
        assert_eq!(header(0), "public, max-age=0");
    }

    #[test]
    fn test_generation_is_part_of_key() {
        let current = CacheKey::new(&["pid"], "42");
        let next = current.clone().with_generation(1);
        assert_eq!(current.generation(), 0);
        assert_ne!(current, next);
    }

    #[test]
    fn test_oversized_ttl_is_clamped() {
        let directive = CacheDirective::new(Duration::from_millis(u64::MAX), CachePrivacy::Private);
        let cache = SearchCache::new(directive, 10);
        assert_eq!(cache.directive().ttl, MAX_TTL);
    }

    #[test]
    fn test_entry_expiry() {
        let entry = CacheEntry::new(
            CacheKey::new(&["park"], "x"),
            Vec::new(),
            Duration::from_secs(30),
        );
        assert!(!entry.is_expired(entry.created_at));
        assert!(entry.is_expired(entry.created_at + chrono::Duration::seconds(30)));
    }

    #[tokio::test]
    async fn test_second_call_within_ttl_does_not_compute() {
        let cache = cache(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        let key = CacheKey::new(&["park"], "freedom");

        let first = cache
            .get_or_compute(key.clone(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(rows("Freedom Park"))
            })
            .await
            .expect("first lookup");
        let second = cache
            .get_or_compute(key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(rows("Other"))
            })
            .await
            .expect("second lookup");

        assert!(!first.hit);
        assert!(second.hit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.entry.rows, second.entry.rows);
    }

    #[tokio::test]
    async fn test_expired_entry_is_recomputed() {
        let cache = cache(Duration::from_millis(50));
        let calls = AtomicUsize::new(0);
        let key = CacheKey::new(&["park"], "freedom");

        cache
            .get_or_compute(key.clone(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(rows("Stale"))
            })
            .await
            .expect("first lookup");

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.peek(&key).await.is_none());

        let fresh = cache
            .get_or_compute(key, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(rows("Fresh"))
            })
            .await
            .expect("second lookup");

        assert!(!fresh.hit);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(fresh.entry.rows[0].label, "Fresh");
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = cache(Duration::from_secs(60));
        let key = CacheKey::new(&["park"], "x");

        let err = cache
            .get_or_compute(key.clone(), || async {
                Err(Error::data_source(DataSourceErrorKind::Connection, "refused"))
            })
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(cache.peek(&key).await.is_none());

        let ok = cache
            .get_or_compute(key, || async { Ok(rows("Recovered")) })
            .await
            .expect("retry after failure");
        assert!(!ok.hit);
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce() {
        let cache = cache(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new(&["park"], "slow");

        let lookup = |cache: SearchCache, calls: Arc<AtomicUsize>, key: CacheKey| async move {
            cache
                .get_or_compute(key, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(rows("Slow Park"))
                })
                .await
        };

        let (a, b) = tokio::join!(
            lookup(cache.clone(), calls.clone(), key.clone()),
            lookup(cache.clone(), calls.clone(), key.clone()),
        );

        let a = a.expect("first waiter");
        let b = b.expect("second waiter");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.entry.rows, b.entry.rows);
        assert!(a.hit != b.hit);
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache = cache(Duration::from_secs(60));
        let key = CacheKey::new(&["park"], "x");
        cache
            .get_or_compute(key.clone(), || async { Ok(rows("A")) })
            .await
            .expect("populate");

        cache.invalidate_all();
        assert!(cache.peek(&key).await.is_none());
    }
}
