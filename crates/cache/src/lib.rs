//! In-memory query cache.
//!
//! Results of federated queries are stored under a key derived from the
//! operation name and its filters, each with a time-to-live and an optional
//! set of *tags*: the aliases of the sources the result was computed from.
//!
//! An entry with no tags is treated as depending on every source, so any
//! source change evicts it. Expiry is lazy: an expired entry is dropped the
//! next time it is read, or by an explicit [`QueryCache::cleanup`].
//!
//! The cache is a plain structure; share it between tasks as a
//! [`SharedQueryCache`].

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default time-to-live for entries stored without an explicit one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Thread-safe shared handle to a cache.
pub type SharedQueryCache = Arc<Mutex<QueryCache>>;

type Payload = Arc<dyn Any + Send + Sync>;

#[derive(Debug)]
struct Entry {
    payload: Payload,
    created_at: Instant,
    ttl: Duration,
    tags: Vec<String>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }

    fn depends_on<S: AsRef<str>>(&self, aliases: &[S]) -> bool {
        self.tags.is_empty() || self.tags.iter().any(|tag| aliases.iter().any(|alias| alias.as_ref() == tag))
    }
}

/// Options for [`QueryCache::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Overrides the cache's default time-to-live.
    pub ttl: Option<Duration>,
    /// Source aliases the value was computed from. Empty means "all of them".
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn tagged<S: Into<String>>(tags: impl IntoIterator<Item = S>) -> Self {
        Self {
            ttl: None,
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or zero before the first lookup.
    pub hit_rate: f64,
}

#[derive(Debug)]
pub struct QueryCache {
    entries: HashMap<String, Entry>,
    default_ttl: Duration,
    hits: u64,
    misses: u64,
    generation: u64,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

/// Build the cache key for `operation` with the given filters.
///
/// Filters are serialized through [`serde_json::Value`], whose objects keep
/// their keys sorted, so two filter sets holding the same values always give
/// the same key regardless of field or insertion order. `None`, unit, and
/// objects with no fields collapse to the bare operation name.
pub fn make_key<F: Serialize + ?Sized>(operation: &str, filters: &F) -> Result<String> {
    let value = serde_json::to_value(filters).or_raise(|| ErrorKind::Key(operation.to_string()))?;
    Ok(match &value {
        Value::Null => operation.to_string(),
        Value::Object(map) if map.is_empty() => operation.to_string(),
        _ => format!("{operation}:{value}"),
    })
}

impl QueryCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            default_ttl,
            hits: 0,
            misses: 0,
            generation: 0,
        }
    }

    pub fn shared(default_ttl: Duration) -> SharedQueryCache {
        Arc::new(Mutex::new(Self::new(default_ttl)))
    }

    /// Look up a live entry of type `T`, counting a hit or a miss.
    ///
    /// Expired entries are evicted on the way. An entry holding some other
    /// type is a miss, but is left in place.
    pub fn get<T: Any + Send + Sync>(&mut self, key: &str) -> Option<Arc<T>> {
        let now = Instant::now();
        let Some(entry) = self.entries.get(key) else {
            self.misses += 1;
            return None;
        };
        if entry.is_expired(now) {
            self.entries.remove(key);
            self.misses += 1;
            return None;
        }
        match Arc::clone(&entry.payload).downcast::<T>() {
            Ok(value) => {
                self.hits += 1;
                Some(value)
            },
            Err(_) => {
                tracing::warn!(key, "Cached value has an unexpected type");
                self.misses += 1;
                None
            },
        }
    }

    /// Is there a live entry under `key`? Does not affect hit/miss counters.
    pub fn has(&mut self, key: &str) -> bool {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                self.entries.remove(key);
                false
            },
            Some(_) => true,
            None => false,
        }
    }

    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T, options: SetOptions) -> Arc<T> {
        let value = Arc::new(value);
        let entry = Entry {
            payload: value.clone(),
            created_at: Instant::now(),
            ttl: options.ttl.unwrap_or(self.default_ttl),
            tags: options.tags,
        };
        self.entries.insert(key.into(), entry);
        value
    }

    /// Invalidation counter, bumped by every invalidation and by [`clear`].
    ///
    /// Read it before computing a value and hand it to [`set_if_current`] so
    /// a value computed across an invalidation is never stored.
    ///
    /// [`clear`]: QueryCache::clear
    /// [`set_if_current`]: QueryCache::set_if_current
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Like [`set`](QueryCache::set), but only stores the value if no
    /// invalidation happened since `generation` was read. The value is
    /// returned either way.
    pub fn set_if_current<T: Any + Send + Sync>(
        &mut self,
        key: impl Into<String>,
        value: T,
        options: SetOptions,
        generation: u64,
    ) -> Arc<T> {
        if generation != self.generation {
            let key = key.into();
            tracing::debug!(key, "Cache invalidated while computing, not storing");
            return Arc::new(value);
        }
        self.set(key, value, options)
    }

    /// Evict every entry that depends on any of `aliases`: those tagged with
    /// one of them and those with no tags at all. Returns the eviction count.
    ///
    /// An empty alias list evicts nothing.
    pub fn invalidate_by_source<S: AsRef<str>>(&mut self, aliases: &[S]) -> usize {
        if aliases.is_empty() {
            return 0;
        }
        self.generation += 1;
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.depends_on(aliases));
        let evicted = before - self.entries.len();
        tracing::debug!(evicted, "Invalidated cache entries by source");
        evicted
    }

    /// Evict every entry whose key starts with `prefix`, regardless of tags.
    pub fn invalidate_by_prefix(&mut self, prefix: &str) -> usize {
        self.generation += 1;
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before - self.entries.len()
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry and reset the hit/miss counters.
    pub fn clear(&mut self) {
        self.generation += 1;
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }

    /// Sweep all expired entries, returning how many were dropped.
    pub fn cleanup(&mut self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        CacheStats {
            size: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            hit_rate: if total > 0 { self.hits as f64 / total as f64 } else { 0.0 },
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Change the ttl used for subsequent entries. Existing entries keep the
    /// ttl they were stored with.
    pub fn set_default_ttl(&mut self, ttl: Duration) {
        self.default_ttl = ttl;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
