//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite cache key
///
/// Either a plain string or an ordered tuple whose first element is the
/// feature namespace. Keys compare structurally: two tuple keys are equal
/// only when every element matches positionally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheKey {
    /// Single string key, e.g. `links-top-view`
    Plain(String),

    /// Ordered tuple: namespace, discriminator, parameters...
    Tuple(Vec<String>),
}

impl CacheKey {
    /// Create a plain string key
    pub fn plain(key: impl Into<String>) -> Self {
        CacheKey::Plain(key.into())
    }

    /// Create a tuple key from its parts
    pub fn tuple<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CacheKey::Tuple(parts.into_iter().map(Into::into).collect())
    }

    /// Start building a tuple key in the given namespace
    pub fn builder(namespace: impl Into<String>) -> CacheKeyBuilder {
        CacheKeyBuilder::new(namespace)
    }

    /// Feature namespace: the plain string itself or the first tuple element
    pub fn namespace(&self) -> &str {
        match self {
            CacheKey::Plain(s) => s,
            CacheKey::Tuple(parts) => parts.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// All elements of the key in order
    pub fn segments(&self) -> Vec<&str> {
        match self {
            CacheKey::Plain(s) => vec![s.as_str()],
            CacheKey::Tuple(parts) => parts.iter().map(String::as_str).collect(),
        }
    }

    /// Check whether any element equals `segment`
    pub fn has_segment(&self, segment: &str) -> bool {
        self.segments().iter().any(|s| *s == segment)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Plain(s) => write!(f, "{}", s),
            CacheKey::Tuple(parts) => write!(f, "[{}]", parts.join(", ")),
        }
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        CacheKey::Plain(s.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        CacheKey::Plain(s)
    }
}

/// Builder for tuple cache keys
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    parts: Vec<String>,
}

impl CacheKeyBuilder {
    /// Create a new builder with the namespace as first element
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            parts: vec![namespace.into()],
        }
    }

    /// Append an element to the key
    pub fn segment(mut self, segment: impl fmt::Display) -> Self {
        self.parts.push(segment.to_string());
        self
    }

    /// Build the cache key
    pub fn build(self) -> CacheKey {
        CacheKey::Tuple(self.parts)
    }
}

/// Notification delivered to the subscribers of a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheEvent {
    /// A new value was stored
    Updated { key: CacheKey, version: u64 },

    /// The producer failed; the previous value, if any, is still held
    Failed { key: CacheKey, message: String },

    /// The entry was marked stale
    Invalidated { key: CacheKey },

    /// The entry was dropped from the cache
    Removed { key: CacheKey },
}

impl CacheEvent {
    /// Key the event refers to
    pub fn key(&self) -> &CacheKey {
        match self {
            CacheEvent::Updated { key, .. }
            | CacheEvent::Failed { key, .. }
            | CacheEvent::Invalidated { key }
            | CacheEvent::Removed { key } => key,
        }
    }
}

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered from a fresh entry
    pub hits: u64,

    /// Reads that had to run (or join) a producer
    pub misses: u64,

    /// Number of producer invocations
    pub producer_calls: u64,

    /// Reads that joined an in-flight producer call
    pub coalesced: u64,

    /// Reads answered from the entry because of the deduping interval
    pub deduplicated: u64,

    /// Number of entries marked stale
    pub invalidations: u64,

    /// Number of failed producer calls
    pub errors: u64,

    /// Entries dropped by garbage collection or the entry limit
    pub evictions: u64,

    /// Number of entries currently in cache
    pub entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, producer_calls: {}, \
             coalesced: {}, invalidations: {}, errors: {}, entries: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.producer_calls,
            self.coalesced,
            self.invalidations,
            self.errors,
            self.entries
        )
    }
}
