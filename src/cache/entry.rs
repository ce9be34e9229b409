//! Cache entry: last good value, stale flag, and the subscribers of one key

use crate::cache::config::ReadOptions;
use crate::cache::types::{CacheEvent, CacheKey};
use crate::error::{LinkSwipeError, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Type-erased producer remembered by an entry so it can be revalidated
/// without the original caller
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A cache entry
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// Last successfully fetched value
    pub value: Option<Value>,

    /// Error from the most recent producer call, cleared on success
    pub error: Option<Arc<LinkSwipeError>>,

    /// Marked by invalidation; cleared by a successful fetch
    pub stale: bool,

    /// Policies registered by the most recent read
    pub options: ReadOptions,

    /// Entry metadata
    pub metadata: CacheMetadata,

    pub(crate) fetcher: Option<Fetcher>,

    events: broadcast::Sender<CacheEvent>,
}

impl CacheEntry {
    /// Create an empty entry for `key`
    pub fn new(key: CacheKey, options: ReadOptions, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));

        Self {
            key,
            value: None,
            error: None,
            stale: false,
            options,
            metadata: CacheMetadata::new(),
            fetcher: None,
            events,
        }
    }

    /// Entry holds a value that may be served without refetching
    pub fn is_fresh(&self) -> bool {
        self.value.is_some() && !self.stale
    }

    /// Number of mounted subscribers
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// At least one subscriber is mounted
    pub fn is_mounted(&self) -> bool {
        self.subscriber_count() > 0
    }

    /// A producer call started less than `deduping_interval` ago
    pub fn within_dedup_window(&self, now: Instant) -> bool {
        match self.metadata.last_fetch_at {
            Some(started) => now.duration_since(started) < self.options.deduping_interval,
            None => false,
        }
    }

    /// Replace the value after a successful fetch or local mutation
    pub fn store_value(&mut self, value: Value) -> u64 {
        self.value = Some(value);
        self.error = None;
        self.stale = false;
        self.metadata.updated_at = Some(Utc::now());
        self.metadata.version += 1;
        self.metadata.version
    }

    /// Record a failed fetch; the previous value stays available
    pub fn store_error(&mut self, error: Arc<LinkSwipeError>) {
        self.error = Some(error);
    }

    /// Mark the entry stale and forget the dedup window so the next read refetches
    ///
    /// A producer call already in flight no longer counts: its result is dropped.
    pub fn mark_stale(&mut self) {
        self.stale = true;
        self.metadata.last_fetch_at = None;
        self.metadata.current_fetch = None;
    }

    /// Mark the entry as read
    pub fn mark_accessed(&mut self) {
        self.metadata.accessed_at = Instant::now();
        self.metadata.access_count += 1;
    }

    /// Time since the entry was last read
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(self.metadata.accessed_at)
    }

    /// Subscribe to this entry's events
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Notify subscribers; no-op when nobody is mounted
    pub(crate) fn notify(&self, event: CacheEvent) {
        let _ = self.events.send(event);
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("has_value", &self.value.is_some())
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .field("stale", &self.stale)
            .field("subscribers", &self.subscriber_count())
            .field("version", &self.metadata.version)
            .finish()
    }
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone)]
pub struct CacheMetadata {
    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// When the value was last replaced
    pub updated_at: Option<DateTime<Utc>>,

    /// Last read (for eviction and cleanup)
    pub accessed_at: Instant,

    /// Start of the most recent producer call
    pub last_fetch_at: Option<Instant>,

    /// Id of the producer call whose result will be accepted
    pub current_fetch: Option<u64>,

    /// Invalidated while a call was in flight; one follow-up call is owed
    pub refetch_pending: bool,

    /// Number of reads
    pub access_count: u64,

    /// Version number (incremented on every stored value)
    pub version: u64,
}

impl CacheMetadata {
    fn new() -> Self {
        Self {
            created_at: Utc::now(),
            updated_at: None,
            accessed_at: Instant::now(),
            last_fetch_at: None,
            current_fetch: None,
            refetch_pending: false,
            access_count: 0,
            version: 0,
        }
    }
}
