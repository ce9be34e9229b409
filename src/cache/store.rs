//! Keyed request cache with coalescing, deduplication and revalidation

use crate::cache::{
    config::{CacheConfig, ReadOptions},
    entry::{CacheEntry, Fetcher},
    invalidation::{InvalidationEvent, InvalidationReason, KeyMatcher},
    types::{CacheEvent, CacheKey, CacheStats},
};
use crate::error::{LinkSwipeError, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type FetchOutcome = std::result::Result<Value, Arc<LinkSwipeError>>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Bound on how many superseding fetches a single read follows
const MAX_FOLLOW_UPS: usize = 3;

/// What a view sees for one key
#[derive(Debug, Clone)]
pub struct ReadState<T> {
    /// Last successfully fetched value
    pub value: Option<T>,

    /// A producer call for the key is in flight
    pub is_loading: bool,

    /// Error from the most recent producer call
    pub error: Option<Arc<LinkSwipeError>>,
}

impl<T> ReadState<T> {
    fn empty() -> Self {
        Self {
            value: None,
            is_loading: false,
            error: None,
        }
    }

    /// Whether the most recent fetch failed
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Handle of a mounted view; dropping it unmounts the view
#[derive(Debug)]
pub struct Subscription {
    key: CacheKey,
    rx: broadcast::Receiver<CacheEvent>,
}

impl Subscription {
    /// Key this subscription watches
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Wait for the next event; `None` once the entry has been removed
    pub async fn recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Subscriber for {} skipped {} events", self.key, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-delivered event, if any
    pub fn try_recv(&mut self) -> Option<CacheEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Keyed cache owning every entry, in-flight call and subscriber
///
/// - At most one producer call per key is in flight; concurrent reads join it
/// - A failed call keeps the previous value and surfaces the error
/// - Invalidation marks entries stale; mounted entries refetch per their options
///
/// Cloning is cheap and yields a handle to the same cache.
#[derive(Clone)]
pub struct KeyedCache {
    pub(crate) config: Arc<CacheConfig>,

    store: Arc<RwLock<CacheStore>>,
}

/// Internal cache storage
struct CacheStore {
    entries: HashMap<CacheKey, CacheEntry>,

    /// In-flight producer calls, tagged with their fetch id
    inflight: HashMap<CacheKey, (u64, SharedFetch)>,

    next_fetch_id: u64,

    counters: Counters,
}

/// Statistics, recorded only when metrics are enabled
struct Counters {
    enabled: bool,
    stats: CacheStats,
}

impl Counters {
    fn record(&mut self, update: impl FnOnce(&mut CacheStats)) {
        if self.enabled {
            update(&mut self.stats);
        }
    }
}

impl KeyedCache {
    /// Create a new cache with the given configuration
    ///
    /// Fails with `ConfigError` when the configuration does not validate.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate().map_err(LinkSwipeError::ConfigError)?;
        info!("Initializing keyed cache with config: {:?}", config);

        let store = CacheStore {
            entries: HashMap::new(),
            inflight: HashMap::new(),
            next_fetch_id: 1,
            counters: Counters {
                enabled: config.enable_metrics,
                stats: CacheStats::default(),
            },
        };

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(RwLock::new(store)),
        })
    }

    /// Cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Options used by reads that don't bring their own
    pub fn default_options(&self) -> ReadOptions {
        self.config.default_options.clone()
    }

    /// Read `key`, running `producer` only when the entry is missing or stale
    ///
    /// A fresh entry is returned as is. If a call for the key is already in
    /// flight, this read waits for that call instead of starting another. The
    /// producer is remembered so invalidation, focus and reconnect can refetch
    /// the key for mounted subscribers.
    pub async fn read<T, F, Fut>(
        &self,
        key: &CacheKey,
        producer: F,
        options: ReadOptions,
    ) -> ReadState<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let fetcher: Fetcher = Arc::new(move || {
            let fut = producer();
            async move {
                let value = fut.await?;
                serde_json::to_value(value).map_err(LinkSwipeError::from)
            }
            .boxed()
        });

        let pending = {
            let mut guard = self.store.write().await;
            let store = &mut *guard;

            if !store.entries.contains_key(key) {
                self.ensure_capacity(store);
            }

            let capacity = self.config.event_capacity;
            let entry = store
                .entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(key.clone(), options.clone(), capacity));
            entry.options = options;
            entry.fetcher = Some(fetcher);
            entry.mark_accessed();

            if entry.is_fresh() {
                debug!("Cache hit: {}", key);
                store.counters.record(|s| s.hits += 1);
                return Self::state_of(entry, false);
            }

            store.counters.record(|s| s.misses += 1);

            if let Some((_, shared)) = store.inflight.get(key) {
                debug!("Joining in-flight fetch: {}", key);
                store.counters.record(|s| s.coalesced += 1);
                shared.clone()
            } else if entry.within_dedup_window(Instant::now())
                && (entry.value.is_some() || entry.error.is_some())
            {
                debug!("Deduplicated read: {}", key);
                store.counters.record(|s| s.deduplicated += 1);
                return Self::state_of(entry, false);
            } else {
                match self.start_fetch(store, key) {
                    Some(shared) => shared,
                    None => return ReadState::empty(),
                }
            }
        };

        self.await_fetch(key, pending).await
    }

    /// Current state of `key` without fetching
    pub async fn peek<T: DeserializeOwned>(&self, key: &CacheKey) -> ReadState<T> {
        let store = self.store.read().await;
        match store.entries.get(key) {
            Some(entry) => Self::state_of(entry, store.inflight.contains_key(key)),
            None => ReadState::empty(),
        }
    }

    /// Mount a view on `key`
    pub async fn subscribe(&self, key: &CacheKey) -> Subscription {
        let mut guard = self.store.write().await;
        let store = &mut *guard;

        if !store.entries.contains_key(key) {
            self.ensure_capacity(store);
        }

        let capacity = self.config.event_capacity;
        let options = self.config.default_options.clone();
        let entry = store
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(key.clone(), options, capacity));

        debug!("Subscriber mounted on {} ({} total)", key, entry.subscriber_count() + 1);

        Subscription {
            key: key.clone(),
            rx: entry.subscribe(),
        }
    }

    /// Refetch `key` with its remembered producer and wait for the result
    ///
    /// Joins a call already in flight. Returns `false` when the key has no
    /// producer to run.
    pub async fn revalidate(&self, key: &CacheKey) -> bool {
        let pending = {
            let mut guard = self.store.write().await;
            self.begin_revalidate(&mut guard, key)
        };

        match pending {
            Some(shared) => {
                let _ = self.settle(key, shared).await;
                true
            }
            None => false,
        }
    }

    /// Mark every entry selected by `target` stale
    ///
    /// Mounted entries whose options have `revalidate_if_stale` refetch in
    /// the background; the rest wait for their next read.
    pub async fn invalidate(&self, target: impl Into<KeyMatcher>) -> InvalidationEvent {
        self.invalidate_with_reason(target.into(), InvalidationReason::Manual)
            .await
    }

    /// `invalidate` with an explicit reason for the record
    pub async fn invalidate_with_reason(
        &self,
        matcher: KeyMatcher,
        reason: InvalidationReason,
    ) -> InvalidationEvent {
        let (keys, revalidate) = {
            let mut guard = self.store.write().await;
            let store = &mut *guard;
            let mut keys = Vec::new();
            let mut revalidate = Vec::new();

            for (key, entry) in store.entries.iter_mut() {
                if !matcher.matches(key) {
                    continue;
                }

                // Results of calls started before the invalidation are not trusted;
                // the call stays registered so readers join it and its follow-up
                entry.mark_stale();
                entry.metadata.refetch_pending = store.inflight.contains_key(key);
                entry.notify(CacheEvent::Invalidated { key: key.clone() });

                if entry.is_mounted()
                    && entry.options.revalidate_if_stale
                    && entry.fetcher.is_some()
                {
                    revalidate.push(key.clone());
                }
                keys.push(key.clone());
            }

            store.counters.record(|s| s.invalidations += keys.len() as u64);
            (keys, revalidate)
        };

        info!("Invalidated {} entries ({})", keys.len(), reason);

        for key in &revalidate {
            self.spawn_revalidation(key.clone());
        }

        InvalidationEvent::new(reason, keys).with_revalidated(revalidate)
    }

    /// App regained foreground focus: refetch mounted entries that opt in
    pub async fn on_focus(&self) -> Vec<CacheKey> {
        self.revalidate_mounted(|options| options.revalidate_on_focus).await
    }

    /// Network reconnected: refetch mounted entries that opt in
    pub async fn on_reconnect(&self) -> Vec<CacheKey> {
        self.revalidate_mounted(|options| options.revalidate_on_reconnect).await
    }

    /// Store `value` for `key` without running the producer
    pub async fn mutate<T: Serialize>(&self, key: &CacheKey, value: T) -> Result<u64> {
        let value = serde_json::to_value(value)?;

        let mut guard = self.store.write().await;
        let store = &mut *guard;

        if !store.entries.contains_key(key) {
            self.ensure_capacity(store);
        }

        let capacity = self.config.event_capacity;
        let options = self.config.default_options.clone();
        let entry = store
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(key.clone(), options, capacity));

        // A call in flight would overwrite the local value with older data
        entry.metadata.current_fetch = None;
        entry.metadata.refetch_pending = false;

        let version = entry.store_value(value);
        entry.notify(CacheEvent::Updated {
            key: key.clone(),
            version,
        });

        debug!("Mutated {} (version {})", key, version);
        Ok(version)
    }

    /// Drop the retained value of `key` but keep its subscribers
    pub async fn discard(&self, key: &CacheKey) -> bool {
        let mut guard = self.store.write().await;
        let store = &mut *guard;
        match store.entries.get_mut(key) {
            Some(entry) => {
                entry.value = None;
                entry.mark_stale();
                entry.metadata.refetch_pending = store.inflight.contains_key(key);
                entry.notify(CacheEvent::Invalidated { key: key.clone() });
                debug!("Discarded value of {}", key);
                true
            }
            None => false,
        }
    }

    /// Remove `key` from the cache entirely
    pub async fn remove(&self, key: &CacheKey) -> bool {
        let mut guard = self.store.write().await;
        let store = &mut *guard;

        store.inflight.remove(key);
        match store.entries.remove(key) {
            Some(entry) => {
                entry.notify(CacheEvent::Removed { key: key.clone() });
                debug!("Removed cache entry: {}", key);
                true
            }
            None => false,
        }
    }

    /// Remove all entries
    pub async fn clear(&self) {
        let mut store = self.store.write().await;

        let count = store.entries.len();
        for (key, entry) in store.entries.drain() {
            entry.notify(CacheEvent::Removed { key });
        }
        store.inflight.clear();

        info!("Cleared {} entries from cache", count);
    }

    /// Drop entries with no subscriber, no call in flight, idle past `gc_idle`
    pub async fn prune_unmounted(&self) -> InvalidationEvent {
        let mut guard = self.store.write().await;
        let store = &mut *guard;
        let now = Instant::now();
        let gc_idle = self.config.gc_idle;

        let idle: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(key, entry)| {
                !entry.is_mounted()
                    && !store.inflight.contains_key(*key)
                    && entry.idle_for(now) >= gc_idle
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &idle {
            store.entries.remove(key);
        }
        store.counters.record(|s| s.evictions += idle.len() as u64);

        if !idle.is_empty() {
            debug!("Pruned {} idle entries", idle.len());
        }

        InvalidationEvent::new(InvalidationReason::Idle, idle)
    }

    /// Whether `key` is marked stale; `None` if the key is not cached
    pub async fn is_stale(&self, key: &CacheKey) -> Option<bool> {
        let store = self.store.read().await;
        store.entries.get(key).map(|entry| entry.stale)
    }

    /// Number of mounted subscribers of `key`
    pub async fn subscriber_count(&self, key: &CacheKey) -> usize {
        let store = self.store.read().await;
        store.entries.get(key).map(CacheEntry::subscriber_count).unwrap_or(0)
    }

    /// Check if a key exists in the cache
    pub async fn contains_key(&self, key: &CacheKey) -> bool {
        let store = self.store.read().await;
        store.entries.contains_key(key)
    }

    /// All cached keys
    pub async fn keys(&self) -> Vec<CacheKey> {
        let store = self.store.read().await;
        store.entries.keys().cloned().collect()
    }

    /// Get number of entries in cache
    pub async fn len(&self) -> usize {
        let store = self.store.read().await;
        store.entries.len()
    }

    /// Check if cache is empty
    pub async fn is_empty(&self) -> bool {
        let store = self.store.read().await;
        store.entries.is_empty()
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let store = self.store.read().await;
        let mut stats = store.counters.stats.clone();
        stats.entries = store.entries.len();
        stats
    }

    /// Internal: wait for a fetch and report the entry it settled
    async fn await_fetch<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        first: SharedFetch,
    ) -> ReadState<T> {
        let _ = self.settle(key, first).await;

        let store = self.store.read().await;
        match store.entries.get(key) {
            Some(entry) => Self::state_of(entry, store.inflight.contains_key(key)),
            None => ReadState::empty(),
        }
    }

    /// Internal: wait for a fetch, following the calls that replace it while
    /// the entry stays stale
    async fn settle(&self, key: &CacheKey, first: SharedFetch) -> FetchOutcome {
        let mut pending = first;
        let mut follow_ups = 0;

        loop {
            let outcome = pending.await;

            let next = {
                let store = self.store.read().await;
                let follow = follow_ups < MAX_FOLLOW_UPS;
                match (store.entries.get(key), store.inflight.get(key)) {
                    (Some(entry), Some((_, next))) if entry.stale && follow => next.clone(),
                    _ => return outcome,
                }
            };

            debug!("Following superseding fetch for {}", key);
            pending = next;
            follow_ups += 1;
        }
    }

    /// Internal: join the in-flight call for `key` or start one
    fn begin_revalidate(&self, store: &mut CacheStore, key: &CacheKey) -> Option<SharedFetch> {
        if let Some((_, shared)) = store.inflight.get(key) {
            store.counters.record(|s| s.coalesced += 1);
            return Some(shared.clone());
        }
        self.start_fetch(store, key)
    }

    /// Internal: launch the remembered producer of `key`
    fn start_fetch(&self, store: &mut CacheStore, key: &CacheKey) -> Option<SharedFetch> {
        launch(&self.store, store, key)
    }

    /// Internal: refetch `key` in the background, retrying failures with backoff
    fn spawn_revalidation(&self, key: CacheKey) {
        let cache = self.clone();

        tokio::spawn(async move {
            let mut attempt = 0;
            loop {
                let pending = {
                    let mut guard = cache.store.write().await;
                    cache.begin_revalidate(&mut guard, &key)
                };

                let outcome = match pending {
                    Some(shared) => cache.settle(&key, shared).await,
                    None => return,
                };

                let error = match outcome {
                    Ok(_) => return,
                    Err(error) => error,
                };

                let retry = {
                    let store = cache.store.read().await;
                    store.entries.get(&key).is_some_and(|entry| {
                        entry.is_mounted() && entry.options.should_retry_on_error
                    }) && attempt < cache.config.error_retry_count
                };

                if !retry {
                    warn!("Revalidation of {} failed: {}", key, error);
                    return;
                }

                let delay = cache.config.retry_delay(attempt);
                debug!("Retrying {} in {:?} (attempt {})", key, delay, attempt + 1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        });
    }

    /// Internal: revalidate every mounted entry whose options pass `wants`
    async fn revalidate_mounted(&self, wants: impl Fn(&ReadOptions) -> bool) -> Vec<CacheKey> {
        let keys: Vec<CacheKey> = {
            let store = self.store.read().await;
            store
                .entries
                .values()
                .filter(|entry| {
                    entry.is_mounted() && entry.fetcher.is_some() && wants(&entry.options)
                })
                .map(|entry| entry.key.clone())
                .collect()
        };

        for key in &keys {
            self.spawn_revalidation(key.clone());
        }

        debug!("Revalidating {} mounted entries", keys.len());
        keys
    }

    /// Internal: make room for one more entry
    fn ensure_capacity(&self, store: &mut CacheStore) {
        while store.entries.len() >= self.config.max_entries {
            let victim = store
                .entries
                .iter()
                .filter(|(key, entry)| !entry.is_mounted() && !store.inflight.contains_key(*key))
                .min_by_key(|(_, entry)| entry.metadata.accessed_at)
                .map(|(key, _)| key.clone());

            match victim {
                Some(key) => {
                    debug!("Evicting entry due to max_entries limit: {}", key);
                    store.entries.remove(&key);
                    store.counters.record(|s| s.evictions += 1);
                }
                None => {
                    warn!("Cannot evict more entries, every entry is mounted or loading");
                    break;
                }
            }
        }
    }

    /// Internal: view of an entry decoded as `T`
    fn state_of<T: DeserializeOwned>(entry: &CacheEntry, is_loading: bool) -> ReadState<T> {
        let mut error = entry.error.clone();
        let value = match &entry.value {
            Some(raw) => match serde_json::from_value(raw.clone()) {
                Ok(value) => Some(value),
                Err(e) => {
                    error = Some(Arc::new(LinkSwipeError::from(e)));
                    None
                }
            },
            None => None,
        };

        ReadState {
            value,
            is_loading,
            error,
        }
    }
}

/// Launch the remembered producer of `key` and register it as in flight
///
/// The call is spawned so it completes even if every reader goes away. When
/// the entry was invalidated while the call ran, its result is discarded and
/// exactly one follow-up call is launched in its place.
fn launch(
    handle: &Arc<RwLock<CacheStore>>,
    store: &mut CacheStore,
    key: &CacheKey,
) -> Option<SharedFetch> {
    let entry = store.entries.get_mut(key)?;
    let fetcher = entry.fetcher.clone()?;

    let fetch_id = store.next_fetch_id;
    store.next_fetch_id += 1;
    entry.metadata.last_fetch_at = Some(Instant::now());
    entry.metadata.current_fetch = Some(fetch_id);
    entry.metadata.refetch_pending = false;
    store.counters.record(|s| s.producer_calls += 1);

    debug!("Starting fetch #{} for {}", fetch_id, key);

    let cache = handle.clone();
    let owned_key = key.clone();
    let shared = async move {
        let outcome = fetcher().await.map_err(Arc::new);
        let mut guard = cache.write().await;
        if guard.complete(&owned_key, fetch_id, &outcome) {
            let _ = launch(&cache, &mut guard, &owned_key);
        }
        outcome
    }
    .boxed()
    .shared();

    store.inflight.insert(key.clone(), (fetch_id, shared.clone()));
    tokio::spawn(shared.clone());

    Some(shared)
}

impl CacheStore {
    /// Apply the outcome of fetch `fetch_id` unless it was superseded
    ///
    /// Returns `true` when the entry is owed a follow-up call.
    fn complete(&mut self, key: &CacheKey, fetch_id: u64, outcome: &FetchOutcome) -> bool {
        if matches!(self.inflight.get(key), Some((id, _)) if *id == fetch_id) {
            self.inflight.remove(key);
        }

        let entry = match self.entries.get_mut(key) {
            Some(entry) => entry,
            None => {
                debug!("Fetch #{} for {} finished after removal", fetch_id, key);
                return false;
            }
        };

        if entry.metadata.current_fetch != Some(fetch_id) {
            debug!("Discarding superseded fetch #{} for {}", fetch_id, key);
            let owed = entry.metadata.refetch_pending && !self.inflight.contains_key(key);
            if owed {
                entry.metadata.refetch_pending = false;
            }
            return owed;
        }
        entry.metadata.current_fetch = None;

        match outcome {
            Ok(value) => {
                let version = entry.store_value(value.clone());
                entry.notify(CacheEvent::Updated {
                    key: key.clone(),
                    version,
                });
                debug!("Stored {} (version {})", key, version);
            }
            Err(error) => {
                entry.store_error(error.clone());
                entry.notify(CacheEvent::Failed {
                    key: key.clone(),
                    message: error.to_string(),
                });
                self.counters.record(|s| s.errors += 1);
                warn!("Fetch for {} failed: {}", key, error);
            }
        }
        false
    }
}

impl KeyedCache {
    /// Spawn `start_auto_cleanup` when the config enables it
    ///
    /// Returns `None` if cleanup is disabled or no tokio runtime is running.
    pub fn spawn_auto_cleanup(&self) -> Option<JoinHandle<()>> {
        if !self.config.enable_auto_cleanup {
            return None;
        }
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        Some(runtime.spawn(start_auto_cleanup(self.clone())))
    }
}

/// Background task for automatic cleanup of unmounted entries
pub async fn start_auto_cleanup(cache: KeyedCache) {
    let interval = cache.config.cleanup_interval;

    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        let event = cache.prune_unmounted().await;
        if !event.keys.is_empty() {
            debug!("Auto cleanup: {} entries", event.keys.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn cache() -> KeyedCache {
        KeyedCache::new(CacheConfig::immediate()).unwrap()
    }

    fn counting_producer(
        calls: Arc<AtomicUsize>,
        value: &'static str,
    ) -> impl Fn() -> BoxFuture<'static, Result<String>> + Send + Sync + 'static {
        move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value.to_string())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_read_miss_then_hit() {
        let cache = cache();
        let key = CacheKey::plain("k");
        let calls = Arc::new(AtomicUsize::new(0));

        let first: ReadState<String> = cache
            .read(&key, counting_producer(calls.clone(), "v"), ReadOptions::default())
            .await;
        assert_eq!(first.value.as_deref(), Some("v"));
        assert!(!first.is_loading);

        let second: ReadState<String> = cache
            .read(&key, counting_producer(calls.clone(), "other"), ReadOptions::default())
            .await;
        assert_eq!(second.value.as_deref(), Some("v"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.producer_calls, 1);
    }

    #[tokio::test]
    async fn test_error_keeps_previous_value() {
        let cache = cache();
        let key = CacheKey::plain("k");

        let _: ReadState<u32> = cache
            .read(&key, || async { Ok(7u32) }, ReadOptions::default())
            .await;
        cache.invalidate(&key).await;

        let state: ReadState<u32> = cache
            .read(
                &key,
                || async { Err::<u32, _>(LinkSwipeError::Backend("down".into())) },
                ReadOptions::default(),
            )
            .await;

        assert_eq!(state.value, Some(7));
        assert!(state.is_error());
        assert_eq!(cache.stats().await.errors, 1);
    }

    #[tokio::test]
    async fn test_dedup_interval_suppresses_refetch_after_error() {
        let cache = cache();
        let key = CacheKey::plain("k");
        let calls = Arc::new(AtomicUsize::new(0));
        let options = ReadOptions::default().deduping_interval(Duration::from_secs(60));

        let failing = {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(LinkSwipeError::Backend("down".into()))
                }
            }
        };

        let first: ReadState<u32> = cache.read(&key, failing.clone(), options.clone()).await;
        assert!(first.is_error());
        let second: ReadState<u32> = cache.read(&key, failing, options).await;
        assert!(second.is_error());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().await.deduplicated, 1);
    }

    #[tokio::test]
    async fn test_mutate_and_discard() {
        let cache = cache();
        let key = CacheKey::plain("k");

        let version = cache.mutate(&key, vec![1, 2, 3]).await.unwrap();
        assert_eq!(version, 1);

        let state: ReadState<Vec<u32>> = cache.peek(&key).await;
        assert_eq!(state.value, Some(vec![1, 2, 3]));

        assert!(cache.discard(&key).await);
        let state: ReadState<Vec<u32>> = cache.peek(&key).await;
        assert!(state.value.is_none());
        assert_eq!(cache.is_stale(&key).await, Some(true));
    }

    #[tokio::test]
    async fn test_subscription_tracks_mount() {
        let cache = cache();
        let key = CacheKey::plain("k");

        let sub = cache.subscribe(&key).await;
        assert_eq!(cache.subscriber_count(&key).await, 1);
        drop(sub);
        assert_eq!(cache.subscriber_count(&key).await, 0);
    }

    #[tokio::test]
    async fn test_remove_closes_subscriptions() {
        let cache = cache();
        let key = CacheKey::plain("k");
        let mut sub = cache.subscribe(&key).await;

        assert!(cache.remove(&key).await);
        assert_eq!(sub.recv().await, Some(CacheEvent::Removed { key: key.clone() }));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_prune_unmounted() {
        let config = CacheConfig::builder()
            .gc_idle(Duration::ZERO)
            .enable_auto_cleanup(false)
            .build();
        let cache = KeyedCache::new(config).unwrap();

        let mounted = CacheKey::plain("mounted");
        let idle = CacheKey::plain("idle");
        let _sub = cache.subscribe(&mounted).await;
        cache.mutate(&idle, 1).await.unwrap();

        let event = cache.prune_unmounted().await;
        assert_eq!(event.keys, vec![idle.clone()]);
        assert!(cache.contains_key(&mounted).await);
        assert!(!cache.contains_key(&idle).await);
    }

    #[tokio::test]
    async fn test_max_entries_evicts_least_recently_read() {
        let config = CacheConfig::builder().max_entries(2).build();
        let cache = KeyedCache::new(config).unwrap();

        for name in ["a", "b"] {
            let _: ReadState<u32> = cache
                .read(&CacheKey::plain(name), || async { Ok(1u32) }, ReadOptions::default())
                .await;
        }
        // Touch "a" so "b" is the oldest
        let _: ReadState<u32> = cache
            .read(&CacheKey::plain("a"), || async { Ok(1u32) }, ReadOptions::default())
            .await;
        let _: ReadState<u32> = cache
            .read(&CacheKey::plain("c"), || async { Ok(1u32) }, ReadOptions::default())
            .await;

        assert!(cache.contains_key(&CacheKey::plain("a")).await);
        assert!(!cache.contains_key(&CacheKey::plain("b")).await);
        assert_eq!(cache.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_auto_cleanup_follows_config() {
        assert!(cache().spawn_auto_cleanup().is_none());

        let handle = KeyedCache::new(CacheConfig::default())
            .unwrap()
            .spawn_auto_cleanup()
            .unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn test_revalidate_without_producer() {
        let cache = cache();
        let key = CacheKey::plain("k");
        let _sub = cache.subscribe(&key).await;
        assert!(!cache.revalidate(&key).await);
    }

    #[tokio::test]
    async fn test_invalidate_during_fetch_runs_one_follow_up() {
        let cache = cache();
        let key = CacheKey::plain("k");
        let calls = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let producer = {
            let (calls, running, peak) = (calls.clone(), running.clone(), peak.clone());
            move || {
                let (calls, running, peak) = (calls.clone(), running.clone(), peak.clone());
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    peak.fetch_max(running.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(n as u32)
                }
            }
        };

        let first = {
            let (cache, key, producer) = (cache.clone(), key.clone(), producer.clone());
            tokio::spawn(async move {
                let state: ReadState<u32> =
                    cache.read(&key, producer, ReadOptions::default()).await;
                state
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.invalidate(&key).await;
        let second: ReadState<u32> = cache.read(&key, producer, ReadOptions::default()).await;
        let first = first.await.unwrap();

        // The call started before the invalidation is discarded, not raced
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.value, Some(1));
        assert_eq!(second.value, Some(1));
        assert_eq!(cache.is_stale(&key).await, Some(false));
    }

    #[tokio::test]
    async fn test_mutate_during_fetch_keeps_local_value() {
        let cache = cache();
        let key = CacheKey::plain("k");
        let calls = Arc::new(AtomicUsize::new(0));

        let producer = {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(1u32)
                }
            }
        };

        let reader = {
            let (cache, key) = (cache.clone(), key.clone());
            tokio::spawn(async move {
                let state: ReadState<u32> =
                    cache.read(&key, producer, ReadOptions::default()).await;
                state
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.mutate(&key, 9u32).await.unwrap();

        assert_eq!(reader.await.unwrap().value, Some(9));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = CacheConfig::builder().max_entries(0).build();
        assert!(matches!(
            KeyedCache::new(config),
            Err(LinkSwipeError::ConfigError(msg)) if msg.contains("max_entries")
        ));
    }

    #[tokio::test]
    async fn test_disabled_metrics_leave_stats_empty() {
        let config = CacheConfig::builder()
            .enable_metrics(false)
            .enable_auto_cleanup(false)
            .build();
        let cache = KeyedCache::new(config).unwrap();
        let key = CacheKey::plain("k");

        for _ in 0..2 {
            let _: ReadState<u32> = cache
                .read(&key, || async { Ok(1u32) }, ReadOptions::default())
                .await;
        }
        cache.invalidate(&key).await;

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.producer_calls), (0, 0, 0));
        assert_eq!(stats.invalidations, 0);
        assert_eq!(stats.entries, 1);
    }

    async fn next_update(sub: &mut Subscription) -> u64 {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await;
            match event {
                Ok(Some(CacheEvent::Updated { version, .. })) => return version,
                Ok(Some(_)) => continue,
                other => panic!("expected an update on {}, got {:?}", sub.key(), other),
            }
        }
    }

    #[tokio::test]
    async fn test_focus_and_reconnect_follow_read_options() {
        let cache = cache();
        let on_focus = CacheKey::plain("focus");
        let on_reconnect = CacheKey::plain("reconnect");
        let focus_calls = Arc::new(AtomicUsize::new(0));
        let reconnect_calls = Arc::new(AtomicUsize::new(0));

        let mut focus_sub = cache.subscribe(&on_focus).await;
        let mut reconnect_sub = cache.subscribe(&on_reconnect).await;

        let _: ReadState<String> = cache
            .read(
                &on_focus,
                counting_producer(focus_calls.clone(), "f"),
                ReadOptions::default().revalidate_on_reconnect(false),
            )
            .await;
        let _: ReadState<String> = cache
            .read(
                &on_reconnect,
                counting_producer(reconnect_calls.clone(), "r"),
                ReadOptions::default().revalidate_on_focus(false),
            )
            .await;
        assert_eq!(next_update(&mut focus_sub).await, 1);
        assert_eq!(next_update(&mut reconnect_sub).await, 1);

        assert_eq!(cache.on_focus().await, vec![on_focus.clone()]);
        assert_eq!(next_update(&mut focus_sub).await, 2);
        assert_eq!(focus_calls.load(Ordering::SeqCst), 2);
        assert_eq!(reconnect_calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.on_reconnect().await, vec![on_reconnect.clone()]);
        assert_eq!(next_update(&mut reconnect_sub).await, 2);
        assert_eq!(reconnect_calls.load(Ordering::SeqCst), 2);
        assert_eq!(focus_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_focus_skips_unmounted_entries() {
        let cache = cache();
        let key = CacheKey::plain("k");
        let _: ReadState<u32> = cache
            .read(&key, || async { Ok(1u32) }, ReadOptions::default())
            .await;

        assert!(cache.on_focus().await.is_empty());
        assert!(cache.on_reconnect().await.is_empty());
    }

    fn flaky_producer(
        calls: Arc<AtomicUsize>,
        failures: usize,
    ) -> impl Fn() -> BoxFuture<'static, Result<u32>> + Send + Sync + 'static {
        move || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    Err(LinkSwipeError::Backend(format!("attempt {} failed", n)))
                } else {
                    Ok(n as u32)
                }
            }
            .boxed()
        }
    }

    fn retrying(count: u32) -> KeyedCache {
        let config = CacheConfig::builder()
            .error_retry_count(count)
            .error_retry_interval(Duration::from_millis(10))
            .retry_jitter(0.0)
            .enable_auto_cleanup(false)
            .build();
        KeyedCache::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_revalidation_retries_mounted_failures() {
        let cache = retrying(2);
        let key = CacheKey::plain("k");
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sub = cache.subscribe(&key).await;

        let first: ReadState<u32> = cache
            .read(&key, flaky_producer(calls.clone(), 2), ReadOptions::default())
            .await;
        assert!(first.is_error());

        cache.invalidate(&key).await;
        next_update(&mut sub).await;

        // One failed read, one failed revalidation, one successful retry
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let state: ReadState<u32> = cache.peek(&key).await;
        assert_eq!(state.value, Some(2));
        assert!(!state.is_error());
    }

    #[tokio::test]
    async fn test_revalidation_without_retries_gives_up() {
        let cache = retrying(0);
        let key = CacheKey::plain("k");
        let calls = Arc::new(AtomicUsize::new(0));
        let mut sub = cache.subscribe(&key).await;

        let _: ReadState<u32> = cache
            .read(&key, flaky_producer(calls.clone(), 2), ReadOptions::default())
            .await;
        cache.invalidate(&key).await;

        let mut failures = 0;
        while failures < 2 {
            match tokio::time::timeout(Duration::from_secs(1), sub.recv()).await {
                Ok(Some(CacheEvent::Failed { .. })) => failures += 1,
                Ok(Some(_)) => continue,
                other => panic!("expected a failure, got {:?}", other),
            }
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.peek::<u32>(&key).await.is_error());
    }
}
