//! Invalidation targets and records
//!
//! An invalidation names its targets either by exact key or by predicate.
//! Matching entries are marked stale, never dropped: the last good value
//! stays readable until a refetch replaces it.

use crate::cache::types::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Selects the entries an invalidation applies to
#[derive(Clone)]
pub enum KeyMatcher {
    /// Exactly this key
    Exact(CacheKey),

    /// Every key in a namespace
    Namespace(String),

    /// Every key the predicate accepts
    Predicate(Arc<dyn Fn(&CacheKey) -> bool + Send + Sync>),
}

impl KeyMatcher {
    /// Match keys with a predicate
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&CacheKey) -> bool + Send + Sync + 'static,
    {
        KeyMatcher::Predicate(Arc::new(f))
    }

    /// Match every key in `namespace`
    pub fn namespace(namespace: impl Into<String>) -> Self {
        KeyMatcher::Namespace(namespace.into())
    }

    /// Check whether `key` is selected
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            KeyMatcher::Exact(k) => k == key,
            KeyMatcher::Namespace(ns) => key.namespace() == ns,
            KeyMatcher::Predicate(f) => f(key),
        }
    }
}

impl fmt::Debug for KeyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMatcher::Exact(k) => write!(f, "Exact({})", k),
            KeyMatcher::Namespace(ns) => write!(f, "Namespace({})", ns),
            KeyMatcher::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

impl From<CacheKey> for KeyMatcher {
    fn from(key: CacheKey) -> Self {
        KeyMatcher::Exact(key)
    }
}

impl From<&CacheKey> for KeyMatcher {
    fn from(key: &CacheKey) -> Self {
        KeyMatcher::Exact(key.clone())
    }
}

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Manual invalidation by key or predicate
    Manual,

    /// A write completed and its domain event fanned out
    DomainEvent { event: String },

    /// A screen regained focus
    Focus { screen: String },

    /// Unmounted entry idle past the cleanup threshold
    Idle,
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::DomainEvent { event } => write!(f, "domain event: {}", event),
            InvalidationReason::Focus { screen } => write!(f, "screen focused: {}", screen),
            InvalidationReason::Idle => write!(f, "idle without subscribers"),
        }
    }
}

/// Record of one invalidation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were affected
    pub keys: Vec<CacheKey>,

    /// Keys whose mounted subscribers triggered a refetch
    pub revalidated: Vec<CacheKey>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<CacheKey>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            revalidated: Vec::new(),
        }
    }

    /// Attach the keys that were refetched
    pub fn with_revalidated(mut self, keys: Vec<CacheKey>) -> Self {
        self.revalidated = keys;
        self
    }

    /// Whether `key` was marked by this pass
    pub fn touched(&self, key: &CacheKey) -> bool {
        self.keys.contains(key)
    }
}
