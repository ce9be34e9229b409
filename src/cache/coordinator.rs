//! Translates completed writes into cache invalidations
//!
//! The registry is the one place that records which key families a domain
//! event affects. Call sites publish the event; they never list keys.

use crate::cache::{
    invalidation::{InvalidationEvent, InvalidationReason, KeyMatcher},
    keys::KeyFamily,
    store::KeyedCache,
};
use crate::error::Result;
use crate::links::LinkPurpose;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use tracing::{debug, warn};

/// Kind of write a view can complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainEventKind {
    /// A like/skip/favorite was stored in the action log
    LinkActionRecorded,

    /// A new link was saved
    LinkAdded,
}

/// A completed write, scoped to the user it happened for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainEvent {
    LinkActionRecorded { user_id: String },
    LinkAdded { user_id: String },
}

impl DomainEvent {
    pub fn kind(&self) -> DomainEventKind {
        match self {
            DomainEvent::LinkActionRecorded { .. } => DomainEventKind::LinkActionRecorded,
            DomainEvent::LinkAdded { .. } => DomainEventKind::LinkAdded,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            DomainEvent::LinkActionRecorded { user_id } | DomainEvent::LinkAdded { user_id } => {
                user_id
            }
        }
    }
}

impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainEvent::LinkActionRecorded { user_id } => {
                write!(f, "link action recorded for {}", user_id)
            }
            DomainEvent::LinkAdded { user_id } => write!(f, "link added for {}", user_id),
        }
    }
}

/// Mapping from domain event to the key families it makes stale
#[derive(Debug, Clone)]
pub struct KeyFamilyRegistry {
    families: HashMap<DomainEventKind, Vec<KeyFamily>>,
}

impl Default for KeyFamilyRegistry {
    fn default() -> Self {
        Self::empty()
            .register(DomainEventKind::LinkActionRecorded, KeyFamily::ActionLogStatusCounts)
            .register(DomainEventKind::LinkActionRecorded, KeyFamily::WeeklyActivity)
            .register(DomainEventKind::LinkAdded, KeyFamily::LinkList(LinkPurpose::TopView))
            .register(DomainEventKind::LinkAdded, KeyFamily::LinkList(LinkPurpose::Swipe))
    }
}

impl KeyFamilyRegistry {
    /// Registry with no fan-out at all
    pub fn empty() -> Self {
        Self {
            families: HashMap::new(),
        }
    }

    /// Add `family` to the fan-out of `kind`
    pub fn register(mut self, kind: DomainEventKind, family: KeyFamily) -> Self {
        let families = self.families.entry(kind).or_default();
        if !families.contains(&family) {
            families.push(family);
        }
        self
    }

    /// Families affected by `kind`
    pub fn families_for(&self, kind: DomainEventKind) -> &[KeyFamily] {
        self.families.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Matcher covering every key the event makes stale
    pub fn matcher_for(&self, event: &DomainEvent) -> KeyMatcher {
        let matchers: Vec<KeyMatcher> = self
            .families_for(event.kind())
            .iter()
            .map(|family| family.matcher(event.user_id()))
            .collect();

        KeyMatcher::predicate(move |key| matchers.iter().any(|m| m.matches(key)))
    }
}

/// Cache-invalidation coordinator
#[derive(Clone)]
pub struct InvalidationCoordinator {
    cache: KeyedCache,
    registry: KeyFamilyRegistry,
}

impl InvalidationCoordinator {
    /// Create a coordinator with the default fan-out
    pub fn new(cache: KeyedCache) -> Self {
        Self::with_registry(cache, KeyFamilyRegistry::default())
    }

    /// Create a coordinator with a custom fan-out
    pub fn with_registry(cache: KeyedCache, registry: KeyFamilyRegistry) -> Self {
        Self { cache, registry }
    }

    pub fn registry(&self) -> &KeyFamilyRegistry {
        &self.registry
    }

    /// Invalidate an exact key or every key a predicate accepts
    pub async fn invalidate(&self, target: impl Into<KeyMatcher>) -> InvalidationEvent {
        self.cache.invalidate(target).await
    }

    /// Invalidate every key family registered for `event`
    pub async fn publish(&self, event: &DomainEvent) -> InvalidationEvent {
        debug!(
            "Publishing '{}' to {} key families",
            event,
            self.registry.families_for(event.kind()).len()
        );

        self.cache
            .invalidate_with_reason(
                self.registry.matcher_for(event),
                InvalidationReason::DomainEvent {
                    event: event.to_string(),
                },
            )
            .await
    }

    /// Run `write`; publish `event` only once the write has succeeded
    ///
    /// A failed write returns its error and leaves every cache entry untouched.
    pub async fn after_write<T, Fut>(&self, write: Fut, event: DomainEvent) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match write.await {
            Ok(value) => {
                self.publish(&event).await;
                Ok(value)
            }
            Err(e) => {
                warn!("Write for '{}' failed, skipping invalidation: {}", event, e);
                Err(e)
            }
        }
    }
}
