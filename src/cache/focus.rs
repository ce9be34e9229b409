//! Focus-triggered revalidation
//!
//! A screen owns a `FocusObserver` with the keys it reads. Becoming active
//! invalidates exactly those keys; becoming inactive does nothing.

use crate::cache::{
    invalidation::{InvalidationEvent, InvalidationReason, KeyMatcher},
    store::KeyedCache,
    types::CacheKey,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocusState {
    Inactive,
    Active,
}

/// Two-state observer of one screen's focus
pub struct FocusObserver {
    screen: String,
    keys: Vec<CacheKey>,
    state: FocusState,
    cache: KeyedCache,
}

impl FocusObserver {
    /// Create an observer; the screen starts out inactive
    pub fn new(cache: KeyedCache, screen: impl Into<String>, keys: Vec<CacheKey>) -> Self {
        Self {
            screen: screen.into(),
            keys,
            state: FocusState::Inactive,
            cache,
        }
    }

    pub fn state(&self) -> FocusState {
        self.state
    }

    pub fn screen(&self) -> &str {
        &self.screen
    }

    /// Keys invalidated when the screen becomes active
    pub fn keys(&self) -> &[CacheKey] {
        &self.keys
    }

    /// Screen became the active view
    ///
    /// Returns the invalidation record on an inactive → active transition,
    /// `None` if the screen was already active.
    pub async fn focus(&mut self) -> Option<InvalidationEvent> {
        if self.state == FocusState::Active {
            return None;
        }
        self.state = FocusState::Active;

        debug!("Screen '{}' focused, invalidating {} keys", self.screen, self.keys.len());

        let keys = self.keys.clone();
        let matcher = KeyMatcher::predicate(move |key| keys.contains(key));
        let event = self
            .cache
            .invalidate_with_reason(
                matcher,
                InvalidationReason::Focus {
                    screen: self.screen.clone(),
                },
            )
            .await;

        Some(event)
    }

    /// Screen went to the background
    pub fn blur(&mut self) {
        self.state = FocusState::Inactive;
    }

    /// Apply a focus change reported by the navigation layer
    pub async fn set_active(&mut self, active: bool) -> Option<InvalidationEvent> {
        if active {
            self.focus().await
        } else {
            self.blur();
            None
        }
    }
}
