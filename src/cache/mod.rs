//! # Keyed Request Cache
//!
//! Client-side cache that every view reads through. It owns the entries,
//! in-flight producer calls and subscribers, so it can be exercised without
//! any UI.
//!
//! ## Features
//!
//! - **Request coalescing**: one producer call per key at a time; concurrent reads share it
//! - **Stale-while-error**: a failed call keeps the last good value
//! - **Per-key policies**: revalidate on focus / reconnect, deduping interval,
//!   revalidate-if-stale
//! - **Invalidation**: by exact key or predicate; a coordinator fans domain events
//!   out to key families
//! - **Focus observers**: a screen invalidates only the keys it reads when it becomes active
//!
//! ## Example
//!
//! ```rust
//! use linkswipe::cache::{CacheConfig, CacheKey, KeyedCache, ReadOptions};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cache = KeyedCache::new(CacheConfig::default())?;
//! let key = CacheKey::plain("links-top-view");
//!
//! let state = cache
//!     .read(
//!         &key,
//!         || async { Ok(vec!["https://example.com".to_string()]) },
//!         ReadOptions::default(),
//!     )
//!     .await;
//!
//! if let Some(links) = state.value {
//!     println!("{} links", links.len());
//! }
//!
//! cache.invalidate(&key).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod entry;
pub mod focus;
pub mod invalidation;
pub mod keys;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder, ReadOptions};
pub use coordinator::{DomainEvent, DomainEventKind, InvalidationCoordinator, KeyFamilyRegistry};
pub use entry::{CacheEntry, CacheMetadata};
pub use focus::{FocusObserver, FocusState};
pub use invalidation::{InvalidationEvent, InvalidationReason, KeyMatcher};
pub use keys::KeyFamily;
pub use store::{start_auto_cleanup, KeyedCache, ReadState, Subscription};
pub use types::{CacheEvent, CacheKey, CacheKeyBuilder, CacheStats};
