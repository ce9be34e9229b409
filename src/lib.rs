//! # LinkSwipe
//!
//! Client core of a link-triage app: users save URLs, preview their
//! metadata, and sort them with swipes (like / skip / favorite) into
//! read-later buckets, with a dashboard summarizing the week.
//!
//! ## Features
//!
//! - Keyed request cache with request coalescing, stale-while-error and per-key policies
//! - Invalidation coordinator fanning domain events out to dependent key families
//! - Focus observers that refetch only the keys a screen reads
//! - Remote data accessors over a PostgREST-style row service
//! - OG preview fetching with placeholder fallback
//! - Session store, onboarding flag and an injectable browser service
//!
//! ## Reading Through the Cache
//!
//! ```no_run
//! use linkswipe::backend::{MemoryAuthService, MemoryRowService};
//! use linkswipe::{HttpPreviewFetcher, LinkRepository, LinkTriage, SessionStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     linkswipe::init_tracing();
//!
//!     let session = SessionStore::connect(Arc::new(MemoryAuthService::new())).await?;
//!     let repository = LinkRepository::new(
//!         Arc::new(MemoryRowService::new()),
//!         Arc::new(HttpPreviewFetcher::new(Duration::from_secs(10))?),
//!     );
//!
//!     let triage = LinkTriage::builder()
//!         .repository(repository)
//!         .session(Arc::new(session))
//!         .build()?;
//!
//!     let links = triage.top_view_links().await?;
//!     println!("{} links", links.items().len());
//!     Ok(())
//! }
//! ```
//!
//! ## Invalidation After Writes
//!
//! Writes go through [`InvalidationCoordinator::after_write`]. Recording a
//! link action marks the user's action-log counts and weekly activity stale,
//! and only once the write has succeeded.
//!
//! ```no_run
//! use linkswipe::{LinkAction, LinkTriage};
//!
//! # async fn example(triage: LinkTriage) -> anyhow::Result<()> {
//! triage.record_action("link-id", LinkAction::Favorite).await?;
//! let dashboard = triage.dashboard().await?;
//! println!("{:?}", dashboard.counts.value);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod browser;
pub mod cache;
pub mod config;
pub mod error;
pub mod links;
pub mod session;
pub mod storage;
pub mod swipe;
pub mod triage;

// Re-export main types for convenience
pub use browser::{BrowserService, OpenTarget};
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheEvent, CacheKey, CacheStats, DomainEvent,
    FocusObserver, InvalidationCoordinator, InvalidationEvent, InvalidationReason,
    KeyFamily, KeyFamilyRegistry, KeyMatcher, KeyedCache, ReadOptions, ReadState, Subscription,
};
pub use config::AppConfig;
pub use error::{LinkSwipeError, Result};
pub use links::{
    ActionRecord, ActionStatus, HttpPreviewFetcher, Link, LinkAction, LinkPurpose,
    LinkRepository, OgPreview, PreviewFetcher, StatusCounts, WeeklyActivity,
};
pub use session::{SessionState, SessionStore};
pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, OnboardingFlag};
pub use swipe::{classify_gesture, SwipeDeck, SwipeDirection, SwipeState};
pub use triage::{Dashboard, LinkListView, LinkTriage};

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG` (default `linkswipe=info`)
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("linkswipe=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
