//! Link triage facade
//!
//! `LinkTriage` is what the views talk to. Every read goes through the keyed
//! cache under the signed-in user's keys, and every write goes through the
//! invalidation coordinator so dependent views refetch only after the write
//! has succeeded.

use crate::backend::{AuthService, RestRowService};
use crate::browser::{BrowserService, OpenTarget};
use crate::cache::{
    keys, CacheConfig, DomainEvent, FocusObserver, InvalidationCoordinator, KeyFamilyRegistry,
    KeyedCache, ReadOptions, ReadState,
};
use crate::config::AppConfig;
use crate::error::{LinkSwipeError, Result};
use crate::links::{
    ActionRecord, HttpPreviewFetcher, Link, LinkAction, LinkPurpose, LinkRepository, OgPreview,
    StatusCounts, WeeklyActivity,
};
use crate::session::SessionStore;
use crate::storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, OnboardingFlag};
use crate::swipe::SwipeDirection;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const DASHBOARD_SCREEN: &str = "dashboard";
pub const SWIPE_SCREEN: &str = "swipe";

const BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// What a link-list view renders
#[derive(Debug, Clone, PartialEq)]
pub enum LinkListView {
    /// Nothing fetched yet
    Loading,

    /// Fetched, and the user has no links
    Empty,

    Ready(Vec<Link>),

    /// The last fetch failed; `items` holds the previously fetched list
    Error { message: String, items: Vec<Link> },
}

impl LinkListView {
    pub fn from_state(state: ReadState<Vec<Link>>) -> Self {
        match (state.value, state.error) {
            (value, Some(error)) => LinkListView::Error {
                message: error.to_string(),
                items: value.unwrap_or_default(),
            },
            (Some(items), None) if items.is_empty() => LinkListView::Empty,
            (Some(items), None) => LinkListView::Ready(items),
            (None, None) => LinkListView::Loading,
        }
    }

    /// Links to render, including retained ones on error
    pub fn items(&self) -> &[Link] {
        match self {
            LinkListView::Ready(items) | LinkListView::Error { items, .. } => items,
            LinkListView::Loading | LinkListView::Empty => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, LinkListView::Empty)
    }
}

/// Both dashboard aggregates
#[derive(Debug, Clone)]
pub struct Dashboard {
    pub weekly: ReadState<WeeklyActivity>,
    pub counts: ReadState<StatusCounts>,
}

pub struct LinkTriage {
    cache: KeyedCache,
    coordinator: InvalidationCoordinator,
    repository: Arc<LinkRepository>,
    session: Arc<SessionStore>,
    browser: BrowserService,
    onboarding: OnboardingFlag,
    preview_options: ReadOptions,
    cleanup: Option<JoinHandle<()>>,

    /// User id and access token the cached data was fetched with
    synced: Mutex<Option<(String, String)>>,
}

impl Drop for LinkTriage {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.abort();
        }
    }
}

impl LinkTriage {
    pub fn builder() -> LinkTriageBuilder {
        LinkTriageBuilder::default()
    }

    /// Wire the hosted backend, HTTP previews and file storage from `config`
    pub async fn from_config(config: &AppConfig, auth: Arc<dyn AuthService>) -> Result<Self> {
        config.validate()?;

        let rows = RestRowService::new(&config.backend_url, &config.backend_key, BACKEND_TIMEOUT)?;
        let previews = HttpPreviewFetcher::new(config.preview_timeout)?;
        let repository = LinkRepository::new(Arc::new(rows), Arc::new(previews))
            .with_link_limit(config.link_limit);
        let session = SessionStore::connect(auth).await?;

        info!("Using data directory {}", config.data_dir.display());

        Self::builder()
            .repository(repository)
            .session(Arc::new(session))
            .storage(Arc::new(FileKeyValueStore::in_dir(&config.data_dir)))
            .build()
    }

    pub fn cache(&self) -> &KeyedCache {
        &self.cache
    }

    pub fn coordinator(&self) -> &InvalidationCoordinator {
        &self.coordinator
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn browser(&self) -> &BrowserService {
        &self.browser
    }

    pub fn browser_mut(&mut self) -> &mut BrowserService {
        &mut self.browser
    }

    pub fn repository(&self) -> &LinkRepository {
        &self.repository
    }

    pub fn onboarding(&self) -> &OnboardingFlag {
        &self.onboarding
    }

    /// Signed-in user, after bringing the cache and row service in line with the session
    ///
    /// Cached data belongs to whoever was signed in when it was fetched, so
    /// signing out or switching users clears the cache. A new access token is
    /// handed to the row service before the next call.
    async fn current_user(&self) -> Result<String> {
        let session = self.session.current();
        let next = session
            .as_ref()
            .map(|s| (s.user_id.clone(), s.access_token.clone()));

        let mut synced = self.synced.lock().await;
        if *synced != next {
            let previous_user = synced.as_ref().map(|(user, _)| user.as_str());
            let next_user = next.as_ref().map(|(user, _)| user.as_str());
            if previous_user.is_some() && previous_user != next_user {
                info!(
                    "Session changed from {:?} to {:?}; clearing cache",
                    previous_user, next_user
                );
                self.cache.clear().await;
            }

            self.repository
                .set_access_token(next.as_ref().map(|(_, token)| token.clone()));
            *synced = next;
        }
        drop(synced);

        session.map(|s| s.user_id).ok_or(LinkSwipeError::NoSession)
    }

    /// Most recent links, newest first
    pub async fn top_view_links(&self) -> Result<LinkListView> {
        self.links(LinkPurpose::TopView).await
    }

    /// Links still waiting to be swiped
    pub async fn swipe_links(&self) -> Result<LinkListView> {
        self.links(LinkPurpose::Swipe).await
    }

    async fn links(&self, purpose: LinkPurpose) -> Result<LinkListView> {
        let user_id = self.current_user().await?;
        let key = keys::link_list(purpose, &user_id);
        let repository = self.repository.clone();

        let state = self
            .cache
            .read(
                &key,
                move || {
                    let repository = repository.clone();
                    let user_id = user_id.clone();
                    async move { repository.fetch_links(&user_id, purpose).await }
                },
                self.cache.default_options(),
            )
            .await;

        Ok(LinkListView::from_state(state))
    }

    /// Preview metadata for `url`; never fails
    pub async fn preview(&self, url: &str) -> OgPreview {
        let key = keys::og_preview(url);
        let repository = self.repository.clone();
        let target = url.to_string();

        let state: ReadState<OgPreview> = self
            .cache
            .read(
                &key,
                move || {
                    let repository = repository.clone();
                    let target = target.clone();
                    async move { Ok(repository.fetch_og_preview(&target).await) }
                },
                self.preview_options.clone(),
            )
            .await;

        state.value.unwrap_or_else(|| OgPreview::placeholder(url))
    }

    /// Save a link for the signed-in user
    pub async fn add_link(&self, url: &str) -> Result<Link> {
        let user_id = self.current_user().await?;
        let link = self
            .coordinator
            .after_write(
                self.repository.add_link(&user_id, url),
                DomainEvent::LinkAdded {
                    user_id: user_id.clone(),
                },
            )
            .await?;

        info!("Added link {} for {}", link.id, user_id);
        Ok(link)
    }

    /// Record an action on `link_id` for the signed-in user
    pub async fn record_action(&self, link_id: &str, action: LinkAction) -> Result<ActionRecord> {
        let user_id = self.current_user().await?;
        let event = DomainEvent::LinkActionRecorded {
            user_id: user_id.clone(),
        };
        self.coordinator
            .after_write(self.repository.record_link_action(&user_id, link_id, action), event)
            .await
    }

    /// Record the action a swipe maps to; a swipe in the dead zone records nothing
    pub async fn record_swipe(
        &self,
        link: &Link,
        direction: SwipeDirection,
    ) -> Result<Option<ActionRecord>> {
        match direction.action() {
            Some(action) => self.record_action(&link.id, action).await.map(Some),
            None => {
                debug!("Swipe on {} classified as none", link.id);
                Ok(None)
            }
        }
    }

    pub fn open_target(&self, url: &str) -> OpenTarget {
        self.browser.open_target(url)
    }

    /// Weekly activity and status counts for the signed-in user
    pub async fn dashboard(&self) -> Result<Dashboard> {
        let user_id = self.current_user().await?;
        let options = self.cache.default_options();

        let weekly_repo = self.repository.clone();
        let weekly_user = user_id.clone();
        let weekly_key = keys::weekly_activity(&user_id);
        let weekly = self.cache.read(
            &weekly_key,
            move || {
                let repository = weekly_repo.clone();
                let user_id = weekly_user.clone();
                async move {
                    repository
                        .fetch_weekly_activity(&user_id, Utc::now().date_naive())
                        .await
                }
            },
            options.clone(),
        );

        let counts_repo = self.repository.clone();
        let counts_user = user_id.clone();
        let counts_key = keys::status_counts(&user_id);
        let counts = self.cache.read(
            &counts_key,
            move || {
                let repository = counts_repo.clone();
                let user_id = counts_user.clone();
                async move { repository.fetch_status_counts(&user_id).await }
            },
            options,
        );

        let (weekly, counts) = tokio::join!(weekly, counts);
        Ok(Dashboard { weekly, counts })
    }

    /// Observer invalidating the dashboard's two aggregates on focus
    pub fn dashboard_focus(&self) -> Result<FocusObserver> {
        let user_id = self.session.require_user()?;
        Ok(FocusObserver::new(
            self.cache.clone(),
            DASHBOARD_SCREEN,
            vec![keys::weekly_activity(&user_id), keys::status_counts(&user_id)],
        ))
    }

    /// Observer invalidating the swipe list on focus
    pub fn swipe_focus(&self) -> Result<FocusObserver> {
        let user_id = self.session.require_user()?;
        Ok(FocusObserver::new(
            self.cache.clone(),
            SWIPE_SCREEN,
            vec![keys::link_list(LinkPurpose::Swipe, &user_id)],
        ))
    }
}

#[derive(Default)]
pub struct LinkTriageBuilder {
    cache: Option<KeyedCache>,
    registry: Option<KeyFamilyRegistry>,
    repository: Option<Arc<LinkRepository>>,
    session: Option<Arc<SessionStore>>,
    storage: Option<Arc<dyn KeyValueStore>>,
    browser: BrowserService,
}

impl LinkTriageBuilder {
    pub fn cache(mut self, cache: KeyedCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn registry(mut self, registry: KeyFamilyRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn repository(mut self, repository: LinkRepository) -> Self {
        self.repository = Some(Arc::new(repository));
        self
    }

    pub fn session(mut self, session: Arc<SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn browser(mut self, browser: BrowserService) -> Self {
        self.browser = browser;
        self
    }

    /// Device storage for the onboarding flag; in-memory when unset
    pub fn storage(mut self, storage: Arc<dyn KeyValueStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Fails with `MissingContext` when the session store or repository is absent
    pub fn build(self) -> Result<LinkTriage> {
        let session = self
            .session
            .ok_or(LinkSwipeError::MissingContext("session store"))?;
        let repository = self
            .repository
            .ok_or(LinkSwipeError::MissingContext("link repository"))?;
        let cache = match self.cache {
            Some(cache) => cache,
            None => KeyedCache::new(CacheConfig::default())?,
        };
        let coordinator = InvalidationCoordinator::with_registry(
            cache.clone(),
            self.registry.unwrap_or_default(),
        );

        // Previews rarely change; only explicit invalidation refetches them
        let preview_options = cache
            .default_options()
            .revalidate_on_focus(false)
            .revalidate_on_reconnect(false);

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryKeyValueStore::new()));

        let cleanup = cache.spawn_auto_cleanup();

        Ok(LinkTriage {
            cleanup,
            cache,
            coordinator,
            repository,
            session,
            browser: self.browser,
            onboarding: OnboardingFlag::new(storage),
            preview_options,
            synced: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryAuthService, MemoryRowService, Session};
    use crate::links::PreviewFetcher;
    use async_trait::async_trait;

    struct StaticPreviews;

    #[async_trait]
    impl PreviewFetcher for StaticPreviews {
        async fn fetch(&self, url: &str) -> Result<OgPreview> {
            let mut preview = OgPreview::placeholder(url);
            preview.title = Some(format!("Title of {}", url));
            Ok(preview)
        }
    }

    async fn triage(rows: Arc<MemoryRowService>) -> LinkTriage {
        let auth = MemoryAuthService::signed_in(Session {
            user_id: "u1".into(),
            access_token: "t".into(),
            expires_at: None,
        });
        let session = SessionStore::connect(Arc::new(auth)).await.unwrap();

        LinkTriage::builder()
            .cache(KeyedCache::new(CacheConfig::immediate()).unwrap())
            .repository(LinkRepository::new(rows, Arc::new(StaticPreviews)))
            .session(Arc::new(session))
            .build()
            .unwrap()
    }

    #[test]
    fn test_list_view_states() {
        let empty = ReadState {
            value: Some(Vec::new()),
            is_loading: false,
            error: None,
        };
        assert_eq!(LinkListView::from_state(empty), LinkListView::Empty);

        let failed: ReadState<Vec<Link>> = ReadState {
            value: Some(vec![Link::new("u1", "https://a.example")]),
            is_loading: false,
            error: Some(Arc::new(LinkSwipeError::Fetch("offline".into()))),
        };
        let view = LinkListView::from_state(failed);
        assert!(matches!(view, LinkListView::Error { .. }));
        assert_eq!(view.items().len(), 1);
    }

    #[test]
    fn test_builder_requires_session() {
        let rows = Arc::new(MemoryRowService::new());
        let result = LinkTriage::builder()
            .repository(LinkRepository::new(rows, Arc::new(StaticPreviews)))
            .build();
        assert!(matches!(
            result,
            Err(LinkSwipeError::MissingContext("session store"))
        ));
    }

    #[tokio::test]
    async fn test_add_link_refreshes_lists() {
        let rows = Arc::new(MemoryRowService::new());
        let triage = triage(rows).await;

        assert_eq!(triage.top_view_links().await.unwrap(), LinkListView::Empty);

        let link = triage.add_link("https://rust-lang.org").await.unwrap();
        assert_eq!(link.title.as_deref(), Some("Title of https://rust-lang.org/"));

        let view = triage.top_view_links().await.unwrap();
        assert_eq!(view.items().len(), 1);
    }

    #[tokio::test]
    async fn test_swipe_records_action() {
        let rows = Arc::new(MemoryRowService::new());
        let triage = triage(rows).await;
        let link = triage.add_link("https://a.example").await.unwrap();

        assert!(triage
            .record_swipe(&link, SwipeDirection::None)
            .await
            .unwrap()
            .is_none());

        let record = triage
            .record_swipe(&link, SwipeDirection::Top)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.link_id, link.id);

        let dashboard = triage.dashboard().await.unwrap();
        assert_eq!(dashboard.counts.value.unwrap().favorite, 1);
        assert_eq!(dashboard.weekly.value.unwrap().total(), 1);
    }

    fn app_config(data_dir: &std::path::Path) -> AppConfig {
        AppConfig {
            backend_url: "https://db.example.com".into(),
            backend_key: "anon-key".into(),
            data_dir: data_dir.to_path_buf(),
            link_limit: 7,
            preview_timeout: Duration::from_secs(3),
        }
    }

    #[tokio::test]
    async fn test_from_config_wires_settings() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = app_config(dir.path());

        let triage = LinkTriage::from_config(&config, Arc::new(MemoryAuthService::new()))
            .await
            .unwrap();
        assert_eq!(triage.repository().link_limit(), 7);
        assert!(triage.session().current().is_none());

        assert!(!triage.onboarding().is_complete().await);
        triage.onboarding().mark_complete().await.unwrap();
        assert!(dir.path().join("storage.json").exists());
        assert!(triage.onboarding().is_complete().await);
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid_settings() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = app_config(dir.path());
        config.backend_url = "db.example.com".into();

        let result = LinkTriage::from_config(&config, Arc::new(MemoryAuthService::new())).await;
        assert!(matches!(result, Err(LinkSwipeError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_onboarding_defaults_to_memory_storage() {
        let rows = Arc::new(MemoryRowService::new());
        let triage = triage(rows).await;

        assert!(!triage.onboarding().is_complete().await);
        triage.onboarding().mark_complete().await.unwrap();
        assert!(triage.onboarding().is_complete().await);
    }

    #[tokio::test]
    async fn test_preview_is_cached() {
        let rows = Arc::new(MemoryRowService::new());
        let triage = triage(rows).await;

        let first = triage.preview("https://a.example").await;
        let second = triage.preview("https://a.example").await;
        assert_eq!(first, second);
        assert_eq!(triage.cache().stats().await.producer_calls, 1);
    }
}
