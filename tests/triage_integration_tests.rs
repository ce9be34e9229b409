//! End-to-end tests of the triage facade over in-memory collaborators

use async_trait::async_trait;
use linkswipe::backend::{MemoryAuthService, MemoryRowService, Session};
use linkswipe::cache::keys;
use linkswipe::{
    CacheConfig, KeyedCache, LinkListView, LinkPurpose, LinkRepository, LinkSwipeError,
    LinkTriage, OgPreview, OpenTarget, PreviewFetcher, Result, SessionStore, SwipeDeck,
    BrowserService,
};
use std::sync::Arc;

struct FailingPreviews;

#[async_trait]
impl PreviewFetcher for FailingPreviews {
    async fn fetch(&self, url: &str) -> Result<OgPreview> {
        Err(LinkSwipeError::Fetch(format!("{} timed out", url)))
    }
}

struct Fixture {
    rows: Arc<MemoryRowService>,
    auth: MemoryAuthService,
    triage: LinkTriage,
}

async fn fixture() -> Fixture {
    let rows = Arc::new(MemoryRowService::new());
    let auth = MemoryAuthService::signed_in(Session {
        user_id: "u1".into(),
        access_token: "token".into(),
        expires_at: None,
    });
    let session = SessionStore::connect(Arc::new(auth.clone())).await.unwrap();

    let triage = LinkTriage::builder()
        .cache(KeyedCache::new(CacheConfig::immediate()).unwrap())
        .repository(LinkRepository::new(rows.clone(), Arc::new(FailingPreviews)))
        .session(Arc::new(session))
        .browser(BrowserService::new(["rust-lang.org"]))
        .build()
        .unwrap();

    Fixture { rows, auth, triage }
}

#[tokio::test]
async fn test_user_without_links_sees_empty_state() {
    let fx = fixture().await;

    let view = fx.triage.top_view_links().await.unwrap();
    assert_eq!(view, LinkListView::Empty);
    assert!(view.is_empty());

    let key = keys::link_list(LinkPurpose::TopView, "u1");
    assert_eq!(key.to_string(), "links-top-view");
    assert_eq!(fx.triage.cache().is_stale(&key).await, Some(false));
}

#[tokio::test]
async fn test_swipe_session_updates_dashboard() {
    let fx = fixture().await;
    for url in ["https://a.example", "https://b.example", "https://c.example"] {
        let link = fx.triage.add_link(url).await.unwrap();
        // Preview failures fall back to a placeholder
        assert!(link.title.is_none());
    }

    let view = fx.triage.swipe_links().await.unwrap();
    let mut deck = SwipeDeck::new(view.items().to_vec());
    assert_eq!(deck.len(), 3);

    let before = fx.triage.dashboard().await.unwrap();
    assert_eq!(before.counts.value.unwrap().total(), 0);

    for (dx, dy) in [(40.0, 0.0), (-40.0, 0.0), (0.0, -40.0)] {
        let swiped = deck.swipe(dx, dy).unwrap();
        fx.triage
            .record_swipe(&swiped.card, swiped.direction)
            .await
            .unwrap();
    }
    assert!(deck.state().is_finished);

    let after = fx.triage.dashboard().await.unwrap();
    let counts = after.counts.value.unwrap();
    assert_eq!(
        (counts.read_later, counts.skipped, counts.favorite),
        (1, 1, 1)
    );
    assert_eq!(after.weekly.value.unwrap().total(), 3);

    // The swipe list is not part of the action fan-out; the screen refreshes it on focus
    let mut focus = fx.triage.swipe_focus().unwrap();
    focus.focus().await.unwrap();
    assert_eq!(fx.triage.swipe_links().await.unwrap(), LinkListView::Empty);
}

#[tokio::test]
async fn test_failed_action_keeps_dashboard_fresh() {
    let fx = fixture().await;
    let link = fx.triage.add_link("https://a.example").await.unwrap();
    fx.triage.dashboard().await.unwrap();

    fx.rows.set_fail_writes(true);
    let result = fx
        .triage
        .record_action(&link.id, linkswipe::LinkAction::Like)
        .await;
    assert!(matches!(result, Err(LinkSwipeError::Backend(_))));

    let cache = fx.triage.cache();
    assert_eq!(cache.is_stale(&keys::status_counts("u1")).await, Some(false));
    assert_eq!(cache.is_stale(&keys::weekly_activity("u1")).await, Some(false));
}

#[tokio::test]
async fn test_read_failure_keeps_previous_list() {
    let fx = fixture().await;
    fx.triage.add_link("https://a.example").await.unwrap();
    assert_eq!(fx.triage.top_view_links().await.unwrap().items().len(), 1);

    // Replace the producer with one that fails, then force a refetch
    let key = keys::link_list(LinkPurpose::TopView, "u1");
    let cache = fx.triage.cache();
    cache.invalidate(&key).await;
    let state: linkswipe::ReadState<Vec<linkswipe::Link>> = cache
        .read(
            &key,
            || async { Err(LinkSwipeError::Backend("offline".into())) },
            cache.default_options(),
        )
        .await;

    match LinkListView::from_state(state) {
        LinkListView::Error { items, .. } => assert_eq!(items.len(), 1),
        other => panic!("expected error view, got {:?}", other),
    }
}

#[tokio::test]
async fn test_signed_out_reads_fail() {
    let fx = fixture().await;
    fx.auth.sign_out();

    assert!(matches!(
        fx.triage.top_view_links().await,
        Err(LinkSwipeError::NoSession)
    ));
    assert!(fx.triage.dashboard_focus().is_err());
}

#[tokio::test]
async fn test_open_target_uses_injected_browser() {
    let mut fx = fixture().await;
    assert_eq!(fx.triage.open_target("https://doc.rust-lang.org/std"), OpenTarget::InApp);
    assert_eq!(fx.triage.open_target("https://example.com"), OpenTarget::External);

    fx.triage.browser_mut().allow_domain("example.com").unwrap();
    assert_eq!(fx.triage.open_target("https://example.com"), OpenTarget::InApp);
}

#[tokio::test]
async fn test_switching_users_drops_cached_lists() {
    let fx = fixture().await;
    fx.triage.add_link("https://a.example").await.unwrap();
    assert_eq!(fx.triage.top_view_links().await.unwrap().items().len(), 1);

    fx.auth.sign_out();
    fx.auth.sign_in(Session {
        user_id: "u2".into(),
        access_token: "token-2".into(),
        expires_at: None,
    });

    // The top view key is shared by every user; u1's list must not be served to u2
    assert_eq!(fx.triage.top_view_links().await.unwrap(), LinkListView::Empty);
    assert_eq!(fx.rows.access_token().as_deref(), Some("token-2"));
}

#[tokio::test]
async fn test_session_token_reaches_row_service() {
    let fx = fixture().await;
    assert_eq!(fx.rows.access_token(), None);

    fx.triage.top_view_links().await.unwrap();
    assert_eq!(fx.rows.access_token().as_deref(), Some("token"));
    let selects = fx.rows.select_count();

    // A refreshed token for the same user keeps the cache
    fx.auth.sign_in(Session {
        user_id: "u1".into(),
        access_token: "token-refreshed".into(),
        expires_at: None,
    });
    fx.triage.top_view_links().await.unwrap();
    assert_eq!(fx.rows.access_token().as_deref(), Some("token-refreshed"));
    assert_eq!(fx.rows.select_count(), selects);

    fx.auth.sign_out();
    assert!(fx.triage.top_view_links().await.is_err());
    assert_eq!(fx.rows.access_token(), None);
    assert!(fx.triage.cache().is_empty().await);
}
