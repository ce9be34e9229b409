//! Remote data accessors for links, the action log and previews

use crate::backend::{RowQuery, RowService};
use crate::error::{LinkSwipeError, Result};
use crate::links::preview::{parse_http_url, PreviewFetcher};
use crate::links::types::{
    ActionRecord, Link, LinkAction, LinkPurpose, OgPreview, StatusCounts, WeeklyActivity,
    LINKS_TABLE, LINK_ACTIONS_TABLE,
};
use chrono::{NaiveDate, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default number of links a list read returns
pub const DEFAULT_LINK_LIMIT: usize = 50;

/// Typed access to the row service
pub struct LinkRepository {
    rows: Arc<dyn RowService>,
    previews: Arc<dyn PreviewFetcher>,
    link_limit: usize,
}

impl LinkRepository {
    pub fn new(rows: Arc<dyn RowService>, previews: Arc<dyn PreviewFetcher>) -> Self {
        Self {
            rows,
            previews,
            link_limit: DEFAULT_LINK_LIMIT,
        }
    }

    /// Cap list reads at `limit` rows
    pub fn with_link_limit(mut self, limit: usize) -> Self {
        self.link_limit = limit.max(1);
        self
    }

    pub fn link_limit(&self) -> usize {
        self.link_limit
    }

    /// Hand the session's access token to the row service
    pub fn set_access_token(&self, token: Option<String>) {
        self.rows.set_access_token(token);
    }

    /// Save `url` for `user_id`, filling title/description/image from its preview
    pub async fn add_link(&self, user_id: &str, url: &str) -> Result<Link> {
        let parsed = parse_http_url(url)?;
        let preview = self.fetch_og_preview(parsed.as_str()).await;
        let link = Link::new(user_id, parsed.as_str()).with_preview(&preview);

        let stored = self
            .rows
            .insert(LINKS_TABLE, serde_json::to_value(&link)?)
            .await?;
        debug!("Saved link {} for {}", link.id, user_id);
        decode(stored)
    }

    /// Links for one view
    ///
    /// Top view: up to the limit, newest first. Swipe: the user's links with
    /// no action recorded yet, newest first.
    pub async fn fetch_links(&self, user_id: &str, purpose: LinkPurpose) -> Result<Vec<Link>> {
        let query = RowQuery::table(LINKS_TABLE)
            .eq("user_id", user_id)
            .order_by("created_at", true);

        match purpose {
            LinkPurpose::TopView => {
                let rows = self.rows.select(&query.limit(self.link_limit)).await?;
                decode_all(rows)
            }
            LinkPurpose::Swipe => {
                let links: Vec<Link> = decode_all(self.rows.select(&query).await?)?;
                let triaged: HashSet<String> = self
                    .action_records(user_id, None)
                    .await?
                    .into_iter()
                    .map(|record| record.link_id)
                    .collect();

                Ok(links
                    .into_iter()
                    .filter(|link| !triaged.contains(&link.id))
                    .take(self.link_limit)
                    .collect())
            }
        }
    }

    /// Preview metadata for `url`; failures yield a placeholder
    pub async fn fetch_og_preview(&self, url: &str) -> OgPreview {
        match self.previews.fetch(url).await {
            Ok(preview) => preview,
            Err(e) => {
                warn!("Preview for {} unavailable: {}", url, e);
                OgPreview::placeholder(url)
            }
        }
    }

    /// Store an action for `link_id` in the action log
    pub async fn record_link_action(
        &self,
        user_id: &str,
        link_id: &str,
        action: LinkAction,
    ) -> Result<ActionRecord> {
        if link_id.is_empty() {
            return Err(LinkSwipeError::InvalidInput("link id is empty".to_string()));
        }

        let record = ActionRecord::new(user_id, link_id, action);
        let stored = self
            .rows
            .insert(LINK_ACTIONS_TABLE, serde_json::to_value(&record)?)
            .await?;
        debug!("Recorded {:?} on {} for {}", action, link_id, user_id);
        decode(stored)
    }

    /// Per-status totals of the user's action log
    pub async fn fetch_status_counts(&self, user_id: &str) -> Result<StatusCounts> {
        let records = self.action_records(user_id, None).await?;
        Ok(StatusCounts::from_records(&records))
    }

    /// Actions per day for the seven days ending `today`
    pub async fn fetch_weekly_activity(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<WeeklyActivity> {
        let records = self
            .action_records(user_id, Some(WeeklyActivity::window_start(today)))
            .await?;
        Ok(WeeklyActivity::from_records(&records, today))
    }

    async fn action_records(
        &self,
        user_id: &str,
        since: Option<NaiveDate>,
    ) -> Result<Vec<ActionRecord>> {
        let mut query = RowQuery::table(LINK_ACTIONS_TABLE).eq("user_id", user_id);
        if let Some(day) = since.and_then(|d| d.and_hms_opt(0, 0, 0)) {
            query = query.gte("created_at", Utc.from_utc_datetime(&day).to_rfc3339());
        }
        decode_all(self.rows.select(&query).await?)
    }
}

fn decode<T: DeserializeOwned>(row: Value) -> Result<T> {
    serde_json::from_value(row).map_err(LinkSwipeError::from)
}

fn decode_all<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter().map(decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryRowService;
    use async_trait::async_trait;

    struct NoPreviews;

    #[async_trait]
    impl PreviewFetcher for NoPreviews {
        async fn fetch(&self, url: &str) -> Result<OgPreview> {
            Err(LinkSwipeError::Fetch(format!("unreachable: {}", url)))
        }
    }

    fn repository() -> (Arc<MemoryRowService>, LinkRepository) {
        let rows = Arc::new(MemoryRowService::new());
        let repo = LinkRepository::new(rows.clone(), Arc::new(NoPreviews));
        (rows, repo)
    }

    #[tokio::test]
    async fn test_preview_failure_is_placeholder() {
        let (_, repo) = repository();
        let preview = repo.fetch_og_preview("https://down.example").await;
        assert!(preview.is_placeholder());
        assert_eq!(preview.url, "https://down.example");
    }

    #[tokio::test]
    async fn test_add_link_rejects_bad_url() {
        let (rows, repo) = repository();
        assert!(repo.add_link("u1", "javascript:alert(1)").await.is_err());
        assert!(rows.rows(LINKS_TABLE).await.is_empty());
    }

    #[tokio::test]
    async fn test_swipe_list_excludes_triaged_links() {
        let (_, repo) = repository();
        let first = repo.add_link("u1", "https://a.example").await.unwrap();
        let second = repo.add_link("u1", "https://b.example").await.unwrap();
        repo.add_link("u2", "https://c.example").await.unwrap();

        repo.record_link_action("u1", &first.id, LinkAction::Skip)
            .await
            .unwrap();

        let swipe = repo.fetch_links("u1", LinkPurpose::Swipe).await.unwrap();
        assert_eq!(swipe.len(), 1);
        assert_eq!(swipe[0].id, second.id);

        let top = repo.fetch_links("u1", LinkPurpose::TopView).await.unwrap();
        assert_eq!(top.len(), 2);
    }

    #[tokio::test]
    async fn test_link_limit() {
        let (_, repo) = repository();
        let repo = repo.with_link_limit(2);
        for i in 0..3 {
            repo.add_link("u1", &format!("https://{}.example", i))
                .await
                .unwrap();
        }

        let top = repo.fetch_links("u1", LinkPurpose::TopView).await.unwrap();
        assert_eq!(top.len(), 2);
    }

    #[tokio::test]
    async fn test_counts_and_weekly_activity() {
        let (_, repo) = repository();
        repo.record_link_action("u1", "l1", LinkAction::Like).await.unwrap();
        repo.record_link_action("u1", "l2", LinkAction::Favorite).await.unwrap();
        repo.record_link_action("u2", "l3", LinkAction::Like).await.unwrap();

        let counts = repo.fetch_status_counts("u1").await.unwrap();
        assert_eq!(counts.read_later, 1);
        assert_eq!(counts.favorite, 1);
        assert_eq!(counts.total(), 2);

        let today = Utc::now().date_naive();
        let weekly = repo.fetch_weekly_activity("u1", today).await.unwrap();
        assert_eq!(weekly.days[6], 2);
        assert_eq!(weekly.total(), 2);
    }

    #[tokio::test]
    async fn test_record_action_requires_link_id() {
        let (_, repo) = repository();
        assert!(matches!(
            repo.record_link_action("u1", "", LinkAction::Like).await,
            Err(LinkSwipeError::InvalidInput(_))
        ));
    }
}
