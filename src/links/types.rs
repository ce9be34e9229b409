//! Link triage domain types

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Row table holding saved links
pub const LINKS_TABLE: &str = "links";

/// Row table holding the action log
pub const LINK_ACTIONS_TABLE: &str = "link_actions";

/// A saved link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub user_id: String,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Link {
    /// Create a new link owned by `user_id`
    pub fn new(user_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            url: url.into(),
            title: None,
            description: None,
            image_url: None,
            created_at: Utc::now(),
        }
    }

    /// Copy preview metadata onto the link
    pub fn with_preview(mut self, preview: &OgPreview) -> Self {
        self.title = preview.title.clone();
        self.description = preview.description.clone();
        self.image_url = preview.images.first().cloned();
        self
    }
}

/// Which view a link list feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkPurpose {
    /// Most recent links, newest first
    TopView,

    /// Links not yet triaged, fed to the swipe deck
    Swipe,
}

impl LinkPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPurpose::TopView => "top-view",
            LinkPurpose::Swipe => "swipe",
        }
    }
}

impl fmt::Display for LinkPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user did with a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkAction {
    Like,
    Skip,
    Favorite,
}

impl LinkAction {
    /// Read-later bucket the action files the link into
    pub fn status(&self) -> ActionStatus {
        match self {
            LinkAction::Like => ActionStatus::ReadLater,
            LinkAction::Skip => ActionStatus::Skipped,
            LinkAction::Favorite => ActionStatus::Favorite,
        }
    }
}

/// Bucket stored in the action log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    ReadLater,
    Skipped,
    Favorite,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::ReadLater => "read_later",
            ActionStatus::Skipped => "skipped",
            ActionStatus::Favorite => "favorite",
        }
    }
}

/// One action-log row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub user_id: String,
    pub link_id: String,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
}

impl ActionRecord {
    pub fn new(user_id: impl Into<String>, link_id: impl Into<String>, action: LinkAction) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            link_id: link_id.into(),
            status: action.status(),
            created_at: Utc::now(),
        }
    }
}

/// Per-status totals of a user's action log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub read_later: u32,
    pub skipped: u32,
    pub favorite: u32,
}

impl StatusCounts {
    pub fn from_records(records: &[ActionRecord]) -> Self {
        records.iter().fold(Self::default(), |mut counts, record| {
            match record.status {
                ActionStatus::ReadLater => counts.read_later += 1,
                ActionStatus::Skipped => counts.skipped += 1,
                ActionStatus::Favorite => counts.favorite += 1,
            }
            counts
        })
    }

    pub fn total(&self) -> u32 {
        self.read_later + self.skipped + self.favorite
    }
}

/// Actions per day over the seven days ending today
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyActivity {
    /// First day of the window (today - 6)
    pub week_start: NaiveDate,

    /// `days[i]` counts actions on `week_start + i`
    pub days: [u32; 7],
}

impl WeeklyActivity {
    /// First day of the window ending on `today`
    pub fn window_start(today: NaiveDate) -> NaiveDate {
        today - Duration::days(6)
    }

    /// Bucket `records` by UTC day; records outside the window are ignored
    pub fn from_records(records: &[ActionRecord], today: NaiveDate) -> Self {
        let week_start = Self::window_start(today);
        let mut days = [0u32; 7];

        for record in records {
            let offset = (record.created_at.date_naive() - week_start).num_days();
            if (0..7).contains(&offset) {
                days[offset as usize] += 1;
            }
        }

        Self { week_start, days }
    }

    pub fn total(&self) -> u32 {
        self.days.iter().sum()
    }

    /// Day with the most actions, if any action happened
    pub fn busiest_day(&self) -> Option<NaiveDate> {
        let (index, count) = self
            .days
            .iter()
            .enumerate()
            .max_by_key(|(i, count)| (**count, std::cmp::Reverse(*i)))?;
        if *count == 0 {
            return None;
        }
        Some(self.week_start + Duration::days(index as i64))
    }
}

/// Metadata extracted from a page's markup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OgPreview {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub favicons: Vec<String>,
}

impl OgPreview {
    /// Empty preview shown when the page can't be fetched or parsed
    pub fn placeholder(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.images.is_empty()
            && self.favicons.is_empty()
    }
}
