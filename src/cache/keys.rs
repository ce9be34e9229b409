//! Cache key families used by the link triage views

use crate::cache::invalidation::KeyMatcher;
use crate::cache::types::CacheKey;
use crate::links::LinkPurpose;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const WEEKLY_ACTIVITY: &str = "weekly-activity";
pub const ACTION_LOG: &str = "action-log";
pub const STATUS_COUNTS: &str = "status-counts";
pub const OG_PREVIEW: &str = "og-preview";

/// Per-user seven day activity aggregate
pub fn weekly_activity(user_id: &str) -> CacheKey {
    CacheKey::builder(WEEKLY_ACTIVITY).segment(user_id).build()
}

/// Per-user action-log status counts
pub fn status_counts(user_id: &str) -> CacheKey {
    CacheKey::builder(ACTION_LOG)
        .segment(STATUS_COUNTS)
        .segment(user_id)
        .build()
}

/// Link list for one purpose
///
/// The top view list is the plain key `links-top-view`; the row service
/// already scopes it to the signed-in user. The swipe list carries the user.
pub fn link_list(purpose: LinkPurpose, user_id: &str) -> CacheKey {
    let name = format!("links-{}", purpose);
    match purpose {
        LinkPurpose::TopView => CacheKey::plain(name),
        LinkPurpose::Swipe => CacheKey::builder(name).segment(user_id).build(),
    }
}

/// OG metadata for one URL
pub fn og_preview(url: &str) -> CacheKey {
    CacheKey::builder(OG_PREVIEW).segment(url).build()
}

/// A named group of keys that is invalidated together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyFamily {
    WeeklyActivity,
    ActionLogStatusCounts,
    LinkList(LinkPurpose),
    OgPreview,
}

impl KeyFamily {
    /// Matcher selecting this family's keys for `user_id`
    ///
    /// OG previews are not per user; the matcher covers every cached URL.
    pub fn matcher(&self, user_id: &str) -> KeyMatcher {
        match self {
            KeyFamily::WeeklyActivity => KeyMatcher::Exact(weekly_activity(user_id)),
            KeyFamily::ActionLogStatusCounts => KeyMatcher::Exact(status_counts(user_id)),
            KeyFamily::LinkList(purpose) => KeyMatcher::Exact(link_list(*purpose, user_id)),
            KeyFamily::OgPreview => KeyMatcher::namespace(OG_PREVIEW),
        }
    }
}

impl fmt::Display for KeyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyFamily::WeeklyActivity => write!(f, "weekly_activity"),
            KeyFamily::ActionLogStatusCounts => write!(f, "action_log_status_counts"),
            KeyFamily::LinkList(purpose) => write!(f, "link_list:{}", purpose),
            KeyFamily::OgPreview => write!(f, "og_preview"),
        }
    }
}
