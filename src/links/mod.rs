//! Link domain: model types, preview fetching and remote data accessors

pub mod preview;
pub mod repository;
pub mod types;

pub use preview::{parse_http_url, parse_preview, HttpPreviewFetcher, PreviewFetcher};
pub use repository::{LinkRepository, DEFAULT_LINK_LIMIT};
pub use types::{
    ActionRecord, ActionStatus, Link, LinkAction, LinkPurpose, OgPreview, StatusCounts,
    WeeklyActivity,
};
