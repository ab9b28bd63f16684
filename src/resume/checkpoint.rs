//! Cursor and checkpoint types for resume capability

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::UnitId;

/// Current checkpoint schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Position inside a unit's paged listing
///
/// `page` counts the pages committed so far and is the ordered part of the
/// cursor; `token` is the remote page token needed to fetch the next page
/// (`None` before the first page). Cursors compare by `page` only.
///
/// Playlist units page twice: `token` points at the playlist items page
/// being walked and `video` at the comment page of the current item.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Pages committed so far
    pub page: u64,
    /// Remote token of the next page to fetch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Position inside the current playlist item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoCursor>,
}

/// Comment position inside one playlist item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCursor {
    /// Index of the item on the current playlist items page
    pub item: usize,
    /// Video the item pointed at when the position was recorded
    pub video_id: String,
    /// Token of the video's next comment page, `None` for its first page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Cursor {
    /// Cursor of a unit that has not committed anything yet
    pub fn start() -> Self {
        Self {
            page: 0,
            token: None,
            video: None,
        }
    }

    /// Cursor after committing the current page
    pub fn next(&self, token: Option<String>) -> Self {
        Self {
            page: self.page + 1,
            token,
            video: None,
        }
    }

    /// Cursor after committing a comment page of a playlist item
    pub fn next_in_playlist(&self, video: Option<VideoCursor>) -> Self {
        Self {
            page: self.page + 1,
            token: self.token.clone(),
            video,
        }
    }

    /// Whether the listing ended at this cursor
    ///
    /// Only meaningful for single-level listings; a playlist position with
    /// no items token is still on its first items page.
    pub fn is_exhausted(&self) -> bool {
        self.page > 0 && self.token.is_none() && self.video.is_none()
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.page == other.page
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.page.cmp(&other.page)
    }
}

/// Where a unit continues from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumePoint {
    /// Nothing recorded yet
    Start,
    /// Continue after this cursor
    At(Cursor),
}

impl ResumePoint {
    /// Cursor to fetch from next
    pub fn cursor(&self) -> Cursor {
        match self {
            ResumePoint::Start => Cursor::start(),
            ResumePoint::At(cursor) => cursor.clone(),
        }
    }
}

/// Durable progress record of one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressCheckpoint {
    pub(crate) schema_version: String,
    /// Unit this checkpoint belongs to
    pub unit_id: UnitId,
    /// Last durably committed position
    pub cursor: Cursor,
    /// Records delivered to the sink so far
    pub processed_count: u64,
    /// Terminal completion flag
    pub completed: bool,
    /// First checkpoint write
    pub created_at: DateTime<Utc>,
    /// Last checkpoint write
    pub updated_at: DateTime<Utc>,
}

impl ProgressCheckpoint {
    /// Fresh checkpoint at the start of a unit
    pub fn new(unit_id: UnitId) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            unit_id,
            cursor: Cursor::start(),
            processed_count: 0,
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Schema version this checkpoint was written with
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }
}
