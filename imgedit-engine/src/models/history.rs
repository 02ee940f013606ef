//! Recently viewed image entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::SourceType;

/// Largest page `RecentHistoryCache::get` will return
pub const MAX_HISTORY_PAGE: usize = 50;

/// One image a terminal session has opened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub terminal_session_id: String,
    pub image_path: String,
    pub source_type: SourceType,
    pub thumbnail_path: Option<String>,
    pub last_viewed_at: DateTime<Utc>,
    pub view_count: i64,
    pub is_edited: bool,
}
