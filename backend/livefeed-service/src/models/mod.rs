/// Data models for the feed
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A single feed entry as persisted and served.
///
/// Older data files used `name`/`text`/`image` for the author, message and
/// attachment fields; those names are still accepted on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    #[serde(default, alias = "name")]
    pub author: String,
    #[serde(default, alias = "text")]
    pub message: String,
    /// Reference path of the attached file, e.g. `/uploads/<name>.png`
    #[serde(default, alias = "image", deserialize_with = "empty_as_none")]
    pub attachment_ref: Option<String>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub fn new(author: String, message: String, attachment_ref: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author,
            message,
            attachment_ref,
            created_at: Utc::now(),
        }
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// Point-in-time copy of the whole feed.
///
/// `version` grows by one on every cache refresh so that consumers can tell
/// which of two snapshots is newer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub version: u64,
    pub posts: Vec<Post>,
}

/// Binary upload handed to the pipeline along with a new post
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Vec<u8>,
    /// Client-side filename; only its extension is kept
    pub original_name: String,
}

/// Create request as received from HTTP or the push channel
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub author: Option<String>,
    pub message: Option<String>,
    pub image: Option<Upload>,
}
