//! Item records: the canonical content entity a view points at.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const IDENTITY_SEPARATOR: char = '~';

/// Identity of an item: `(source, namespace, title)`.
///
/// Titles are normalized on construction (trimmed, spaces turned into
/// underscores) so that display and URL forms of a title resolve to the same
/// item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemKey {
    pub source: String,
    pub namespace: i32,
    pub title: String,
}

impl ItemKey {
    pub fn new(source: impl Into<String>, namespace: i32, title: impl AsRef<str>) -> Self {
        Self {
            source: source.into(),
            namespace,
            title: normalize_title(title.as_ref()),
        }
    }

    /// Stable string form `source~namespace~title`, usable as a cache or log key.
    pub fn identity(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.source,
            self.namespace,
            self.title,
            sep = IDENTITY_SEPARATOR
        )
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity())
    }
}

pub fn normalize_title(title: &str) -> String {
    title.trim().replace(' ', "_")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: i64,
    pub key: ItemKey,
    pub last_seen_at: DateTime<Utc>,
}
