use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category attached to items; removed once no item carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}
