//! Derived, read-only views over the history: per-item counts, weekday
//! distribution and navigation paths.

pub mod calendar;
pub mod paths;
pub mod request;

use serde::{Deserialize, Serialize};

use crate::db::models::Item;

pub use calendar::{bucket_by_weekday, Calendar, WeekdayBucket};
pub use paths::{NavigationPath, ViewForest};
pub use request::{AnalyticsField, AnalyticsReport, AnalyticsRequest};

/// Number of views of one item within a time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageViewCount {
    pub item: Item,
    pub count: u64,
}

impl PageViewCount {
    pub fn id(&self) -> String {
        self.item.key.identity()
    }
}
