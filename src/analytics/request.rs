use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{NavigationPath, PageViewCount, WeekdayBucket};
use crate::error::{HistoryError, HistoryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnalyticsField {
    ItemCounts,
    WeekdayCounts,
    NavigationPaths,
}

/// A batch of analytic queries over one time range. Navigation paths are not
/// range-limited; they always cover the whole forest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsRequest {
    fields: BTreeSet<AnalyticsField>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl AnalyticsRequest {
    /// Rejects a request that asks for nothing.
    pub fn new(
        fields: impl IntoIterator<Item = AnalyticsField>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> HistoryResult<Self> {
        let fields: BTreeSet<AnalyticsField> = fields.into_iter().collect();
        if fields.is_empty() {
            return Err(HistoryError::InvalidRequest(
                "at least one analytics field is required".into(),
            ));
        }

        Ok(Self { fields, start, end })
    }

    pub fn wants(&self, field: AnalyticsField) -> bool {
        self.fields.contains(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = AnalyticsField> + '_ {
        self.fields.iter().copied()
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

/// Sections are `Some` exactly when the matching field was requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub item_counts: Option<Vec<PageViewCount>>,
    pub weekday_counts: Option<Vec<WeekdayBucket>>,
    pub navigation_paths: Option<Vec<NavigationPath>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_field_set_is_rejected() {
        let now = Utc::now();
        let err = AnalyticsRequest::new(Vec::new(), now, now).unwrap_err();
        assert!(matches!(err, HistoryError::InvalidRequest(_)));
    }

    #[test]
    fn duplicate_fields_collapse() {
        let now = Utc::now();
        let request = AnalyticsRequest::new(
            [AnalyticsField::WeekdayCounts, AnalyticsField::WeekdayCounts],
            now,
            now,
        )
        .unwrap();
        assert_eq!(request.fields().count(), 1);
        assert!(request.wants(AnalyticsField::WeekdayCounts));
        assert!(!request.wants(AnalyticsField::ItemCounts));
    }
}
