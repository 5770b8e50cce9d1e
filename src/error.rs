use thiserror::Error;

use crate::db::{TimestampOutOfRange, WorkerUnavailable};

#[derive(Debug, Error)]
pub enum HistoryError {
    /// The backing database was never supplied or its workers are gone.
    #[error("history store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The deletion itself was committed; only the downstream cleanup failed.
    #[error("tag cleanup failed after deletion: {0:#}")]
    CleanupFailed(#[source] anyhow::Error),

    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl HistoryError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<anyhow::Error> for HistoryError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(unavailable) = err.downcast_ref::<WorkerUnavailable>() {
            return Self::StoreUnavailable(unavailable.to_string());
        }
        if let Some(out_of_range) = err.downcast_ref::<TimestampOutOfRange>() {
            return Self::InvalidRequest(out_of_range.to_string());
        }
        Self::Storage(err)
    }
}

pub type HistoryResult<T> = std::result::Result<T, HistoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_workers_map_to_store_unavailable() {
        let err = anyhow::Error::new(WorkerUnavailable("navhistory-db-writer".into()));
        assert!(matches!(
            HistoryError::from(err),
            HistoryError::StoreUnavailable(message) if message.contains("navhistory-db-writer")
        ));
    }

    #[test]
    fn unstorable_timestamps_are_invalid_requests() {
        use chrono::{TimeZone, Utc};

        let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();
        let err = anyhow::Error::new(TimestampOutOfRange(far)).context("failed to record view");
        assert!(matches!(HistoryError::from(err), HistoryError::InvalidRequest(_)));
    }

    #[test]
    fn other_failures_are_propagated_as_storage_errors() {
        let err = anyhow::anyhow!("disk I/O error");
        assert!(matches!(HistoryError::from(err), HistoryError::Storage(_)));
    }
}
