//! Async facade over the history database.
//!
//! Mutations are queued on the single writer connection and applied in the
//! order they were issued. Queries run on read-only connections and may lag
//! an in-flight write, but never see half of one. `delete_all` does not
//! coordinate with queries already running.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Utc};

use crate::{
    analytics::{
        bucket_by_weekday, AnalyticsField, AnalyticsReport, AnalyticsRequest, Calendar,
        NavigationPath, PageViewCount, ViewForest, WeekdayBucket,
    },
    config::StoreConfig,
    db::{
        Database, DatabaseTagCleanup, DeleteOutcome, DwellUpdate, ImportEntry, Item, ItemKey,
        SchemaMigrationFailed, Tag, TagCleanup, View, ViewId,
    },
    error::{HistoryError, HistoryResult},
    log_error, log_info,
};

const ENABLE_LOGS: bool = true;

#[derive(Clone)]
pub struct HistoryStore {
    db: Database,
    cleanup: Arc<dyn TagCleanup>,
    path_limit: Option<usize>,
}

impl HistoryStore {
    /// Build a store over an already opened database. Fails with
    /// `StoreUnavailable` when no database was supplied.
    pub fn new(db: Option<Database>, cleanup: Arc<dyn TagCleanup>) -> HistoryResult<Self> {
        let db = db.ok_or_else(|| {
            HistoryError::StoreUnavailable("no history database was supplied".into())
        })?;

        Ok(Self {
            db,
            cleanup,
            path_limit: None,
        })
    }

    /// Store whose tag cleanup runs against the same database.
    pub fn with_database(db: Database) -> Self {
        let cleanup = Arc::new(DatabaseTagCleanup::new(db.clone()));
        Self {
            db,
            cleanup,
            path_limit: None,
        }
    }

    /// Open the database at the configured path. A backend that cannot be
    /// opened is `StoreUnavailable`; a schema that cannot be migrated is
    /// `Storage`.
    pub fn open(config: &StoreConfig) -> HistoryResult<Self> {
        let db = Database::open(config).map_err(|err| {
            if err.downcast_ref::<SchemaMigrationFailed>().is_some() {
                HistoryError::Storage(err)
            } else {
                HistoryError::StoreUnavailable(format!(
                    "failed to open {}: {err:#}",
                    config.database_path.display()
                ))
            }
        })?;

        let mut store = Self::with_database(db);
        store.path_limit = config.path_limit;
        Ok(store)
    }

    pub fn with_path_limit(mut self, limit: Option<usize>) -> Self {
        self.path_limit = limit;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // Item registry

    pub async fn item(&self, key: &ItemKey) -> HistoryResult<Option<Item>> {
        Ok(self.db.find_item(key).await?)
    }

    pub async fn items(&self) -> HistoryResult<Vec<Item>> {
        Ok(self.db.list_items().await?)
    }

    /// Delete `item` iff no view references it anymore.
    pub async fn delete_item_if_orphan(&self, item: &Item) -> HistoryResult<bool> {
        Ok(self.db.delete_item_if_orphan(item.id).await?)
    }

    // View graph

    /// Record a visit to `key` now. A predecessor that no longer exists is
    /// ignored and the view starts a new session.
    pub async fn record_view(
        &self,
        key: &ItemKey,
        predecessor: Option<&ViewId>,
    ) -> HistoryResult<ViewId> {
        self.record_view_at(key, predecessor, Utc::now()).await
    }

    pub async fn record_view_at(
        &self,
        key: &ItemKey,
        predecessor: Option<&ViewId>,
        viewed_at: DateTime<Utc>,
    ) -> HistoryResult<ViewId> {
        Ok(self.db.insert_view(key, predecessor, viewed_at).await?)
    }

    /// Add whole seconds of `dwell` to the view's counter. A sum that would
    /// overflow is rejected and the counter keeps its value.
    pub async fn accumulate_dwell(&self, view_id: &ViewId, dwell: Duration) -> HistoryResult<()> {
        match self.db.add_view_dwell(view_id, dwell.as_secs()).await? {
            DwellUpdate::Applied => Ok(()),
            DwellUpdate::Missing => Err(HistoryError::not_found("view", view_id)),
            DwellUpdate::Overflow => Err(HistoryError::InvalidRequest(format!(
                "adding {}s to view {view_id} would overflow its dwell counter",
                dwell.as_secs()
            ))),
        }
    }

    pub async fn view(&self, view_id: &ViewId) -> HistoryResult<Option<View>> {
        Ok(self.db.get_view(view_id).await?)
    }

    /// Remove every view of `key` and, once orphaned, the item itself; then
    /// run tag cleanup. The deletion is committed before cleanup starts, so a
    /// `CleanupFailed` error leaves it in place.
    pub async fn delete_views_for_item(&self, key: &ItemKey) -> HistoryResult<DeleteOutcome> {
        let outcome = self.db.delete_views_for_item(key).await?;
        log_info!(
            "Deleted {} views for {key} (item removed: {})",
            outcome.views_removed,
            outcome.item_removed
        );

        if let Err(err) = self.cleanup.remove_unused_tags().await {
            log_error!("Tag cleanup after deleting {key} failed: {err:#}");
            return Err(HistoryError::CleanupFailed(err));
        }

        Ok(outcome)
    }

    /// Clear all views, items and tags.
    pub async fn delete_all(&self) -> HistoryResult<()> {
        let removed = self.db.delete_all_history().await?;
        log_info!("History reset; {removed} views removed");
        Ok(())
    }

    /// Load historical views with their original timestamps. Each becomes a
    /// root, whatever sessions already exist.
    pub async fn import_batch(&self, entries: Vec<ImportEntry>) -> HistoryResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let imported = self.db.import_views(entries).await?;
        log_info!("Imported {imported} historical views");
        Ok(imported)
    }

    // Tags

    pub async fn tag_item(&self, key: &ItemKey, tag: &str) -> HistoryResult<Tag> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(HistoryError::InvalidRequest("tag name must not be empty".into()));
        }

        self.db
            .tag_item(key, tag)
            .await?
            .ok_or_else(|| HistoryError::not_found("item", key))
    }

    pub async fn tags_for_item(&self, key: &ItemKey) -> HistoryResult<Vec<Tag>> {
        Ok(self.db.tags_for_item(key).await?)
    }

    pub async fn tags(&self) -> HistoryResult<Vec<Tag>> {
        Ok(self.db.list_tags().await?)
    }

    // Analytics

    /// Views per item with `start <= viewed_at <= end`, most viewed first.
    pub async fn counts_by_item(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> HistoryResult<Vec<PageViewCount>> {
        let counts = self.db.view_counts_by_item(start, end).await?;
        Ok(counts
            .into_iter()
            .map(|(item, count)| PageViewCount { item, count })
            .collect())
    }

    /// Views per weekday of `calendar` with `start <= viewed_at <= end`.
    pub async fn counts_by_weekday<Tz: TimeZone>(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        calendar: &Calendar<Tz>,
    ) -> HistoryResult<Vec<WeekdayBucket>> {
        let timestamps = self.db.view_timestamps_between(start, end).await?;
        Ok(bucket_by_weekday(&timestamps, calendar))
    }

    /// Every root-to-leaf path, with no bound on how many are produced.
    pub async fn all_navigation_paths(&self) -> HistoryResult<Vec<NavigationPath>> {
        self.paths_with_limit(None).await
    }

    /// Like [`Self::all_navigation_paths`] but stops after `limit` paths,
    /// falling back to the configured cap when `limit` is `None`.
    pub async fn navigation_paths(&self, limit: Option<usize>) -> HistoryResult<Vec<NavigationPath>> {
        self.paths_with_limit(limit.or(self.path_limit)).await
    }

    async fn paths_with_limit(&self, limit: Option<usize>) -> HistoryResult<Vec<NavigationPath>> {
        let views = self.db.list_views().await?;
        // Enumeration can be large; keep it off the async worker threads.
        let paths = tokio::task::spawn_blocking(move || ViewForest::build(views).paths(limit))
            .await
            .map_err(|err| HistoryError::Storage(anyhow::anyhow!("path enumeration failed: {err}")))?;
        Ok(paths)
    }

    pub async fn run_analytics<Tz: TimeZone>(
        &self,
        request: &AnalyticsRequest,
        calendar: &Calendar<Tz>,
    ) -> HistoryResult<AnalyticsReport> {
        let mut report = AnalyticsReport::default();

        for field in request.fields() {
            match field {
                AnalyticsField::ItemCounts => {
                    report.item_counts =
                        Some(self.counts_by_item(request.start(), request.end()).await?);
                }
                AnalyticsField::WeekdayCounts => {
                    report.weekday_counts = Some(
                        self.counts_by_weekday(request.start(), request.end(), calendar)
                            .await?,
                    );
                }
                AnalyticsField::NavigationPaths => {
                    report.navigation_paths = Some(self.navigation_paths(None).await?);
                }
            }
        }

        Ok(report)
    }
}
