use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, range_bound, storable_timestamp, to_u64},
    models::{ImportEntry, Item, ItemKey, View, ViewId},
    repositories::{items::row_to_item, tags::TagRepository, ItemRepository},
};
use crate::log_debug;

const ENABLE_LOGS: bool = true;

const VIEW_SELECT: &str = "SELECT v.id AS id,
        v.item_id AS item_id,
        i.source AS source,
        i.namespace AS namespace,
        i.title AS title,
        v.predecessor_id AS predecessor_id,
        v.viewed_at AS viewed_at,
        v.dwell_secs AS dwell_secs
     FROM views v
     JOIN items i ON i.id = v.item_id";

fn row_to_view(row: &Row) -> Result<View> {
    let id: String = row.get("id")?;
    let predecessor_id: Option<String> = row.get("predecessor_id")?;
    let viewed_at: String = row.get("viewed_at")?;
    let dwell_secs: i64 = row.get("dwell_secs")?;

    Ok(View {
        id: ViewId::from(id),
        item_id: row.get("item_id")?,
        item: ItemKey {
            source: row.get("source")?,
            namespace: row.get("namespace")?,
            title: row.get("title")?,
        },
        predecessor_id: predecessor_id.map(ViewId::from),
        viewed_at: parse_datetime(&viewed_at, "viewed_at")?,
        dwell_secs: to_u64(dwell_secs, "dwell_secs")?,
    })
}

/// Outcome of adding dwell time to a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwellUpdate {
    Applied,
    /// No view with that id exists.
    Missing,
    /// The counter would exceed the INTEGER range; it was left unchanged.
    Overflow,
}

/// Result of removing one item's history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub views_removed: usize,
    pub item_removed: bool,
}

pub struct ViewRepository<'a> {
    conn: &'a Connection,
}

impl<'a> ViewRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a view of `item_id`. A predecessor that does not exist (never
    /// did, or was deleted meanwhile) is dropped and the view becomes a root.
    pub fn insert(
        &self,
        item_id: i64,
        predecessor: Option<&ViewId>,
        viewed_at: DateTime<Utc>,
    ) -> Result<ViewId> {
        let predecessor = match predecessor {
            Some(candidate) if self.exists(candidate)? => Some(candidate.as_str()),
            Some(candidate) => {
                log_debug!("predecessor view {candidate} not found; recording a root view");
                None
            }
            None => None,
        };

        let viewed_at = storable_timestamp(&viewed_at)?;
        let id = ViewId::new();
        self.conn.execute(
            "INSERT INTO views (id, item_id, predecessor_id, viewed_at, dwell_secs)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![id.as_str(), item_id, predecessor, viewed_at],
        )?;
        Ok(id)
    }

    pub fn exists(&self, id: &ViewId) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM views WHERE id = ?1",
                params![id.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Add `seconds` to the view's dwell counter in a single statement. The
    /// guard keeps SQLite from promoting an overflowing sum to REAL.
    pub fn add_dwell(&self, id: &ViewId, seconds: u64) -> Result<DwellUpdate> {
        let updated = match i64::try_from(seconds) {
            Ok(seconds) => self.conn.execute(
                "UPDATE views SET dwell_secs = dwell_secs + ?1
                 WHERE id = ?2 AND dwell_secs <= 9223372036854775807 - ?1",
                params![seconds, id.as_str()],
            )?,
            Err(_) => 0,
        };

        if updated > 0 {
            Ok(DwellUpdate::Applied)
        } else if self.exists(id)? {
            Ok(DwellUpdate::Overflow)
        } else {
            Ok(DwellUpdate::Missing)
        }
    }

    pub fn get(&self, id: &ViewId) -> Result<Option<View>> {
        let mut stmt = self.conn.prepare(&format!("{VIEW_SELECT} WHERE v.id = ?1"))?;
        let mut rows = stmt.query(params![id.as_str()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_view(row)?)),
            None => Ok(None),
        }
    }

    /// Deletes every view of the item. Successors in other chains keep
    /// existing; the foreign key clears their predecessor link.
    pub fn delete_for_item(&self, item_id: i64) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM views WHERE item_id = ?1", params![item_id])?;
        Ok(removed)
    }

    pub fn all(&self) -> Result<Vec<View>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{VIEW_SELECT} ORDER BY v.viewed_at ASC, v.id ASC"))?;

        let mut rows = stmt.query([])?;
        let mut views = Vec::new();
        while let Some(row) = rows.next()? {
            views.push(row_to_view(row)?);
        }
        Ok(views)
    }

    pub fn timestamps_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let mut stmt = self.conn.prepare(
            "SELECT viewed_at FROM views
             WHERE viewed_at >= ?1 AND viewed_at <= ?2
             ORDER BY viewed_at ASC",
        )?;

        let mut rows = stmt.query(params![range_bound(&start), range_bound(&end)])?;
        let mut timestamps = Vec::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            timestamps.push(parse_datetime(&raw, "viewed_at")?);
        }
        Ok(timestamps)
    }

    pub fn counts_by_item(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(Item, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT i.id AS id,
                    i.source AS source,
                    i.namespace AS namespace,
                    i.title AS title,
                    i.last_seen_at AS last_seen_at,
                    COUNT(v.id) AS view_count
             FROM views v
             JOIN items i ON i.id = v.item_id
             WHERE v.viewed_at >= ?1 AND v.viewed_at <= ?2
             GROUP BY i.id
             ORDER BY view_count DESC, i.source ASC, i.namespace ASC, i.title ASC",
        )?;

        let mut rows = stmt.query(params![range_bound(&start), range_bound(&end)])?;
        let mut counts = Vec::new();
        while let Some(row) = rows.next()? {
            let count: i64 = row.get("view_count")?;
            counts.push((row_to_item(row)?, to_u64(count, "view_count")?));
        }
        Ok(counts)
    }
}

impl Database {
    /// Resolve the item and append a view in one transaction.
    pub async fn insert_view(
        &self,
        key: &ItemKey,
        predecessor: Option<&ViewId>,
        viewed_at: DateTime<Utc>,
    ) -> Result<ViewId> {
        let key = key.clone();
        let predecessor = predecessor.cloned();
        self.execute(move |conn| {
            let tx = conn.transaction().context("failed to open view transaction")?;
            let item = ItemRepository::new(&tx).resolve(&key, viewed_at)?;
            let id = ViewRepository::new(&tx).insert(item.id, predecessor.as_ref(), viewed_at)?;
            tx.commit().context("failed to commit view")?;
            Ok(id)
        })
        .await
    }

    pub async fn add_view_dwell(&self, id: &ViewId, seconds: u64) -> Result<DwellUpdate> {
        let id = id.clone();
        self.execute(move |conn| ViewRepository::new(conn).add_dwell(&id, seconds))
            .await
    }

    pub async fn get_view(&self, id: &ViewId) -> Result<Option<View>> {
        let id = id.clone();
        self.read(move |conn| ViewRepository::new(conn).get(&id))
            .await
    }

    /// Delete all views of the item identified by `key`, then the item itself
    /// if it was orphaned. Both steps commit together.
    pub async fn delete_views_for_item(&self, key: &ItemKey) -> Result<DeleteOutcome> {
        let key = key.clone();
        self.execute(move |conn| {
            let tx = conn.transaction().context("failed to open delete transaction")?;
            let items = ItemRepository::new(&tx);
            let Some(item) = items.find(&key)? else {
                return Ok(DeleteOutcome::default());
            };

            let views_removed = ViewRepository::new(&tx).delete_for_item(item.id)?;
            let item_removed = items.delete_if_orphan(item.id)?;
            tx.commit().context("failed to commit view deletion")?;

            Ok(DeleteOutcome {
                views_removed,
                item_removed,
            })
        })
        .await
    }

    /// Clear views, items and tags in a single transaction.
    pub async fn delete_all_history(&self) -> Result<usize> {
        self.execute(|conn| {
            let tx = conn.transaction().context("failed to open reset transaction")?;
            // Links first so predecessor SET NULL actions have nothing to rewrite.
            tx.execute("UPDATE views SET predecessor_id = NULL", [])?;
            let views_removed = tx.execute("DELETE FROM views", [])?;
            TagRepository::new(&tx).delete_all()?;
            tx.execute("DELETE FROM items", [])?;
            tx.commit().context("failed to commit history reset")?;
            Ok(views_removed)
        })
        .await
    }

    /// Bulk load historical views. Every imported view is a root and keeps
    /// its given timestamp.
    pub async fn import_views(&self, entries: Vec<ImportEntry>) -> Result<usize> {
        self.execute(move |conn| {
            let tx = conn.transaction().context("failed to open import transaction")?;
            {
                let items = ItemRepository::new(&tx);
                let views = ViewRepository::new(&tx);
                for entry in &entries {
                    let item = items.resolve(&entry.key, entry.viewed_at)?;
                    views.insert(item.id, None, entry.viewed_at)?;
                }
            }
            tx.commit().context("failed to commit import")?;
            Ok(entries.len())
        })
        .await
    }

    pub async fn list_views(&self) -> Result<Vec<View>> {
        self.read(|conn| ViewRepository::new(conn).all()).await
    }

    pub async fn view_timestamps_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        self.read(move |conn| ViewRepository::new(conn).timestamps_between(start, end))
            .await
    }

    pub async fn view_counts_by_item(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(Item, u64)>> {
        self.read(move |conn| ViewRepository::new(conn).counts_by_item(start, end))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;
    use chrono::{Duration, TimeZone};

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        run_migrations(&mut conn).unwrap();
        conn
    }

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, hour, 0, 0).unwrap()
    }

    #[test]
    fn unknown_predecessor_yields_root() {
        let conn = conn();
        let item = ItemRepository::new(&conn)
            .resolve(&ItemKey::new("enwiki", 0, "A"), t(1))
            .unwrap();
        let views = ViewRepository::new(&conn);

        let id = views
            .insert(item.id, Some(&ViewId::from("missing")), t(1))
            .unwrap();
        let view = views.get(&id).unwrap().unwrap();
        assert!(view.is_root());
    }

    #[test]
    fn dwell_accumulates_and_reports_missing_views() {
        let conn = conn();
        let item = ItemRepository::new(&conn)
            .resolve(&ItemKey::new("enwiki", 0, "A"), t(1))
            .unwrap();
        let views = ViewRepository::new(&conn);
        let id = views.insert(item.id, None, t(1)).unwrap();

        assert_eq!(views.add_dwell(&id, 5).unwrap(), DwellUpdate::Applied);
        assert_eq!(views.add_dwell(&id, 7).unwrap(), DwellUpdate::Applied);
        assert_eq!(views.get(&id).unwrap().unwrap().dwell_secs, 12);
        assert_eq!(
            views.add_dwell(&ViewId::from("gone"), 1).unwrap(),
            DwellUpdate::Missing
        );
    }

    #[test]
    fn dwell_overflow_leaves_counter_readable() {
        let conn = conn();
        let item = ItemRepository::new(&conn)
            .resolve(&ItemKey::new("enwiki", 0, "A"), t(1))
            .unwrap();
        let views = ViewRepository::new(&conn);
        let id = views.insert(item.id, None, t(1)).unwrap();

        let max = i64::MAX as u64;
        assert_eq!(views.add_dwell(&id, max).unwrap(), DwellUpdate::Applied);
        assert_eq!(views.add_dwell(&id, 10).unwrap(), DwellUpdate::Overflow);
        assert_eq!(views.add_dwell(&id, u64::MAX).unwrap(), DwellUpdate::Overflow);
        assert_eq!(views.add_dwell(&id, 0).unwrap(), DwellUpdate::Applied);
        assert_eq!(views.get(&id).unwrap().unwrap().dwell_secs, max);
        assert_eq!(views.all().unwrap().len(), 1);
        assert_eq!(
            views.add_dwell(&ViewId::from("gone"), u64::MAX).unwrap(),
            DwellUpdate::Missing
        );
    }

    #[test]
    fn timestamps_keep_nanoseconds_and_bound_exactly() {
        let conn = conn();
        let item = ItemRepository::new(&conn)
            .resolve(&ItemKey::new("enwiki", 0, "A"), t(1))
            .unwrap();
        let views = ViewRepository::new(&conn);
        let viewed_at = t(1) + Duration::nanoseconds(100);
        let id = views.insert(item.id, None, viewed_at).unwrap();

        assert_eq!(views.get(&id).unwrap().unwrap().viewed_at, viewed_at);
        assert!(views
            .counts_by_item(t(1) + Duration::nanoseconds(900), t(2))
            .unwrap()
            .is_empty());
        assert_eq!(views.timestamps_between(viewed_at, viewed_at).unwrap(), vec![viewed_at]);
    }

    #[test]
    fn deleting_a_predecessor_detaches_successors() {
        let conn = conn();
        let items = ItemRepository::new(&conn);
        let a = items.resolve(&ItemKey::new("enwiki", 0, "A"), t(1)).unwrap();
        let b = items.resolve(&ItemKey::new("enwiki", 0, "B"), t(2)).unwrap();
        let views = ViewRepository::new(&conn);

        let root = views.insert(a.id, None, t(1)).unwrap();
        let child = views.insert(b.id, Some(&root), t(2)).unwrap();

        assert_eq!(views.delete_for_item(a.id).unwrap(), 1);
        let child = views.get(&child).unwrap().unwrap();
        assert!(child.is_root());
    }

    #[test]
    fn range_queries_are_inclusive() {
        let conn = conn();
        let items = ItemRepository::new(&conn);
        let a = items.resolve(&ItemKey::new("enwiki", 0, "A"), t(1)).unwrap();
        let b = items.resolve(&ItemKey::new("enwiki", 0, "B"), t(1)).unwrap();
        let views = ViewRepository::new(&conn);
        views.insert(a.id, None, t(1)).unwrap();
        views.insert(a.id, None, t(2)).unwrap();
        views.insert(b.id, None, t(3)).unwrap();
        views.insert(b.id, None, t(3) + Duration::seconds(1)).unwrap();

        let counts = views.counts_by_item(t(1), t(3)).unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].0.key.title, "A");
        assert_eq!(counts[0].1, 2);
        assert_eq!(counts[1].1, 1);

        assert_eq!(views.timestamps_between(t(2), t(3)).unwrap().len(), 2);
        assert!(views.counts_by_item(t(3), t(1)).unwrap().is_empty());
    }
}
