use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, storable_timestamp},
    models::{Item, ItemKey},
};

const ITEM_COLUMNS: &str = "id, source, namespace, title, last_seen_at";

pub(crate) fn row_to_item(row: &Row) -> Result<Item> {
    let last_seen_at: String = row.get("last_seen_at")?;

    Ok(Item {
        id: row.get("id")?,
        key: ItemKey {
            source: row.get("source")?,
            namespace: row.get("namespace")?,
            title: row.get("title")?,
        },
        last_seen_at: parse_datetime(&last_seen_at, "last_seen_at")?,
    })
}

/// Find-or-create access to items. Callers run it on the writer connection,
/// which is what keeps two resolutions of the same new key from racing.
pub struct ItemRepository<'a> {
    conn: &'a Connection,
}

impl<'a> ItemRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Resolve the item for `key`, creating it on first use. Every call sets
    /// the last-seen timestamp to `seen_at`, including an older one from an
    /// import.
    pub fn resolve(&self, key: &ItemKey, seen_at: DateTime<Utc>) -> Result<Item> {
        let seen_at = storable_timestamp(&seen_at)?;
        self.conn.execute(
            "INSERT INTO items (source, namespace, title, last_seen_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source, namespace, title) DO UPDATE SET
                 last_seen_at = excluded.last_seen_at",
            params![key.source, key.namespace, key.title, seen_at],
        )?;

        self.find(key)?
            .ok_or_else(|| anyhow!("item {key} not found after upsert"))
    }

    pub fn find(&self, key: &ItemKey) -> Result<Option<Item>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM items
             WHERE source = ?1 AND namespace = ?2 AND title = ?3"
        ))?;
        let mut rows = stmt.query(params![key.source, key.namespace, key.title])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_item(row)?)),
            None => Ok(None),
        }
    }

    /// Delete the item iff no view references it. Returns whether it was deleted.
    pub fn delete_if_orphan(&self, item_id: i64) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM items
             WHERE id = ?1
               AND NOT EXISTS (SELECT 1 FROM views WHERE views.item_id = ?1)",
            params![item_id],
        )?;
        Ok(removed > 0)
    }

    pub fn list(&self) -> Result<Vec<Item>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM items
             ORDER BY last_seen_at DESC, id ASC"
        ))?;

        let mut rows = stmt.query([])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(row_to_item(row)?);
        }
        Ok(items)
    }
}

impl Database {
    pub async fn find_item(&self, key: &ItemKey) -> Result<Option<Item>> {
        let key = key.clone();
        self.read(move |conn| ItemRepository::new(conn).find(&key))
            .await
    }

    pub async fn delete_item_if_orphan(&self, item_id: i64) -> Result<bool> {
        self.execute(move |conn| ItemRepository::new(conn).delete_if_orphan(item_id))
            .await
    }

    pub async fn list_items(&self) -> Result<Vec<Item>> {
        self.read(|conn| ItemRepository::new(conn).list()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{helpers::TimestampOutOfRange, migrations::run_migrations};
    use chrono::{Duration, TimeZone};

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        run_migrations(&mut conn).unwrap();
        conn
    }

    #[test]
    fn resolve_creates_once_and_refreshes_last_seen() {
        let conn = conn();
        let repo = ItemRepository::new(&conn);
        let key = ItemKey::new("enwiki", 0, "Cat");
        let first_seen = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let created = repo.resolve(&key, first_seen).unwrap();
        let again = repo.resolve(&key, first_seen + Duration::hours(1)).unwrap();

        assert_eq!(created.id, again.id);
        assert_eq!(again.last_seen_at, first_seen + Duration::hours(1));
        assert_eq!(repo.list().unwrap().len(), 1);

        let backdated = repo.resolve(&key, first_seen - Duration::days(30)).unwrap();
        assert_eq!(backdated.id, created.id);
        assert_eq!(backdated.last_seen_at, first_seen - Duration::days(30));
    }

    #[test]
    fn unstorable_timestamp_leaves_no_item_behind() {
        let conn = conn();
        let repo = ItemRepository::new(&conn);
        let far = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();

        let err = repo.resolve(&ItemKey::new("enwiki", 0, "Cat"), far).unwrap_err();
        assert!(err.downcast_ref::<TimestampOutOfRange>().is_some());
        assert!(repo.list().unwrap().is_empty());
    }

    #[test]
    fn distinct_namespaces_are_distinct_items() {
        let conn = conn();
        let repo = ItemRepository::new(&conn);
        let now = Utc::now();

        let article = repo.resolve(&ItemKey::new("enwiki", 0, "Cat"), now).unwrap();
        let talk = repo.resolve(&ItemKey::new("enwiki", 1, "Cat"), now).unwrap();
        assert_ne!(article.id, talk.id);
    }

    #[test]
    fn orphan_check_respects_remaining_views() {
        let conn = conn();
        let repo = ItemRepository::new(&conn);
        let item = repo.resolve(&ItemKey::new("enwiki", 0, "Dog"), Utc::now()).unwrap();

        conn.execute(
            "INSERT INTO views (id, item_id, viewed_at) VALUES ('v1', ?1, '2024-01-01T00:00:00.000000000Z')",
            params![item.id],
        )
        .unwrap();
        assert!(!repo.delete_if_orphan(item.id).unwrap());
        assert_eq!(repo.list().unwrap().len(), 1);

        conn.execute("DELETE FROM views", []).unwrap();
        assert!(repo.delete_if_orphan(item.id).unwrap());
        assert!(repo.list().unwrap().is_empty());
    }
}
