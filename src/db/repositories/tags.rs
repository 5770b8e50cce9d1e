use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_datetime},
    models::{ItemKey, Tag},
    repositories::ItemRepository,
};
use crate::log_info;

const ENABLE_LOGS: bool = true;

fn row_to_tag(row: &Row) -> Result<Tag> {
    let created_at: String = row.get("created_at")?;

    Ok(Tag {
        id: row.get("id")?,
        name: row.get("name")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

pub struct TagRepository<'a> {
    conn: &'a Connection,
}

impl<'a> TagRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Link `item_id` to the tag named `name`, creating the tag if needed.
    pub fn attach(&self, item_id: i64, name: &str) -> Result<Tag> {
        self.conn.execute(
            "INSERT INTO tags (name, created_at) VALUES (?1, ?2)
             ON CONFLICT(name) DO NOTHING",
            params![name, format_timestamp(&Utc::now())],
        )?;

        let tag = self.conn.query_row(
            "SELECT id, name, created_at FROM tags WHERE name = ?1",
            params![name],
            |row| Ok(row_to_tag(row)),
        )??;

        self.conn.execute(
            "INSERT OR IGNORE INTO item_tags (item_id, tag_id) VALUES (?1, ?2)",
            params![item_id, tag.id],
        )?;
        Ok(tag)
    }

    pub fn for_item(&self, item_id: i64) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id AS id, t.name AS name, t.created_at AS created_at
             FROM tags t
             JOIN item_tags it ON it.tag_id = t.id
             WHERE it.item_id = ?1
             ORDER BY t.name ASC",
        )?;

        let mut rows = stmt.query(params![item_id])?;
        let mut tags = Vec::new();
        while let Some(row) = rows.next()? {
            tags.push(row_to_tag(row)?);
        }
        Ok(tags)
    }

    pub fn list(&self) -> Result<Vec<Tag>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM tags ORDER BY name ASC")?;

        let mut rows = stmt.query([])?;
        let mut tags = Vec::new();
        while let Some(row) = rows.next()? {
            tags.push(row_to_tag(row)?);
        }
        Ok(tags)
    }

    /// Delete tags no longer linked to any item. Returns how many were removed.
    pub fn remove_unused(&self) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM tags
             WHERE NOT EXISTS (SELECT 1 FROM item_tags WHERE item_tags.tag_id = tags.id)",
            [],
        )?;
        Ok(removed)
    }

    pub fn delete_all(&self) -> Result<()> {
        self.conn.execute("DELETE FROM item_tags", [])?;
        self.conn.execute("DELETE FROM tags", [])?;
        Ok(())
    }
}

/// Downstream cleanup run after an item's history is deleted.
#[async_trait]
pub trait TagCleanup: Send + Sync {
    async fn remove_unused_tags(&self) -> Result<()>;
}

/// Cleans up tags stored in the history database itself.
#[derive(Clone)]
pub struct DatabaseTagCleanup {
    db: Database,
}

impl DatabaseTagCleanup {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TagCleanup for DatabaseTagCleanup {
    async fn remove_unused_tags(&self) -> Result<()> {
        let removed = self
            .db
            .execute(|conn| TagRepository::new(conn).remove_unused())
            .await?;
        if removed > 0 {
            log_info!("Removed {removed} unused tags");
        }
        Ok(())
    }
}

impl Database {
    /// Tag an existing item. Returns `None` if the item does not exist.
    pub async fn tag_item(&self, key: &ItemKey, name: &str) -> Result<Option<Tag>> {
        let key = key.clone();
        let name = name.to_string();
        self.execute(move |conn| match ItemRepository::new(conn).find(&key)? {
            Some(item) => TagRepository::new(conn).attach(item.id, &name).map(Some),
            None => Ok(None),
        })
        .await
    }

    pub async fn tags_for_item(&self, key: &ItemKey) -> Result<Vec<Tag>> {
        let key = key.clone();
        self.read(move |conn| match ItemRepository::new(conn).find(&key)? {
            Some(item) => TagRepository::new(conn).for_item(item.id),
            None => Ok(Vec::new()),
        })
        .await
    }

    pub async fn list_tags(&self) -> Result<Vec<Tag>> {
        self.read(|conn| TagRepository::new(conn).list()).await
    }
}
