//! Source enumeration: the papers to capture in a backup.
//!
//! `PaperStore` is the seam to the surrounding document repository. The
//! production implementation reads the application's `papers` table; tests
//! substitute in-memory stores.

use crate::backup::db::Database;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use sanitize_filename::sanitize;

/// One captured item: raw content plus its metadata record.
#[derive(Debug)]
pub struct PaperItem {
    /// Entry name inside the archive, already filesystem-safe.
    pub name: String,
    pub content: Vec<u8>,
    pub metadata: serde_json::Value,
}

pub trait PaperStore: Send + Sync {
    /// Lazy, finite enumeration. Items are fetched as the iterator advances,
    /// so a backup never holds the whole repository in memory.
    fn list_items(&self) -> Result<Box<dyn Iterator<Item = Result<PaperItem>> + Send>>;
}

pub struct SqlitePaperStore {
    db: Database,
}

impl SqlitePaperStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl PaperStore for SqlitePaperStore {
    fn list_items(&self) -> Result<Box<dyn Iterator<Item = Result<PaperItem>> + Send>> {
        // Ids up front, row content on demand.
        let ids: Vec<i64> = self
            .db
            .with(|conn| {
                let mut stmt = conn.prepare("SELECT id FROM papers ORDER BY id")?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<_>>()?;
                Ok(ids)
            })
            .with_msg("Enumerating papers failed")?;

        let db = self.db.clone();
        Ok(Box::new(ids.into_iter().map(move |id| fetch_item(&db, id))))
    }
}

fn fetch_item(db: &Database, id: i64) -> Result<PaperItem> {
    db.with(|conn| {
        let (title, author, content, created_at) = conn.query_row(
            "SELECT title, author, content, created_at FROM papers WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>("title")?,
                    row.get::<_, Option<String>>("author")?,
                    row.get::<_, Option<Vec<u8>>>("content")?,
                    row.get::<_, Option<String>>("created_at")?,
                ))
            },
        )?;
        Ok(PaperItem {
            name: format!("{id:06}-{}", sanitize(&title)),
            content: content.unwrap_or_default(),
            metadata: serde_json::json!({
                "id": id,
                "title": title,
                "author": author,
                "created_at": created_at,
            }),
        })
    })
    .with_msg(format!("Reading paper {id} failed"))
}
