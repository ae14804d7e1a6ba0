//! Contact lookup for notification recipients.

use crate::backup::db::Database;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use rusqlite::{params, OptionalExtension};

pub trait UserDirectory: Send + Sync {
    /// Resolves an actor id to a notification address.
    fn resolve_contact(&self, user_id: &str) -> Result<String>;
}

/// Reads the surrounding application's `users` table.
pub struct SqliteUserDirectory {
    db: Database,
}

impl SqliteUserDirectory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl UserDirectory for SqliteUserDirectory {
    fn resolve_contact(&self, user_id: &str) -> Result<String> {
        self.db.with(|conn| {
            conn.query_row(
                "SELECT email FROM users WHERE username = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("contact for user {user_id:?}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> SqliteUserDirectory {
        let db = Database::open_in_memory().unwrap();
        db.with(|conn| {
            conn.execute_batch(
                "CREATE TABLE users (username TEXT PRIMARY KEY, email TEXT NOT NULL);
                 INSERT INTO users VALUES ('alice', 'alice@example.com');",
            )?;
            Ok(())
        })
        .unwrap();
        SqliteUserDirectory::new(db)
    }

    #[test]
    fn test_resolves_known_user() {
        let dir = directory();
        assert_eq!(dir.resolve_contact("alice").unwrap(), "alice@example.com");
    }

    #[test]
    fn test_unknown_user_is_not_found() {
        let dir = directory();
        assert!(matches!(dir.resolve_contact("mallory"), Err(Error::NotFound(_))));
    }
}
