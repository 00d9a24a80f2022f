//! Database operations for Fanout
//!
//! One SQLite pool shared by the orchestrators and the CLI tools. The
//! queries are split by table: [`posts`], [`accounts`] and [`inbox`].

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::error::{DbError, Result};

pub mod accounts;
pub mod inbox;
pub mod posts;

pub use inbox::ConversationSummary;
pub use posts::{PostFilter, QueueStats};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes keep the URL valid on Windows too
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(DbError::SqlxError)?
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Decode an optional JSON text column
pub(crate) fn decode_json<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Result<Option<T>> {
    match raw {
        Some(text) if !text.is_empty() => Ok(Some(serde_json::from_str(&text)?)),
        _ => Ok(None),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FanoutError;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("dir").join("fanout.db");

        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
        assert!(db_path.exists());

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
                .fetch_all(db.pool())
                .await
                .unwrap();
        for table in ["scheduled_posts", "social_accounts", "contacts", "messages"] {
            assert!(tables.iter().any(|t| t == table), "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_reopen_runs_migrations_once() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("fanout.db");
        let path = db_path.to_str().unwrap();

        Database::new(path).await.unwrap();
        Database::new(path).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_path_is_database_error() {
        let result = Database::new("/tmp/fanout\0invalid.db").await;
        assert!(matches!(result, Err(FanoutError::Database(_))));
    }

    #[test]
    fn test_decode_json_handles_null_and_empty() {
        let none: Option<Vec<String>> = decode_json(None).unwrap();
        assert!(none.is_none());
        let empty: Option<Vec<String>> = decode_json(Some(String::new())).unwrap();
        assert!(empty.is_none());
        let some: Option<Vec<String>> = decode_json(Some(r#"["a"]"#.to_string())).unwrap();
        assert_eq!(some.unwrap(), vec!["a".to_string()]);
        assert!(decode_json::<Vec<String>>(Some("{".to_string())).is_err());
    }
}
