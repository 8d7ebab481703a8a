pub mod index;
pub mod migrate;
pub mod repo;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub use index::SqliteItemIndex;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("invalid stored value in {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
}

/// Open the SQLite store in WAL mode with foreign keys enforced, creating the
/// file and its directory when missing.
pub async fn connect(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let in_memory = db_path.contains(":memory:");
    if !in_memory {
        if let Some(parent) = Path::new(db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }

    let opts = SqliteConnectOptions::from_str(db_path)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = if in_memory {
        // One connection that never expires, or the database vanishes.
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };
    pool.connect_with(opts).await
}
