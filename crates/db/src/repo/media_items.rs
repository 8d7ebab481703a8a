use artsync_core::types::MediaType;
use sqlx::SqlitePool;

use crate::DbError;

#[derive(Debug, Clone)]
pub struct MediaItemRow {
    pub rating_key: String,
    pub library_title: String,
    pub media_type: MediaType,
    pub title: String,
    pub year: Option<i64>,
    pub tmdb_id: Option<String>,
    pub created_ts: i64,
    pub updated_ts: i64,
}

type RawRow = (
    String,
    String,
    String,
    String,
    Option<i64>,
    Option<String>,
    i64,
    i64,
);

fn row_to_item(r: RawRow) -> Result<MediaItemRow, DbError> {
    let media_type = MediaType::from_backend(&r.2).ok_or(DbError::InvalidValue {
        column: "media_item.media_type",
        value: r.2.clone(),
    })?;
    Ok(MediaItemRow {
        rating_key: r.0,
        library_title: r.1,
        media_type,
        title: r.3,
        year: r.4,
        tmdb_id: r.5,
        created_ts: r.6,
        updated_ts: r.7,
    })
}

pub async fn exists(pool: &SqlitePool, rating_key: &str) -> Result<bool, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM media_item WHERE rating_key = ?")
        .bind(rating_key)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

pub async fn get(pool: &SqlitePool, rating_key: &str) -> Result<Option<MediaItemRow>, DbError> {
    let row: Option<RawRow> = sqlx::query_as(
        "SELECT rating_key, library_title, media_type, title, year, tmdb_id, created_ts, updated_ts \
         FROM media_item WHERE rating_key = ?",
    )
    .bind(rating_key)
    .fetch_optional(pool)
    .await?;

    row.map(row_to_item).transpose()
}

/// Insert or refresh a tracked item.
pub async fn upsert(
    pool: &SqlitePool,
    rating_key: &str,
    library_title: &str,
    media_type: MediaType,
    title: &str,
    year: Option<i32>,
    tmdb_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO media_item (rating_key, library_title, media_type, title, year, tmdb_id, created_ts, updated_ts) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(rating_key) DO UPDATE SET \
           library_title = excluded.library_title, \
           media_type = excluded.media_type, \
           title = excluded.title, \
           year = excluded.year, \
           tmdb_id = COALESCE(excluded.tmdb_id, media_item.tmdb_id), \
           updated_ts = excluded.updated_ts",
    )
    .bind(rating_key)
    .bind(library_title)
    .bind(media_type.as_str())
    .bind(title)
    .bind(year.map(i64::from))
    .bind(tmdb_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Move an item (and its saved sets) to a new native id, e.g. after the media
/// server re-created the entry.
pub async fn rekey(
    pool: &SqlitePool,
    old_key: &str,
    new_key: &str,
) -> Result<bool, sqlx::Error> {
    if old_key == new_key {
        return Ok(false);
    }
    let mut tx = pool.begin().await?;
    let now = chrono::Utc::now().timestamp();

    let copied = sqlx::query(
        "INSERT OR IGNORE INTO media_item \
         (rating_key, library_title, media_type, title, year, tmdb_id, created_ts, updated_ts) \
         SELECT ?, library_title, media_type, title, year, tmdb_id, created_ts, ? \
         FROM media_item WHERE rating_key = ?",
    )
    .bind(new_key)
    .bind(now)
    .bind(old_key)
    .execute(&mut *tx)
    .await?;

    // A set saved against both ids keeps the row already on the new id.
    sqlx::query(
        "DELETE FROM saved_set WHERE rating_key = ? \
         AND set_id IN (SELECT set_id FROM saved_set WHERE rating_key = ?)",
    )
    .bind(old_key)
    .bind(new_key)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE saved_set SET rating_key = ? WHERE rating_key = ?")
        .bind(new_key)
        .bind(old_key)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM media_item WHERE rating_key = ?")
        .bind(old_key)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(copied.rows_affected() > 0)
}
