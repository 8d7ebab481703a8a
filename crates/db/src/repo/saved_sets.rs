use artsync_core::types::PosterFileType;
use sqlx::SqlitePool;

use crate::DbError;
use crate::repo::media_items::{self, MediaItemRow};

#[derive(Debug, Clone)]
pub struct SavedSetRow {
    pub id: String,
    pub rating_key: String,
    pub set_id: String,
    pub set_type: String,
    pub selected_types: Vec<PosterFileType>,
    pub auto_download: bool,
    /// RFC 3339 timestamp of the remote revision last applied.
    pub last_update: String,
    pub created_ts: i64,
}

type RawRow = (String, String, String, String, String, i64, String, i64);

fn row_to_set(r: RawRow) -> Result<SavedSetRow, DbError> {
    let selected_types = r
        .4
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            PosterFileType::parse(s).ok_or(DbError::InvalidValue {
                column: "saved_set.selected_types",
                value: s.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SavedSetRow {
        id: r.0,
        rating_key: r.1,
        set_id: r.2,
        set_type: r.3,
        selected_types,
        auto_download: r.5 != 0,
        last_update: r.6,
        created_ts: r.7,
    })
}

fn encode_types(types: &[PosterFileType]) -> String {
    types
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

const SELECT_COLUMNS: &str = "SELECT id, rating_key, set_id, set_type, selected_types, auto_download, \
                              last_update, created_ts FROM saved_set";

/// Save (or replace) the set selection for an item. The item row must exist.
pub async fn upsert(
    pool: &SqlitePool,
    rating_key: &str,
    set_id: &str,
    set_type: &str,
    selected_types: &[PosterFileType],
    auto_download: bool,
    last_update: &str,
) -> Result<SavedSetRow, DbError> {
    let id = format!("{rating_key}:{set_id}");
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO saved_set (id, rating_key, set_id, set_type, selected_types, auto_download, last_update, created_ts) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(rating_key, set_id) DO UPDATE SET \
           set_type = excluded.set_type, \
           selected_types = excluded.selected_types, \
           auto_download = excluded.auto_download, \
           last_update = excluded.last_update",
    )
    .bind(&id)
    .bind(rating_key)
    .bind(set_id)
    .bind(set_type)
    .bind(encode_types(selected_types))
    .bind(auto_download as i64)
    .bind(last_update)
    .bind(now)
    .execute(pool)
    .await?;

    let row: RawRow = sqlx::query_as(&format!(
        "{SELECT_COLUMNS} WHERE rating_key = ? AND set_id = ?"
    ))
    .bind(rating_key)
    .bind(set_id)
    .fetch_one(pool)
    .await?;
    row_to_set(row)
}

pub async fn list_for_item(
    pool: &SqlitePool,
    rating_key: &str,
) -> Result<Vec<SavedSetRow>, DbError> {
    let rows: Vec<RawRow> = sqlx::query_as(&format!(
        "{SELECT_COLUMNS} WHERE rating_key = ? ORDER BY created_ts"
    ))
    .bind(rating_key)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(row_to_set).collect()
}

/// Every auto-download set together with its item.
pub async fn list_auto_download(
    pool: &SqlitePool,
) -> Result<Vec<(SavedSetRow, MediaItemRow)>, DbError> {
    let rows: Vec<RawRow> = sqlx::query_as(&format!(
        "{SELECT_COLUMNS} WHERE auto_download = 1 ORDER BY rating_key, created_ts"
    ))
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let set = row_to_set(row)?;
        match media_items::get(pool, &set.rating_key).await? {
            Some(item) => out.push((set, item)),
            None => tracing::warn!(set_id = %set.set_id, "saved set without media item, skipping"),
        }
    }
    Ok(out)
}

pub async fn set_last_update(
    pool: &SqlitePool,
    id: &str,
    last_update: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE saved_set SET last_update = ? WHERE id = ?")
        .bind(last_update)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
