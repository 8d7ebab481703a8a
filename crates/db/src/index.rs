use artsync_core::index::{IndexError, LocalItemIndex};
use sqlx::SqlitePool;

/// [`LocalItemIndex`] backed by the `media_item` table.
#[derive(Clone)]
pub struct SqliteItemIndex {
    pool: SqlitePool,
}

impl SqliteItemIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LocalItemIndex for SqliteItemIndex {
    async fn exists(&self, native_id: &str) -> Result<bool, IndexError> {
        crate::repo::media_items::exists(&self.pool, native_id)
            .await
            .map_err(|e| IndexError(e.to_string()))
    }
}
