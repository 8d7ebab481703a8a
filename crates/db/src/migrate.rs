use std::collections::HashSet;
use std::time::Instant;

use sqlx::SqlitePool;
use tracing::{debug, info};

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial_schema",
        include_str!("../migrations/001_initial_schema.sql"),
    ),
    (
        "002_saved_set_rating_key_index",
        include_str!("../migrations/002_saved_set_rating_key_index.sql"),
    ),
];

/// Apply pending forward-only migrations in order, each in its own
/// transaction together with its `_migrations` record. Returns the names
/// applied by this call.
pub async fn run(pool: &SqlitePool) -> Result<Vec<&'static str>, sqlx::Error> {
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_ts INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let done: HashSet<String> = sqlx::query_scalar("SELECT name FROM _migrations")
        .fetch_all(pool)
        .await?
        .into_iter()
        .collect();

    let mut applied = Vec::new();
    for &(name, sql) in MIGRATIONS.iter().filter(|(name, _)| !done.contains(*name)) {
        let started = Instant::now();
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO _migrations (name, applied_ts) VALUES (?, ?)")
            .bind(name)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(
            migration = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "migration applied"
        );
        applied.push(name);
    }

    if applied.is_empty() {
        debug!("schema up to date");
    }
    Ok(applied)
}
