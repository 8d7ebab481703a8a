//! Auto-download sweep: re-applies saved sets whose remote revision is newer
//! than what was last pushed, plus the cron task that drives it.

use artsync_artwork::{ArtworkError, is_stale};
use artsync_core::error::ErrorKind;
use artsync_core::types::MediaItem;
use artsync_db::DbError;
use artsync_db::repo::media_items::{self, MediaItemRow};
use artsync_db::repo::saved_sets::{self, SavedSetRow};
use artsync_mediaserver::MediaServerError;
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<SweepFailure>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepFailure {
    pub set_id: String,
    pub rating_key: String,
    pub title: String,
    pub error: String,
}

impl SweepReport {
    fn message(&self) -> String {
        let mut msg = format!(
            "Checked {} saved sets: {} updated, {} up to date, {} failed.",
            self.checked, self.updated, self.skipped, self.failed
        );
        for f in &self.failures {
            msg.push_str(&format!("\n- {} (set {}): {}", f.title, f.set_id, f.error));
        }
        msg
    }
}

#[derive(Debug, thiserror::Error)]
enum SetError {
    #[error(transparent)]
    Artwork(#[from] ArtworkError),
    #[error(transparent)]
    MediaServer(#[from] MediaServerError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("{failed} of {total} files failed to push, first error: {first}")]
    Push {
        failed: usize,
        total: usize,
        first: MediaServerError,
    },
}

enum SetOutcome {
    Updated,
    UpToDate,
}

/// One pass over every auto-download set. Sets fail independently; only a
/// failure to list the sets aborts the sweep.
pub async fn run_auto_download(state: &AppState) -> Result<SweepReport, DbError> {
    let _running = state.sweep_lock.lock().await;
    let sets = saved_sets::list_auto_download(&state.db).await?;
    info!(sets = sets.len(), "auto download sweep started");

    let mut report = SweepReport::default();
    for (set, item) in sets {
        report.checked += 1;
        match sync_set(state, &set, &item).await {
            Ok(SetOutcome::Updated) => report.updated += 1,
            Ok(SetOutcome::UpToDate) => report.skipped += 1,
            Err(e) => {
                warn!(
                    set_id = %set.set_id,
                    rating_key = %item.rating_key,
                    error = %e,
                    "saved set update failed"
                );
                report.failed += 1;
                report.failures.push(SweepFailure {
                    set_id: set.set_id.clone(),
                    rating_key: item.rating_key.clone(),
                    title: item.title.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        checked = report.checked,
        updated = report.updated,
        skipped = report.skipped,
        failed = report.failed,
        "auto download sweep finished"
    );
    if state.notifier.is_enabled() && (report.updated > 0 || report.failed > 0) {
        state
            .notifier
            .dispatch(report.message(), None, "Auto download".to_string());
    }
    Ok(report)
}

async fn sync_set(
    state: &AppState,
    set: &SavedSetRow,
    row: &MediaItemRow,
) -> Result<SetOutcome, SetError> {
    let remote = state.catalog.fetch_set(&set.set_type, &set.set_id).await?;
    if !is_stale(&set.last_update, remote.date_updated) {
        debug!(set_id = %set.set_id, last_update = %set.last_update, "saved set is up to date");
        return Ok(SetOutcome::UpToDate);
    }

    let item = resolve_item(state, row).await?;
    let files: Vec<_> = remote
        .files
        .iter()
        .filter(|f| set.selected_types.contains(&f.file_type))
        .collect();

    let mut first_error = None;
    let mut failed = 0;
    for file in &files {
        if let Err(e) = state.media_server.download_and_update_posters(&item, file).await {
            warn!(
                set_id = %set.set_id,
                asset_id = %file.asset_id,
                file_type = file.file_type.as_str(),
                error = %e,
                "artwork push failed"
            );
            failed += 1;
            first_error.get_or_insert(e);
        }
    }
    if let Some(first) = first_error {
        return Err(SetError::Push {
            failed,
            total: files.len(),
            first,
        });
    }

    saved_sets::set_last_update(&state.db, &set.id, &remote.date_updated.to_rfc3339())
        .await
        .map_err(DbError::from)?;
    info!(set_id = %set.set_id, title = %item.title, files = files.len(), "saved set updated");
    Ok(SetOutcome::Updated)
}

/// Fetch the item by its stored id. When the server no longer knows that id,
/// search the item's library by TMDB id and move the stored row to the new id.
async fn resolve_item(state: &AppState, row: &MediaItemRow) -> Result<MediaItem, SetError> {
    match state
        .media_server
        .fetch_item_content(&row.rating_key, &row.library_title)
        .await
    {
        Ok(item) => return Ok(item),
        Err(e) if e.kind() != ErrorKind::IdentityResolution => return Err(e.into()),
        Err(e) => debug!(rating_key = %row.rating_key, error = %e, "stored id is gone, searching"),
    }

    let tmdb_id = row.tmdb_id.as_deref().ok_or_else(|| {
        MediaServerError::IdentityResolution(format!("'{}' has no TMDB id", row.title))
    })?;
    let section = state.section_by_title(&row.library_title).ok_or_else(|| {
        MediaServerError::IdentityResolution(format!(
            "library '{}' is not configured",
            row.library_title
        ))
    })?;

    let new_key = state
        .media_server
        .search_for_item_and_get_rating_key(tmdb_id, row.media_type, &row.title, section)
        .await?;
    media_items::rekey(&state.db, &row.rating_key, &new_key)
        .await
        .map_err(DbError::from)?;
    info!(old = %row.rating_key, new = %new_key, title = %row.title, "item re-keyed");

    Ok(state
        .media_server
        .fetch_item_content(&new_key, &section.title)
        .await?)
}

/// Run the sweep on the configured cron schedule until the process exits.
pub fn spawn_scheduler(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let schedule = state.config.auto_download.schedule.clone();
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!(cron = %state.config.auto_download.cron, "cron schedule has no future runs");
                return;
            };
            info!(next = %next, "next auto download scheduled");
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            if let Err(e) = run_auto_download(&state).await {
                error!(error = %e, "auto download sweep failed");
            }
        }
    })
}
