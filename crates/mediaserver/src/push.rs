use std::collections::HashMap;
use std::sync::Arc;

use artsync_artwork::{ArtworkCache, CachedImage};
use artsync_core::types::{MediaItem, PosterFile, PosterFileType, QualityTier};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::MediaServerError;

/// Which slot on which item a file lands in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PushTarget {
    item: String,
    file_type: PosterFileType,
    season: Option<u32>,
    episode: Option<u32>,
}

impl PushTarget {
    fn of(item: &MediaItem, file: &PosterFile) -> Self {
        Self {
            item: item.rating_key.clone(),
            file_type: file.file_type,
            season: file.season_number,
            episode: file.episode_number,
        }
    }
}

/// Exclusive hold on one push target. Pushes to the same target queue behind
/// it, so the applied-version check and the upload happen as one step.
pub(crate) struct PushSlot {
    version: OwnedMutexGuard<Option<String>>,
}

impl PushSlot {
    pub(crate) fn is_current(&self, file: &PosterFile) -> bool {
        self.version.as_deref() == Some(file.version_key().as_str())
    }

    pub(crate) fn record(&mut self, file: &PosterFile) {
        *self.version = Some(file.version_key());
    }
}

/// Shared half of every backend's push path: the full-quality artwork cache
/// and the record of versions already applied.
pub(crate) struct Pusher {
    artwork: ArtworkCache,
    applied: Mutex<HashMap<PushTarget, Arc<Mutex<Option<String>>>>>,
}

impl Pusher {
    pub(crate) fn new(artwork: ArtworkCache) -> Self {
        Self {
            artwork,
            applied: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for any in-progress push to the same target, then holds it.
    pub(crate) async fn claim(&self, item: &MediaItem, file: &PosterFile) -> PushSlot {
        let slot = self
            .applied
            .lock()
            .await
            .entry(PushTarget::of(item, file))
            .or_default()
            .clone();
        PushSlot {
            version: slot.lock_owned().await,
        }
    }

    /// Pushes always use full-size bytes regardless of the file's tier.
    pub(crate) async fn load(&self, file: &PosterFile) -> Result<CachedImage, MediaServerError> {
        Ok(self
            .artwork
            .get_or_fetch(&file.asset_id, file.modified_at, QualityTier::Full)
            .await?)
    }
}

/// Season/episode numbers a file needs, or an input error.
pub(crate) fn season_of(file: &PosterFile) -> Result<u32, MediaServerError> {
    file.season_number.ok_or_else(|| {
        MediaServerError::InvalidInput(format!(
            "{} file {} has no season number",
            file.file_type.as_str(),
            file.asset_id
        ))
    })
}

pub(crate) fn episode_of(file: &PosterFile) -> Result<(u32, u32), MediaServerError> {
    let season = season_of(file)?;
    let episode = file.episode_number.ok_or_else(|| {
        MediaServerError::InvalidInput(format!(
            "title card {} has no episode number",
            file.asset_id
        ))
    })?;
    Ok((season, episode))
}
