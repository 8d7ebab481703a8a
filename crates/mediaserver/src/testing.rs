use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use artsync_artwork::{ArtworkCache, ArtworkError, AssetFetcher, FetchedImage};
use artsync_core::types::{PosterFile, PosterFileType, QualityTier};
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Serves `"{asset}-bytes"` as JPEG and counts calls.
#[derive(Default)]
pub(crate) struct StubFetcher {
    pub(crate) calls: AtomicUsize,
}

#[async_trait::async_trait]
impl AssetFetcher for StubFetcher {
    async fn fetch_asset(
        &self,
        asset_id: &str,
        _: DateTime<Utc>,
        _: QualityTier,
    ) -> Result<FetchedImage, ArtworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FetchedImage {
            bytes: Bytes::from(format!("{asset_id}-bytes")),
            content_type: "image/jpeg".into(),
        })
    }
}

pub(crate) fn cache(root: &Path, fetcher: Arc<StubFetcher>) -> ArtworkCache {
    ArtworkCache::new(root.to_path_buf(), true, fetcher)
}

pub(crate) fn file(asset: &str, modified: &str, file_type: PosterFileType) -> PosterFile {
    PosterFile {
        asset_id: asset.into(),
        modified_at: modified.parse().unwrap(),
        quality: QualityTier::Full,
        file_type,
        season_number: None,
        episode_number: None,
    }
}
