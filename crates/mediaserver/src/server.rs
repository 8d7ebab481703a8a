use std::sync::Arc;
use std::time::Duration;

use artsync_artwork::ArtworkCache;
use artsync_core::index::LocalItemIndex;
use artsync_core::types::{
    ImageSlot, LibrarySection, MediaItem, MediaServerKind, MediaType, PosterFile,
};
use bytes::Bytes;

use crate::MediaServerError;
use crate::emby_jellyfin::EmbyJellyfinServer;
use crate::plex::PlexServer;

/// Connection settings for one media-server backend.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub kind: MediaServerKind,
    pub base_url: String,
    pub token: String,
    /// Emby/Jellyfin user the library is read as. Unused by Plex.
    pub user_id: Option<String>,
    pub timeout: Duration,
}

/// One page of normalized items plus the backend's reported total.
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub items: Vec<MediaItem>,
    pub total: usize,
}

/// The capability set every backend variant implements.
#[async_trait::async_trait]
pub trait MediaServer: Send + Sync {
    fn kind(&self) -> MediaServerKind;

    /// Version string reported by the server.
    async fn get_status(&self) -> Result<String, MediaServerError>;

    /// Look up a configured library by name. `None` when it no longer
    /// resolves, or resolves to a type other than movie/show.
    async fn fetch_library_section_info(
        &self,
        name: &str,
    ) -> Result<Option<LibrarySection>, MediaServerError>;

    /// Items in `[start, start + limit)`. Item types outside movie/show are
    /// dropped, so `items` may be shorter than the page.
    async fn fetch_library_section_items(
        &self,
        section: &LibrarySection,
        start: usize,
        limit: usize,
    ) -> Result<ItemPage, MediaServerError>;

    async fn fetch_item_content(
        &self,
        item_id: &str,
        section_title: &str,
    ) -> Result<MediaItem, MediaServerError>;

    /// Bytes of the artwork currently applied on the server.
    async fn fetch_image_from_media_server(
        &self,
        item_id: &str,
        slot: ImageSlot,
    ) -> Result<Bytes, MediaServerError>;

    /// Push `file` to the item (or its season/episode). Pushing the same
    /// version twice is a no-op the second time.
    async fn download_and_update_posters(
        &self,
        item: &MediaItem,
        file: &PosterFile,
    ) -> Result<(), MediaServerError>;

    /// Resolve a TMDB id to the backend-native id within `section`.
    async fn search_for_item_and_get_rating_key(
        &self,
        tmdb_id: &str,
        media_type: MediaType,
        title: &str,
        section: &LibrarySection,
    ) -> Result<String, MediaServerError>;
}

/// Local-store membership for one item. Lookup failures are logged and read
/// as "not tracked" so one bad row cannot fail a whole page.
pub(crate) async fn exists_locally(index: &dyn LocalItemIndex, native_id: &str) -> bool {
    match index.exists(native_id).await {
        Ok(found) => found,
        Err(err) => {
            tracing::warn!(native_id = %native_id, error = %err, "local index lookup failed");
            false
        }
    }
}

/// Build the configured backend. `artwork` is the full-quality cache used for
/// pushes.
pub fn connect(
    settings: &ServerSettings,
    index: Arc<dyn LocalItemIndex>,
    artwork: ArtworkCache,
) -> Result<Arc<dyn MediaServer>, MediaServerError> {
    let server: Arc<dyn MediaServer> = match settings.kind {
        MediaServerKind::Plex => Arc::new(PlexServer::new(settings, index, artwork)?),
        MediaServerKind::Emby | MediaServerKind::Jellyfin => {
            Arc::new(EmbyJellyfinServer::new(settings, index, artwork)?)
        }
    };
    Ok(server)
}
