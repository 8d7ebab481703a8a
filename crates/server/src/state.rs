use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use artsync_artwork::mediux::MediuxClient;
use artsync_artwork::{ArtworkCache, SetCatalog};
use artsync_core::types::LibrarySection;
use artsync_db::SqliteItemIndex;
use artsync_mediaserver::MediaServer;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{AppConfig, LibraryConfig};
use crate::notify::NotificationDispatcher;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    /// Configured libraries that resolved at startup.
    pub sections: Arc<Vec<LibrarySection>>,
    pub media_server: Arc<dyn MediaServer>,
    /// Thumbnail cache behind the image preview endpoint.
    pub preview_cache: ArtworkCache,
    pub catalog: Arc<dyn SetCatalog>,
    pub notifier: NotificationDispatcher,
    /// Held for the duration of an auto-download sweep.
    pub sweep_lock: Arc<Mutex<()>>,
}

impl AppState {
    /// Wire every component from validated configuration and resolve the
    /// configured libraries against the media server.
    pub async fn from_config(config: AppConfig, db: SqlitePool) -> anyhow::Result<Self> {
        let mediux = Arc::new(
            MediuxClient::new(
                &config.mediux.base_url,
                config.mediux.token.clone(),
                config.mediux.download_quality,
                config.server.request_timeout,
            )
            .context("failed to build Mediux client")?,
        );

        let image_root = config.server.data_dir.join("temp-images").join("mediux");
        let preview_cache = ArtworkCache::new(
            image_root.join("thumbs"),
            config.cache_images,
            mediux.clone(),
        );
        let full_cache =
            ArtworkCache::new(image_root.join("full"), config.cache_images, mediux.clone());
        if config.cache_images {
            ensure_dir(preview_cache.root())?;
            ensure_dir(full_cache.root())?;
        }

        let index = Arc::new(SqliteItemIndex::new(db.clone()));
        let media_server =
            artsync_mediaserver::connect(&config.server_settings(), index, full_cache)
                .context("failed to build media server client")?;

        match media_server.get_status().await {
            Ok(version) => {
                info!(server = %media_server.kind(), version = %version, "media server reachable")
            }
            Err(e) => {
                warn!(server = %media_server.kind(), error = %e, "media server status check failed")
            }
        }

        let sections =
            resolve_sections(media_server.as_ref(), &config.media_server.libraries).await;
        if sections.is_empty() {
            warn!("no configured library could be resolved");
        }

        let notifier = NotificationDispatcher::from_config(config.notification.as_ref())
            .context("failed to build notifier")?;

        Ok(Self {
            db,
            config: Arc::new(config),
            sections: Arc::new(sections),
            media_server,
            preview_cache,
            catalog: mediux,
            notifier,
            sweep_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn section_by_title(&self, title: &str) -> Option<&LibrarySection> {
        self.sections
            .iter()
            .find(|s| s.title.eq_ignore_ascii_case(title))
    }
}

fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create cache dir {}", path.display()))
}

/// Look each configured library up by name. When the lookup fails, a
/// configured section id and type are used as-is; otherwise the library is
/// skipped.
pub async fn resolve_sections(
    server: &dyn MediaServer,
    libraries: &[LibraryConfig],
) -> Vec<LibrarySection> {
    let mut sections = Vec::with_capacity(libraries.len());
    for lib in libraries {
        let found = match server.fetch_library_section_info(&lib.name).await {
            Ok(found) => found,
            Err(e) => {
                warn!(library = %lib.name, error = %e, "library lookup failed");
                None
            }
        };

        match (found, &lib.section_id, lib.media_type) {
            (Some(section), _, _) => {
                info!(
                    library = %section.title,
                    id = %section.id,
                    kind = %section.media_type,
                    "library resolved"
                );
                sections.push(section);
            }
            (None, Some(id), Some(media_type)) => {
                warn!(
                    library = %lib.name,
                    id = %id,
                    "library not found, using configured SectionID"
                );
                sections.push(LibrarySection {
                    id: id.clone(),
                    title: lib.name.clone(),
                    media_type,
                });
            }
            (None, _, _) => {
                warn!(library = %lib.name, "library not found on media server, skipping");
            }
        }
    }
    sections
}
