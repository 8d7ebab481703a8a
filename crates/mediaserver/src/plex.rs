//! Plex backend.
//!
//! Plex answers JSON when asked with `Accept: application/json`; everything
//! lives under a `MediaContainer` object.

use std::sync::Arc;

use artsync_artwork::ArtworkCache;
use artsync_core::index::LocalItemIndex;
use artsync_core::types::{
    ExternalIds, ImageSlot, LibrarySection, MediaItem, MediaServerKind, MediaType, PosterFile,
    PosterFileType,
};
use bytes::Bytes;
use chrono::{NaiveDate, NaiveTime};
use serde_json::Value;
use tracing::{debug, info};

use crate::MediaServerError;
use crate::push::{Pusher, episode_of, season_of};
use crate::server::{ItemPage, MediaServer, ServerSettings, exists_locally};
use crate::transport::Transport;

pub struct PlexServer {
    http: Transport,
    index: Arc<dyn LocalItemIndex>,
    pusher: Pusher,
}

impl PlexServer {
    pub fn new(
        settings: &ServerSettings,
        index: Arc<dyn LocalItemIndex>,
        artwork: ArtworkCache,
    ) -> Result<Self, MediaServerError> {
        Ok(Self {
            http: Transport::new(settings)?,
            index,
            pusher: Pusher::new(artwork),
        })
    }

    async fn normalize(&self, m: &Value, library_title: &str) -> Option<MediaItem> {
        let raw_type = m["type"].as_str().unwrap_or_default();
        let Some(media_type) = MediaType::from_backend(raw_type) else {
            debug!(item_type = %raw_type, "skipping unsupported Plex item type");
            return None;
        };
        let rating_key = rating_key(m)?;

        let mut external_ids = ExternalIds::new();
        for guid in m["Guid"].as_array().into_iter().flatten() {
            if let Some((provider, id)) = guid["id"].as_str().and_then(|g| g.split_once("://")) {
                external_ids.insert(provider, id);
            }
        }

        let exists_locally = exists_locally(self.index.as_ref(), &rating_key).await;
        Some(MediaItem {
            rating_key,
            media_type,
            title: m["title"].as_str().unwrap_or_default().to_string(),
            year: m["year"].as_i64().map(|y| y as i32),
            thumb: m["thumb"].as_str().map(str::to_string),
            library_title: m["librarySectionTitle"]
                .as_str()
                .unwrap_or(library_title)
                .to_string(),
            external_ids,
            added_at: m["addedAt"].as_i64().unwrap_or(0) * 1000,
            released_at: m["originallyAvailableAt"]
                .as_str()
                .and_then(date_to_millis)
                .unwrap_or(0),
            exists_locally,
        })
    }

    /// The native id the file is applied to: the item, one of its seasons or
    /// one of its episodes.
    async fn resolve_target(
        &self,
        item: &MediaItem,
        file: &PosterFile,
    ) -> Result<String, MediaServerError> {
        match file.file_type {
            PosterFileType::Poster | PosterFileType::Backdrop => Ok(item.rating_key.clone()),
            PosterFileType::SeasonPoster => {
                require_show(item, file)?;
                let season = season_of(file)?;
                let data = self
                    .http
                    .get_json(&format!("library/metadata/{}/children", item.rating_key), &[])
                    .await?;
                metadata(&data)
                    .iter()
                    .find(|s| s["index"].as_u64() == Some(u64::from(season)))
                    .and_then(rating_key)
                    .ok_or_else(|| {
                        MediaServerError::IdentityResolution(format!(
                            "season {season} of '{}'",
                            item.title
                        ))
                    })
            }
            PosterFileType::TitleCard => {
                require_show(item, file)?;
                let (season, episode) = episode_of(file)?;
                let data = self
                    .http
                    .get_json(&format!("library/metadata/{}/allLeaves", item.rating_key), &[])
                    .await?;
                metadata(&data)
                    .iter()
                    .find(|e| {
                        e["parentIndex"].as_u64() == Some(u64::from(season))
                            && e["index"].as_u64() == Some(u64::from(episode))
                    })
                    .and_then(rating_key)
                    .ok_or_else(|| {
                        MediaServerError::IdentityResolution(format!(
                            "S{season:02}E{episode:02} of '{}'",
                            item.title
                        ))
                    })
            }
        }
    }
}

fn metadata(data: &Value) -> &[Value] {
    data["MediaContainer"]["Metadata"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
}

// Plex sends ratingKey as a string but older servers emit a number.
fn rating_key(m: &Value) -> Option<String> {
    match &m["ratingKey"] {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn date_to_millis(raw: &str) -> Option<i64> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(date.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
}

fn require_show(item: &MediaItem, file: &PosterFile) -> Result<(), MediaServerError> {
    if item.media_type == MediaType::Show {
        Ok(())
    } else {
        Err(MediaServerError::InvalidInput(format!(
            "{} files only apply to shows, '{}' is a {}",
            file.file_type.as_str(),
            item.title,
            item.media_type
        )))
    }
}

#[async_trait::async_trait]
impl MediaServer for PlexServer {
    fn kind(&self) -> MediaServerKind {
        MediaServerKind::Plex
    }

    async fn get_status(&self) -> Result<String, MediaServerError> {
        let data = self.http.get_json("identity", &[]).await?;
        data["MediaContainer"]["version"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                MediaServerError::Parse("identity: missing MediaContainer.version".into())
            })
    }

    async fn fetch_library_section_info(
        &self,
        name: &str,
    ) -> Result<Option<LibrarySection>, MediaServerError> {
        let data = self.http.get_json("library/sections", &[]).await?;
        let dirs = data["MediaContainer"]["Directory"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or_default();

        Ok(dirs
            .iter()
            .find(|d| d["title"].as_str().is_some_and(|t| t.eq_ignore_ascii_case(name)))
            .and_then(|d| {
                Some(LibrarySection {
                    id: d["key"].as_str()?.to_string(),
                    title: d["title"].as_str()?.to_string(),
                    media_type: MediaType::from_backend(d["type"].as_str()?)?,
                })
            }))
    }

    async fn fetch_library_section_items(
        &self,
        section: &LibrarySection,
        start: usize,
        limit: usize,
    ) -> Result<ItemPage, MediaServerError> {
        let start = start.to_string();
        let limit = limit.to_string();
        let data = self
            .http
            .get_json(
                &format!("library/sections/{}/all", section.id),
                &[
                    ("X-Plex-Container-Start", start.as_str()),
                    ("X-Plex-Container-Size", limit.as_str()),
                    ("includeGuids", "1"),
                ],
            )
            .await?;

        let container = &data["MediaContainer"];
        // `size` only counts this page, so it cannot stand in for the total.
        let total = container["totalSize"].as_u64().ok_or_else(|| {
            MediaServerError::Parse(format!("section {}: missing totalSize", section.id))
        })?;

        let mut items = Vec::new();
        for m in metadata(&data) {
            if let Some(item) = self.normalize(m, &section.title).await {
                items.push(item);
            }
        }
        Ok(ItemPage {
            items,
            total: total as usize,
        })
    }

    async fn fetch_item_content(
        &self,
        item_id: &str,
        section_title: &str,
    ) -> Result<MediaItem, MediaServerError> {
        let data = self
            .http
            .get_json(&format!("library/metadata/{item_id}"), &[("includeGuids", "1")])
            .await?;
        let m = metadata(&data)
            .first()
            .ok_or_else(|| MediaServerError::NotFound(format!("item {item_id}")))?;
        self.normalize(m, section_title)
            .await
            .ok_or_else(|| {
                MediaServerError::InvalidInput(format!("item {item_id} is not a movie or show"))
            })
    }

    async fn fetch_image_from_media_server(
        &self,
        item_id: &str,
        slot: ImageSlot,
    ) -> Result<Bytes, MediaServerError> {
        let kind = match slot {
            ImageSlot::Poster => "thumb",
            ImageSlot::Backdrop => "art",
        };
        self.http
            .get_bytes(&format!("library/metadata/{item_id}/{kind}"))
            .await
    }

    async fn download_and_update_posters(
        &self,
        item: &MediaItem,
        file: &PosterFile,
    ) -> Result<(), MediaServerError> {
        let mut slot = self.pusher.claim(item, file).await;
        if slot.is_current(file) {
            debug!(item = %item.rating_key, asset_id = %file.asset_id, "artwork already applied");
            return Ok(());
        }

        let target = self.resolve_target(item, file).await?;
        let image = self.pusher.load(file).await?;
        let endpoint = match file.file_type.slot() {
            ImageSlot::Poster => "posters",
            ImageSlot::Backdrop => "arts",
        };
        self.http
            .post_body(
                &format!("library/metadata/{target}/{endpoint}"),
                &image.content_type,
                image.bytes,
            )
            .await?;

        slot.record(file);
        info!(
            item = %item.title,
            target = %target,
            file_type = file.file_type.as_str(),
            asset_id = %file.asset_id,
            "artwork pushed to Plex"
        );
        Ok(())
    }

    async fn search_for_item_and_get_rating_key(
        &self,
        tmdb_id: &str,
        media_type: MediaType,
        title: &str,
        section: &LibrarySection,
    ) -> Result<String, MediaServerError> {
        if tmdb_id.trim().is_empty() {
            return Err(MediaServerError::InvalidInput("tmdb id is required".into()));
        }
        let plex_type = match media_type {
            MediaType::Movie => "1",
            MediaType::Show => "2",
        };
        let data = self
            .http
            .get_json(
                &format!("library/sections/{}/all", section.id),
                &[("type", plex_type), ("title", title), ("includeGuids", "1")],
            )
            .await?;

        let wanted = format!("tmdb://{}", tmdb_id.trim());
        metadata(&data)
            .iter()
            .find(|m| {
                m["Guid"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .any(|g| g["id"].as_str() == Some(wanted.as_str()))
            })
            .and_then(rating_key)
            .ok_or_else(|| {
                MediaServerError::IdentityResolution(format!(
                    "tmdb {tmdb_id} ('{title}') in section '{}'",
                    section.title
                ))
            })
    }
}
