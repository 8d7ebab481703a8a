//! Emby and Jellyfin backend. Both speak the same REST dialect and share the
//! `X-Emby-Token` header; library reads are scoped to one user id.

use std::sync::Arc;

use artsync_artwork::ArtworkCache;
use artsync_core::index::LocalItemIndex;
use artsync_core::types::{
    ExternalIds, ImageSlot, LibrarySection, MediaItem, MediaServerKind, MediaType, PosterFile,
    PosterFileType,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::DateTime;
use serde_json::Value;
use tracing::{debug, info};

use crate::MediaServerError;
use crate::push::{Pusher, episode_of, season_of};
use crate::server::{ItemPage, MediaServer, ServerSettings, exists_locally};
use crate::transport::Transport;

const ITEM_FIELDS: &str = "DateLastContentAdded,PremiereDate,DateCreated,ProviderIds,BasicSyncInfo,\
                           CanDelete,CanDownload,PrimaryImageAspectRatio,ProductionYear,Status,EndDate";

pub struct EmbyJellyfinServer {
    kind: MediaServerKind,
    user_id: Option<String>,
    http: Transport,
    index: Arc<dyn LocalItemIndex>,
    pusher: Pusher,
}

/// First administrator account on the server, used as the library reader.
pub async fn fetch_admin_user_id(settings: &ServerSettings) -> Result<String, MediaServerError> {
    let http = Transport::new(settings)?;
    let users = http.get_json("Users", &[]).await?;
    let users = users
        .as_array()
        .ok_or_else(|| MediaServerError::Parse("Users: expected an array".into()))?;

    users
        .iter()
        .find(|u| u["Policy"]["IsAdministrator"].as_bool() == Some(true))
        .and_then(|u| u["Id"].as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            MediaServerError::Configuration(format!(
                "no administrator user found on the {} server",
                settings.kind
            ))
        })
}

fn items(data: &Value) -> &[Value] {
    data["Items"].as_array().map(Vec::as_slice).unwrap_or_default()
}

fn to_millis(raw: &Value) -> i64 {
    raw.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.timestamp_millis())
        .unwrap_or(0)
}

fn image_type(slot: ImageSlot) -> &'static str {
    match slot {
        ImageSlot::Poster => "Primary",
        ImageSlot::Backdrop => "Backdrop",
    }
}

impl EmbyJellyfinServer {
    pub fn new(
        settings: &ServerSettings,
        index: Arc<dyn LocalItemIndex>,
        artwork: ArtworkCache,
    ) -> Result<Self, MediaServerError> {
        Ok(Self {
            kind: settings.kind,
            user_id: settings.user_id.clone().filter(|u| !u.trim().is_empty()),
            http: Transport::new(settings)?,
            index,
            pusher: Pusher::new(artwork),
        })
    }

    fn user_id(&self) -> Result<&str, MediaServerError> {
        self.user_id.as_deref().ok_or_else(|| {
            MediaServerError::Configuration(format!(
                "MediaServer.UserID is not set for {}",
                self.kind
            ))
        })
    }

    async fn normalize(&self, it: &Value, library_title: &str) -> Option<MediaItem> {
        let raw_type = it["Type"].as_str().unwrap_or_default();
        let Some(media_type) = MediaType::from_backend(raw_type) else {
            debug!(item_type = %raw_type, "skipping unsupported item type");
            return None;
        };
        let id = it["Id"].as_str().filter(|s| !s.is_empty())?.to_string();

        let mut external_ids = ExternalIds::new();
        if let Some(tmdb) = it["ProviderIds"]["Tmdb"].as_str() {
            external_ids.insert("tmdb", tmdb);
        }
        for (provider, value) in it["ProviderIds"].as_object().into_iter().flatten() {
            if let Some(value) = value.as_str() {
                external_ids.insert(provider, value);
            }
        }

        let exists_locally = exists_locally(self.index.as_ref(), &id).await;
        Some(MediaItem {
            rating_key: id,
            media_type,
            title: it["Name"].as_str().unwrap_or_default().to_string(),
            year: it["ProductionYear"].as_i64().map(|y| y as i32),
            thumb: it["ImageTags"]["Primary"].as_str().map(str::to_string),
            library_title: library_title.to_string(),
            external_ids,
            added_at: to_millis(&it["DateCreated"]),
            released_at: to_millis(&it["PremiereDate"]),
            exists_locally,
        })
    }

    async fn resolve_target(
        &self,
        item: &MediaItem,
        file: &PosterFile,
    ) -> Result<String, MediaServerError> {
        if file.file_type != PosterFileType::Poster
            && file.file_type != PosterFileType::Backdrop
            && item.media_type != MediaType::Show
        {
            return Err(MediaServerError::InvalidInput(format!(
                "{} files only apply to shows, '{}' is a {}",
                file.file_type.as_str(),
                item.title,
                item.media_type
            )));
        }

        match file.file_type {
            PosterFileType::Poster | PosterFileType::Backdrop => Ok(item.rating_key.clone()),
            PosterFileType::SeasonPoster => {
                let season = season_of(file)?;
                let data = self
                    .http
                    .get_json(
                        &format!("Shows/{}/Seasons", item.rating_key),
                        &[("UserId", self.user_id()?)],
                    )
                    .await?;
                items(&data)
                    .iter()
                    .find(|s| s["IndexNumber"].as_u64() == Some(u64::from(season)))
                    .and_then(|s| s["Id"].as_str())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        MediaServerError::IdentityResolution(format!(
                            "season {season} of '{}'",
                            item.title
                        ))
                    })
            }
            PosterFileType::TitleCard => {
                let (season, episode) = episode_of(file)?;
                let season_param = season.to_string();
                let data = self
                    .http
                    .get_json(
                        &format!("Shows/{}/Episodes", item.rating_key),
                        &[("Season", season_param.as_str()), ("UserId", self.user_id()?)],
                    )
                    .await?;
                items(&data)
                    .iter()
                    .find(|e| {
                        e["IndexNumber"].as_u64() == Some(u64::from(episode))
                            && e["ParentIndexNumber"]
                                .as_u64()
                                .is_none_or(|s| s == u64::from(season))
                    })
                    .and_then(|e| e["Id"].as_str())
                    .map(str::to_string)
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

#[async_trait::async_trait]
impl MediaServer for EmbyJellyfinServer {
    fn kind(&self) -> MediaServerKind {
        self.kind
    }

    async fn get_status(&self) -> Result<String, MediaServerError> {
        let data = self.http.get_json("System/Info", &[]).await?;
        data["Version"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| MediaServerError::Parse("System/Info: missing Version".into()))
    }

    async fn fetch_library_section_info(
        &self,
        name: &str,
    ) -> Result<Option<LibrarySection>, MediaServerError> {
        let data = self
            .http
            .get_json(&format!("Users/{}/Views", self.user_id()?), &[])
            .await?;

        Ok(items(&data)
            .iter()
            .find(|v| v["Name"].as_str().is_some_and(|n| n.eq_ignore_ascii_case(name)))
            .and_then(|v| {
                let media_type = match v["CollectionType"].as_str()? {
                    "movies" => MediaType::Movie,
                    "tvshows" => MediaType::Show,
                    _ => return None,
                };
                Some(LibrarySection {
                    id: v["Id"].as_str()?.to_string(),
                    title: v["Name"].as_str()?.to_string(),
                    media_type,
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
                &format!("Users/{}/Items", self.user_id()?),
                &[
                    ("Recursive", "true"),
                    ("SortBy", "Name"),
                    ("SortOrder", "Ascending"),
                    ("IncludeItemTypes", "Movie,Series"),
                    ("Fields", ITEM_FIELDS),
                    ("ParentId", section.id.as_str()),
                    ("StartIndex", start.as_str()),
                    ("Limit", limit.as_str()),
                ],
            )
            .await?;

        let total = data["TotalRecordCount"].as_u64().ok_or_else(|| {
            MediaServerError::Parse(format!("section {}: missing TotalRecordCount", section.id))
        })?;

        let mut page = Vec::new();
        for it in items(&data) {
            if let Some(item) = self.normalize(it, &section.title).await {
                page.push(item);
            }
        }
        Ok(ItemPage {
            items: page,
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
            .get_json(
                &format!("Users/{}/Items/{item_id}", self.user_id()?),
                &[("Fields", ITEM_FIELDS)],
            )
            .await?;
        self.normalize(&data, section_title)
            .await
            .ok_or_else(|| {
                MediaServerError::InvalidInput(format!("item {item_id} is not a movie or series"))
            })
    }

    async fn fetch_image_from_media_server(
        &self,
        item_id: &str,
        slot: ImageSlot,
    ) -> Result<Bytes, MediaServerError> {
        self.http
            .get_bytes(&format!("Items/{item_id}/Images/{}", image_type(slot)))
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
        // The image upload endpoint takes the file base64-encoded.
        self.http
            .post_body(
                &format!("Items/{target}/Images/{}", image_type(file.file_type.slot())),
                &image.content_type,
                STANDARD.encode(&image.bytes),
            )
            .await?;

        slot.record(file);
        info!(
            server = %self.kind,
            item = %item.title,
            target = %target,
            file_type = file.file_type.as_str(),
            asset_id = %file.asset_id,
            "artwork pushed"
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
        let tmdb_id = tmdb_id.trim();
        if tmdb_id.is_empty() {
            return Err(MediaServerError::InvalidInput("tmdb id is required".into()));
        }
        let item_type = match media_type {
            MediaType::Movie => "Movie",
            MediaType::Show => "Series",
        };
        let data = self
            .http
            .get_json(
                &format!("Users/{}/Items", self.user_id()?),
                &[
                    ("Recursive", "true"),
                    ("ParentId", section.id.as_str()),
                    ("IncludeItemTypes", item_type),
                    ("SearchTerm", title),
                    ("Fields", "ProviderIds"),
                ],
            )
            .await?;

        items(&data)
            .iter()
            .find(|it| it["ProviderIds"]["Tmdb"].as_str() == Some(tmdb_id))
            .and_then(|it| it["Id"].as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                MediaServerError::IdentityResolution(format!(
                    "tmdb {tmdb_id} ('{title}') in section '{}'",
                    section.title
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubFetcher, cache, file};
    use artsync_core::index::StaticItemIndex;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer, user_id: Option<&str>) -> ServerSettings {
        ServerSettings {
            kind: MediaServerKind::Jellyfin,
            base_url: server.uri(),
            token: "jf-token".into(),
            user_id: user_id.map(str::to_string),
            timeout: Duration::from_secs(5),
        }
    }

    fn jellyfin(server: &MockServer, root: &std::path::Path) -> EmbyJellyfinServer {
        EmbyJellyfinServer::new(
            &settings(server, Some("u1")),
            Arc::new(StaticItemIndex::new(["m1"])),
            cache(root, Arc::new(StubFetcher::default())),
        )
        .unwrap()
    }

    fn shows() -> LibrarySection {
        LibrarySection {
            id: "lib-tv".into(),
            title: "Shows".into(),
            media_type: MediaType::Show,
        }
    }

    fn movies() -> LibrarySection {
        LibrarySection {
            id: "lib-movies".into(),
            title: "Movies".into(),
            media_type: MediaType::Movie,
        }
    }

    #[tokio::test]
    async fn normalizes_items_and_filters_episodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Users/u1/Items"))
            .and(query_param("ParentId", "lib-movies"))
            .and(query_param("StartIndex", "500"))
            .and(query_param("Limit", "500"))
            .and(header("X-Emby-Token", "jf-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "TotalRecordCount": 502,
                "Items": [
                    {
                        "Id": "m1", "Type": "Movie", "Name": "Heat", "ProductionYear": 1995,
                        "ProviderIds": { "Tmdb": "949", "Imdb": "tt0113277" },
                        "ImageTags": { "Primary": "abc" },
                        "DateCreated": "2024-01-05T10:00:00.0000000Z",
                        "PremiereDate": "1995-12-15T00:00:00.0000000Z"
                    },
                    { "Id": "e1", "Type": "Episode", "Name": "Pilot" }
                ]
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let page = jellyfin(&server, dir.path())
            .fetch_library_section_items(&movies(), 500, 500)
            .await
            .unwrap();

        assert_eq!(page.total, 502);
        assert_eq!(page.items.len(), 1);
        let heat = &page.items[0];
        assert_eq!(heat.media_type, MediaType::Movie);
        assert_eq!(heat.external_ids.tmdb(), Some("949"));
        assert_eq!(heat.external_ids.get("imdb"), Some("tt0113277"));
        assert_eq!(heat.thumb.as_deref(), Some("abc"));
        assert_eq!(heat.added_at, 1_704_448_800_000);
        assert_eq!(heat.released_at, 818_985_600_000);
        assert_eq!(heat.library_title, "Movies");
        assert!(heat.exists_locally);
    }

    #[tokio::test]
    async fn missing_user_id_is_a_configuration_error() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let jf = EmbyJellyfinServer::new(
            &settings(&server, None),
            Arc::new(StaticItemIndex::default()),
            cache(dir.path(), Arc::default()),
        )
        .unwrap();

        let err = jf.fetch_library_section_items(&movies(), 0, 500).await.unwrap_err();
        assert!(matches!(err, MediaServerError::Configuration(_)));
    }

    #[tokio::test]
    async fn admin_user_is_discovered() {
        let server = MockServer::start().await;
        Mock::given(path("/Users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "Id": "viewer", "Policy": { "IsAdministrator": false } },
                { "Id": "admin-1", "Policy": { "IsAdministrator": true } },
                { "Id": "admin-2", "Policy": { "IsAdministrator": true } }
            ])))
            .mount(&server)
            .await;

        let id = fetch_admin_user_id(&settings(&server, None)).await.unwrap();
        assert_eq!(id, "admin-1");
    }

    #[tokio::test]
    async fn search_matches_provider_id() {
        let server = MockServer::start().await;
        Mock::given(path("/Users/u1/Items"))
            .and(query_param("SearchTerm", "Severance"))
            .and(query_param("IncludeItemTypes", "Series"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "TotalRecordCount": 1,
                "Items": [{ "Id": "s1", "Type": "Series", "Name": "Severance", "ProviderIds": { "Tmdb": "95396" } }]
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let jf = jellyfin(&server, dir.path());
        assert_eq!(
            jf.search_for_item_and_get_rating_key("95396", MediaType::Show, "Severance", &shows())
                .await
                .unwrap(),
            "s1"
        );
        let err = jf
            .search_for_item_and_get_rating_key("1", MediaType::Show, "Severance", &shows())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaServerError::IdentityResolution(_)));
    }

    #[tokio::test]
    async fn pushes_base64_body_once_per_version() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Items/s1/Images/Primary"))
            .and(header("content-type", "image/jpeg"))
            .and(body_string(STANDARD.encode(b"P1-bytes")))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let jf = jellyfin(&server, dir.path());
        let item = jf_show();
        let poster = file("P1", "2024-05-01T00:00:00Z", PosterFileType::Poster);
        jf.download_and_update_posters(&item, &poster).await.unwrap();
        jf.download_and_update_posters(&item, &poster).await.unwrap();
    }

    #[tokio::test]
    async fn title_card_targets_matching_episode() {
        let server = MockServer::start().await;
        Mock::given(path("/Shows/s1/Episodes"))
            .and(query_param("Season", "1"))
            .and(query_param("UserId", "u1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Items": [
                    { "Id": "ep1", "IndexNumber": 1, "ParentIndexNumber": 1 },
                    { "Id": "ep2", "IndexNumber": 2, "ParentIndexNumber": 1 }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/Items/ep2/Images/Primary"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let jf = jellyfin(&server, dir.path());
        let mut card = file("T2", "2024-05-01T00:00:00Z", PosterFileType::TitleCard);
        card.season_number = Some(1);
        card.episode_number = Some(2);
        jf.download_and_update_posters(&jf_show(), &card).await.unwrap();
    }

    #[tokio::test]
    async fn failed_upload_is_not_recorded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Items/s1/Images/Backdrop"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let jf = jellyfin(&server, dir.path());
        let backdrop = file("B1", "2024-05-01T00:00:00Z", PosterFileType::Backdrop);
        for _ in 0..2 {
            let err = jf.download_and_update_posters(&jf_show(), &backdrop).await.unwrap_err();
            assert!(matches!(err, MediaServerError::Status { status: 500, .. }));
        }
    }

    #[tokio::test]
    async fn overlapping_pushes_of_one_version_upload_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Items/s1/Images/Primary"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(50)))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let jf = jellyfin(&server, dir.path());
        let poster = file("P1", "2024-05-01T00:00:00Z", PosterFileType::Poster);
        let show = jf_show();

        let (a, b) = tokio::join!(
            jf.download_and_update_posters(&show, &poster),
            jf.download_and_update_posters(&show, &poster)
        );
        a.unwrap();
        b.unwrap();
    }

    fn jf_show() -> MediaItem {
        MediaItem {
            rating_key: "s1".into(),
            media_type: MediaType::Show,
            title: "Severance".into(),
            year: Some(2022),
            thumb: None,
            library_title: "Shows".into(),
            external_ids: ExternalIds::new(),
            added_at: 0,
            released_at: 0,
            exists_locally: true,
        }
    }
}
