//! Mediux artwork provider client.
//!
//! Assets are served from `/assets/{id}`; sets come from the collection
//! endpoints `/items/{type}_sets/{id}`.

use std::time::Duration;

use artsync_core::types::{DownloadQuality, PosterFile, PosterFileType, QualityTier};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::{ArtworkError, AssetFetcher, FetchedImage, PosterSet, SetCatalog};

pub const DEFAULT_BASE_URL: &str = "https://staged.mediux.io";
const USER_AGENT: &str = concat!("artsync/", env!("CARGO_PKG_VERSION"));

const SET_FIELDS: &str = "id,date_updated,files.id,files.modified_on,files.file_type,\
                          files.season.season_number,files.episode.episode_number,\
                          files.episode.season_id.season_number";

pub struct MediuxClient {
    base_url: String,
    token: String,
    download_quality: DownloadQuality,
    client: reqwest::Client,
}

impl MediuxClient {
    pub fn new(
        base_url: &str,
        token: String,
        download_quality: DownloadQuality,
        timeout: Duration,
    ) -> Result<Self, ArtworkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ArtworkError::Transport(format!("build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            download_quality,
            client,
        })
    }

    fn asset_url(
        &self,
        asset_id: &str,
        modified_at: DateTime<Utc>,
        quality: QualityTier,
    ) -> String {
        // The date is a cache-buster so a new revision bypasses CDN copies.
        let mut url = format!(
            "{}/assets/{}?{}",
            self.base_url,
            asset_id,
            modified_at.format("%Y%m%d")
        );
        match (quality, self.download_quality) {
            (QualityTier::Thumb, _) => url.push_str("&key=thumb"),
            (QualityTier::Full, DownloadQuality::Optimized) => url.push_str("&key=jpg"),
            (QualityTier::Full, DownloadQuality::Original) => {}
        }
        url
    }
}

#[async_trait::async_trait]
impl AssetFetcher for MediuxClient {
    async fn fetch_asset(
        &self,
        asset_id: &str,
        modified_at: DateTime<Utc>,
        quality: QualityTier,
    ) -> Result<FetchedImage, ArtworkError> {
        let url = self.asset_url(asset_id, modified_at, quality);
        debug!(asset_id = %asset_id, quality = quality.as_str(), "fetching Mediux asset");

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(ArtworkError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ArtworkError::Status {
                status: status.as_u16(),
                resource: format!("asset {asset_id}"),
            });
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ArtworkError::MissingContentType(asset_id.to_string()))?;

        let bytes = resp.bytes().await.map_err(ArtworkError::from_reqwest)?;
        if bytes.is_empty() {
            return Err(ArtworkError::EmptyBody(asset_id.to_string()));
        }

        trace!(
            asset_id = %asset_id,
            len = bytes.len(),
            content_type = %content_type,
            "Mediux asset fetched"
        );
        Ok(FetchedImage {
            bytes,
            content_type,
        })
    }
}

#[derive(Deserialize)]
struct SetEnvelope {
    data: Option<SetRecord>,
}

#[derive(Deserialize)]
struct SetRecord {
    id: serde_json::Value,
    date_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    files: Vec<FileRecord>,
}

#[derive(Deserialize)]
struct FileRecord {
    id: String,
    modified_on: Option<DateTime<Utc>>,
    file_type: String,
    season: Option<SeasonRef>,
    episode: Option<EpisodeRef>,
}

#[derive(Deserialize)]
struct SeasonRef {
    season_number: Option<u32>,
}

#[derive(Deserialize)]
struct EpisodeRef {
    episode_number: Option<u32>,
    season_id: Option<SeasonRef>,
}

fn id_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn set_from_record(record: SetRecord) -> Result<PosterSet, ArtworkError> {
    let id = id_to_string(&record.id);
    let date_updated = record
        .date_updated
        .ok_or_else(|| ArtworkError::Parse(format!("set {id} has no date_updated")))?;

    let files = record
        .files
        .into_iter()
        .filter_map(|f| {
            let season_number = f.season.as_ref().and_then(|s| s.season_number).or_else(|| {
                f.episode
                    .as_ref()
                    .and_then(|e| e.season_id.as_ref())
                    .and_then(|s| s.season_number)
            });
            let episode_number = f.episode.as_ref().and_then(|e| e.episode_number);

            let file_type = match (f.file_type.as_str(), season_number, episode_number) {
                ("poster", Some(_), None) => PosterFileType::SeasonPoster,
                ("poster", None, None) => PosterFileType::Poster,
                ("backdrop", _, _) => PosterFileType::Backdrop,
                ("title_card" | "titlecard", Some(_), Some(_)) => PosterFileType::TitleCard,
                (other, _, _) => {
                    debug!(file_id = %f.id, file_type = %other, "skipping unsupported set file");
                    return None;
                }
            };

            Some(PosterFile {
                asset_id: f.id,
                modified_at: f.modified_on.unwrap_or(date_updated),
                quality: QualityTier::Full,
                file_type,
                season_number,
                episode_number,
            })
        })
        .collect();

    Ok(PosterSet {
        id,
        date_updated,
        files,
    })
}

#[async_trait::async_trait]
impl SetCatalog for MediuxClient {
    async fn fetch_set(&self, set_type: &str, set_id: &str) -> Result<PosterSet, ArtworkError> {
        let collection = match set_type {
            "movie" | "show" | "collection" => format!("{set_type}_sets"),
            other => {
                return Err(ArtworkError::InvalidInput(format!(
                    "unknown set type '{other}'"
                )));
            }
        };
        let url = format!("{}/items/{}/{}", self.base_url, collection, set_id);

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("fields", SET_FIELDS)])
            .send()
            .await
            .map_err(ArtworkError::from_reqwest)?;

        if !resp.status().is_success() {
            return Err(ArtworkError::Status {
                status: resp.status().as_u16(),
                resource: format!("{collection}/{set_id}"),
            });
        }

        let envelope: SetEnvelope = resp
            .json()
            .await
            .map_err(|e| ArtworkError::Parse(format!("set {set_id}: {e}")))?;
        let record = envelope
            .data
            .ok_or_else(|| ArtworkError::Parse(format!("set {set_id}: missing data")))?;
        set_from_record(record)
    }
}
