use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical item type. Backend types outside this set are dropped during
/// normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Movie,
    Show,
}

impl MediaType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Show => "show",
        }
    }

    /// Map a backend type string (`Movie`, `Series`, `movie`, `show`) to the
    /// canonical enum. Anything else (`Episode`, `artist`, …) yields `None`.
    pub fn from_backend(raw: &str) -> Option<Self> {
        match raw {
            "Movie" | "movie" => Some(Self::Movie),
            "Series" | "show" => Some(Self::Show),
            _ => None,
        }
    }

    /// Parse a configured library type, case-insensitively.
    pub fn from_config(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "movie" | "movies" => Some(Self::Movie),
            "show" | "shows" | "series" => Some(Self::Show),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which media-server backend is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaServerKind {
    Plex,
    Emby,
    Jellyfin,
}

impl MediaServerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plex => "Plex",
            Self::Emby => "Emby",
            Self::Jellyfin => "Jellyfin",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "plex" => Some(Self::Plex),
            "emby" => Some(Self::Emby),
            "jellyfin" => Some(Self::Jellyfin),
            _ => None,
        }
    }

    /// Header carrying the access token. Emby and Jellyfin share one scheme.
    pub fn auth_header(self) -> &'static str {
        match self {
            Self::Plex => "X-Plex-Token",
            Self::Emby | Self::Jellyfin => "X-Emby-Token",
        }
    }
}

impl std::fmt::Display for MediaServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured library to synchronize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibrarySection {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalId {
    pub provider: String,
    pub id: String,
}

/// Ordered (provider, id) pairs; a provider appears at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalIds(Vec<ExternalId>);

impl ExternalIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pair. Returns false (and keeps the first value) when the
    /// provider is already present or either side is empty.
    pub fn insert(&mut self, provider: &str, id: &str) -> bool {
        let provider = provider.trim().to_ascii_lowercase();
        let id = id.trim();
        if provider.is_empty() || id.is_empty() || self.get(&provider).is_some() {
            return false;
        }
        self.0.push(ExternalId {
            provider,
            id: id.to_string(),
        });
        true
    }

    pub fn get(&self, provider: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.provider.eq_ignore_ascii_case(provider))
            .map(|e| e.id.as_str())
    }

    pub fn tmdb(&self) -> Option<&str> {
        self.get("tmdb")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExternalId> {
        self.0.iter()
    }
}

/// Canonical representation of a library entry, rebuilt on every pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub rating_key: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub title: String,
    pub year: Option<i32>,
    pub thumb: Option<String>,
    pub library_title: String,
    pub external_ids: ExternalIds,
    pub added_at: i64,
    pub released_at: i64,
    pub exists_locally: bool,
}

/// Requested size of an artwork asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Thumb,
    Full,
}

impl QualityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thumb => "thumb",
            Self::Full => "full",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "thumb" => Some(Self::Thumb),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

/// Configured quality for full-size downloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadQuality {
    Original,
    #[default]
    Optimized,
}

impl DownloadQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Optimized => "optimized",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "original" => Some(Self::Original),
            "optimized" => Some(Self::Optimized),
            _ => None,
        }
    }
}

/// Image slot on a media-server item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSlot {
    Poster,
    Backdrop,
}

impl ImageSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Poster => "poster",
            Self::Backdrop => "backdrop",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "poster" | "thumb" | "primary" => Some(Self::Poster),
            "backdrop" | "art" => Some(Self::Backdrop),
            _ => None,
        }
    }
}

/// What a poster file is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PosterFileType {
    Poster,
    Backdrop,
    #[serde(alias = "seasonPoster")]
    SeasonPoster,
    #[serde(rename = "titlecard")]
    TitleCard,
}

impl PosterFileType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Poster => "poster",
            Self::Backdrop => "backdrop",
            Self::SeasonPoster => "season_poster",
            Self::TitleCard => "titlecard",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "poster" => Some(Self::Poster),
            "backdrop" => Some(Self::Backdrop),
            "season_poster" | "seasonPoster" => Some(Self::SeasonPoster),
            "titlecard" | "title_card" => Some(Self::TitleCard),
            _ => None,
        }
    }

    /// Backdrops go to the art slot; everything else replaces a poster/thumb.
    pub fn slot(self) -> ImageSlot {
        match self {
            Self::Backdrop => ImageSlot::Backdrop,
            _ => ImageSlot::Poster,
        }
    }
}

/// A specific artwork asset to apply to a [`MediaItem`].
///
/// `(asset_id, modified_at)` is treated as a content version: two values with
/// the same pair are assumed byte-identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PosterFile {
    pub asset_id: String,
    pub modified_at: DateTime<Utc>,
    #[serde(default = "default_quality")]
    pub quality: QualityTier,
    pub file_type: PosterFileType,
    #[serde(default)]
    pub season_number: Option<u32>,
    #[serde(default)]
    pub episode_number: Option<u32>,
}

fn default_quality() -> QualityTier {
    QualityTier::Full
}

impl PosterFile {
    /// Full-precision version identity, used to recognise repeated pushes.
    pub fn version_key(&self) -> String {
        format!("{}_{}", self.asset_id, self.modified_at.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_types_map_to_canonical_enum() {
        assert_eq!(MediaType::from_backend("Movie"), Some(MediaType::Movie));
        assert_eq!(MediaType::from_backend("Series"), Some(MediaType::Show));
        assert_eq!(MediaType::from_backend("show"), Some(MediaType::Show));
        assert_eq!(MediaType::from_backend("Episode"), None);
        assert_eq!(MediaType::from_backend("artist"), None);
    }

    #[test]
    fn external_ids_reject_duplicate_provider() {
        let mut ids = ExternalIds::new();
        assert!(ids.insert("tmdb", "603"));
        assert!(!ids.insert("TMDB", "999"));
        assert!(ids.insert("imdb", "tt0133093"));
        assert!(!ids.insert("tvdb", ""));
        assert_eq!(ids.len(), 2);
        assert_eq!(ids.tmdb(), Some("603"));
    }

    #[test]
    fn server_kind_parsing_is_case_insensitive() {
        assert_eq!(MediaServerKind::parse("PLEX"), Some(MediaServerKind::Plex));
        assert_eq!(MediaServerKind::parse(" jellyfin "), Some(MediaServerKind::Jellyfin));
        assert_eq!(MediaServerKind::parse("kodi"), None);
        assert_eq!(MediaServerKind::Jellyfin.auth_header(), "X-Emby-Token");
    }

    #[test]
    fn poster_file_deserializes_from_camel_case() {
        let file: PosterFile = serde_json::from_value(serde_json::json!({
            "assetId": "A123",
            "modifiedAt": "2024-05-01T10:00:00Z",
            "fileType": "titlecard",
            "seasonNumber": 1,
            "episodeNumber": 4
        }))
        .unwrap();
        assert_eq!(file.quality, QualityTier::Full);
        assert_eq!(file.file_type, PosterFileType::TitleCard);
        assert_eq!(file.file_type.slot(), ImageSlot::Poster);
        assert_eq!(file.version_key(), "A123_2024-05-01T10:00:00+00:00");
    }
}
