pub mod cache;
pub mod mediux;
pub mod staleness;

use artsync_core::error::ErrorKind;
use artsync_core::types::{PosterFile, QualityTier};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use cache::{ArtworkCache, CachedImage, ImageSource, cache_key};
pub use staleness::is_stale;

/// Errors are `Clone` so one fetch result can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtworkError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("provider returned an empty body for asset {0}")]
    EmptyBody(String),
    #[error("provider sent no content type for asset {0}")]
    MissingContentType(String),
    #[error("provider returned status {status} for {resource}")]
    Status { status: u16, resource: String },
    #[error("network error: {0}")]
    Transport(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("cache write failed: {0}")]
    Persist(String),
}

impl ArtworkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::EmptyBody(_)
            | Self::MissingContentType(_)
            | Self::Status { .. }
            | Self::Parse(_) => {
                ErrorKind::Upstream
            }
            Self::Transport(_) => ErrorKind::Transport,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Persist(_) => ErrorKind::CachePersistence,
        }
    }

    pub fn help_text(&self) -> Option<&'static str> {
        match self {
            Self::Status { status: 401 | 403, .. } => {
                Some("Check that Mediux.Token is valid and has not expired.")
            }
            Self::Status { status: 404, .. } => {
                Some("The asset or set no longer exists on the artwork provider.")
            }
            Self::Timeout(_) | Self::Transport(_) => {
                Some("The artwork provider could not be reached; try again later.")
            }
            Self::Persist(_) => Some("Check that the data directory is writable."),
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Raw image bytes with the provider's content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Remote source of asset bytes. One call is one network fetch.
#[async_trait::async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch_asset(
        &self,
        asset_id: &str,
        modified_at: DateTime<Utc>,
        quality: QualityTier,
    ) -> Result<FetchedImage, ArtworkError>;
}

/// A provider-side set of artwork files for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct PosterSet {
    pub id: String,
    pub date_updated: DateTime<Utc>,
    pub files: Vec<PosterFile>,
}

/// Looks up sets so the auto-download sweep can learn their revision date.
#[async_trait::async_trait]
pub trait SetCatalog: Send + Sync {
    async fn fetch_set(&self, set_type: &str, set_id: &str) -> Result<PosterSet, ArtworkError>;
}
