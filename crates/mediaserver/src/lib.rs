pub mod emby_jellyfin;
pub mod plex;
mod push;
pub mod server;
pub mod sync;
mod transport;

#[cfg(test)]
mod testing;

use artsync_artwork::ArtworkError;
use artsync_core::error::ErrorKind;
use thiserror::Error;

pub use server::{ItemPage, MediaServer, ServerSettings, connect};
pub use sync::{
    DEFAULT_PAGE_SIZE, LibrarySynchronizer, SectionSummary, SectionSync, SyncOutcome, SyncReport,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaServerError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("no matching item: {0}")]
    IdentityResolution(String),
    #[error("media server returned status {status} for {resource}")]
    Status { status: u16, resource: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("network error: {0}")]
    Transport(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Artwork(#[from] ArtworkError),
}

impl MediaServerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotFound(_) | Self::IdentityResolution(_) => ErrorKind::IdentityResolution,
            Self::Status { .. } | Self::Parse(_) => ErrorKind::Upstream,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Artwork(e) => e.kind(),
        }
    }

    pub fn help_text(&self) -> Option<&'static str> {
        match self {
            Self::Status { status: 401 | 403, .. } => {
                Some("Check that MediaServer.Token is valid for this server.")
            }
            Self::Parse(_) => {
                Some("Ensure the media server is returning a valid JSON response.")
            }
            Self::Transport(_) | Self::Timeout(_) => {
                Some("Check that MediaServer.URL is reachable from this host.")
            }
            Self::IdentityResolution(_) => {
                Some("Ensure the item exists in the library section and has a TMDB id.")
            }
            Self::Configuration(_) => Some("Review the MediaServer section of the configuration."),
            Self::Artwork(e) => e.help_text(),
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
