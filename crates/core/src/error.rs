use serde::Serialize;
use thiserror::Error;

/// Coarse classification shared by every crate's error type, so callers
/// (HTTP handlers, the scheduler) can decide between retrying and surfacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid settings. Fatal at startup.
    Configuration,
    /// Connection refused, TLS failure.
    Transport,
    /// A transport failure where the request deadline elapsed.
    Timeout,
    /// Malformed JSON, missing field, non-2xx status.
    Upstream,
    /// Writing to the on-disk artwork cache failed.
    CachePersistence,
    /// No backend-native id matched an external id.
    IdentityResolution,
    /// Caller supplied a bad parameter.
    InvalidInput,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Upstream => "upstream",
            Self::CachePersistence => "cache_persistence",
            Self::IdentityResolution => "identity_resolution",
            Self::InvalidInput => "invalid_input",
        }
    }

    /// Whether a caller may reasonably retry the same call later.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Transport | Self::Timeout | Self::Upstream | Self::CachePersistence
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified API error type.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Upstream(_) => "upstream_error",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::Upstream(_) => 502,
            Self::Timeout(_) => 504,
            Self::Internal(_) => 500,
        }
    }

    /// Map a classified library error onto the HTTP-facing variants.
    pub fn from_kind(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::InvalidInput => Self::BadRequest(message),
            ErrorKind::IdentityResolution => Self::NotFound(message),
            ErrorKind::Timeout => Self::Timeout(message),
            ErrorKind::Transport | ErrorKind::Upstream => Self::Upstream(message),
            ErrorKind::Configuration | ErrorKind::CachePersistence => Self::Internal(message),
        }
    }
}

/// JSON error envelope:
/// `{ "status": "error", "code": "…", "message": "…", "help": …, "elapsed": "…" }`
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub status: &'static str,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<String>,
}

impl ErrorEnvelope {
    pub fn with_help(mut self, help: Option<String>) -> Self {
        self.help = help;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Option<String>) -> Self {
        self.elapsed = elapsed;
        self
    }
}

impl From<&ApiError> for ErrorEnvelope {
    fn from(e: &ApiError) -> Self {
        Self {
            status: "error",
            code: e.code().to_string(),
            message: e.to_string(),
            help: None,
            elapsed: None,
        }
    }
}
