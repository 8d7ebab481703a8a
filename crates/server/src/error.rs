use std::time::{Duration, Instant};

use artsync_core::error::{ApiError, ErrorEnvelope};
use artsync_db::DbError;
use artsync_mediaserver::MediaServerError;
use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Newtype wrapper so we can implement `IntoResponse` in this crate. Carries
/// optional help text and the handler's elapsed time into the envelope.
#[derive(Debug)]
pub struct AppError {
    pub error: ApiError,
    pub help: Option<String>,
    pub elapsed: Option<Duration>,
}

impl AppError {
    pub fn with_elapsed(mut self, started: Instant) -> Self {
        self.elapsed = Some(started.elapsed());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = ErrorEnvelope::from(&self.error)
            .with_help(self.help)
            .with_elapsed(self.elapsed.map(|d| format!("{}ms", d.as_millis())));
        (status, Json(envelope)).into_response()
    }
}

impl From<ApiError> for AppError {
    fn from(error: ApiError) -> Self {
        Self {
            error,
            help: None,
            elapsed: None,
        }
    }
}

impl From<MediaServerError> for AppError {
    fn from(e: MediaServerError) -> Self {
        Self {
            error: ApiError::from_kind(e.kind(), e.to_string()),
            help: e.help_text().map(str::to_string),
            elapsed: None,
        }
    }
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        tracing::error!(error = %e, "database error");
        ApiError::Internal(e.to_string()).into()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        DbError::from(e).into()
    }
}

// Extractor rejections are caller-input errors.

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text()).into()
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text()).into()
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text()).into()
    }
}
