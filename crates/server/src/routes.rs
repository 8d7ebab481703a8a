use std::time::Instant;

use artsync_artwork::{ArtworkError, ImageSource};
use artsync_core::error::{ApiError, ErrorKind};
use artsync_core::types::{
    ImageSlot, LibrarySection, MediaItem, MediaType, PosterFile, PosterFileType, QualityTier,
};
use artsync_db::repo::{media_items, saved_sets};
use artsync_mediaserver::{LibrarySynchronizer, SectionSummary};
use axum::extract::State;
use axum::http::{HeaderName, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::autodownload::{SweepReport, run_auto_download};
use crate::error::AppError;
use crate::extract::{AppJson, AppPath, AppQuery};
use crate::state::AppState;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        // Media server
        .route("/mediaserver/status", get(mediaserver_status))
        .route("/mediaserver/sections", get(list_sections))
        .route("/mediaserver/items", get(list_items))
        .route("/mediaserver/items/{id}", get(get_item))
        .route("/mediaserver/items/{id}/images/{slot}", get(get_item_image))
        .route("/mediaserver/items/{id}/artwork", post(push_artwork))
        .route("/mediaserver/search", get(search_item))
        // Artwork provider
        .route("/mediux/image", get(missing_asset_id))
        .route("/mediux/image/{asset_id}", get(get_mediux_image))
        // Saved sets
        .route("/sets", post(save_set))
        .route("/autodownload/run", post(run_autodownload))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    sqlx::query("SELECT 1")
        .execute(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("database check failed: {e}")))?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Media server
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct StatusResponse {
    server: String,
    version: String,
}

async fn mediaserver_status(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, AppError> {
    let version = state.media_server.get_status().await?;
    Ok(Json(StatusResponse {
        server: state.media_server.kind().to_string(),
        version,
    }))
}

#[derive(Serialize)]
struct SectionEntry {
    name: String,
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    section: Option<LibrarySection>,
}

async fn list_sections(State(state): State<AppState>) -> Json<Vec<SectionEntry>> {
    let entries = state
        .config
        .media_server
        .libraries
        .iter()
        .map(|lib| {
            let section = state.section_by_title(&lib.name).cloned();
            SectionEntry {
                name: lib.name.clone(),
                found: section.is_some(),
                section,
            }
        })
        .collect();
    Json(entries)
}

#[derive(Serialize)]
struct ItemsResponse<'a> {
    sections: Vec<SectionSummary<'a>>,
    total: usize,
    items: Vec<&'a MediaItem>,
}

async fn list_items(State(state): State<AppState>) -> Response {
    let report = LibrarySynchronizer::new(state.media_server.clone())
        .synchronize_all(&state.sections)
        .await;
    info!(items = report.items().count(), failed = report.failed(), "library sync finished");

    let items: Vec<&MediaItem> = report.items().collect();
    Json(ItemsResponse {
        sections: report.summaries(),
        total: items.len(),
        items,
    })
    .into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemQuery {
    #[serde(default)]
    section_title: String,
}

async fn get_item(
    State(state): State<AppState>,
    AppPath(id): AppPath<String>,
    AppQuery(query): AppQuery<ItemQuery>,
) -> Result<Json<MediaItem>, AppError> {
    let item = state
        .media_server
        .fetch_item_content(&id, &query.section_title)
        .await?;
    Ok(Json(item))
}

fn sniff_content_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP".as_slice()) {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

async fn get_item_image(
    State(state): State<AppState>,
    AppPath((id, slot)): AppPath<(String, String)>,
) -> Result<Response, AppError> {
    let slot = ImageSlot::parse(&slot).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "invalid image slot '{slot}', must be one of: poster, backdrop"
        ))
    })?;
    let bytes = state
        .media_server
        .fetch_image_from_media_server(&id, slot)
        .await?;
    Ok(([(header::CONTENT_TYPE, sniff_content_type(&bytes))], bytes).into_response())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushArtworkRequest {
    #[serde(default)]
    section_title: String,
    file: PosterFile,
}

#[derive(Serialize)]
struct OkResponse {
    status: &'static str,
}

async fn push_artwork(
    State(state): State<AppState>,
    AppPath(id): AppPath<String>,
    AppJson(body): AppJson<PushArtworkRequest>,
) -> Result<Json<OkResponse>, AppError> {
    let item = state
        .media_server
        .fetch_item_content(&id, &body.section_title)
        .await?;
    state
        .media_server
        .download_and_update_posters(&item, &body.file)
        .await?;
    Ok(Json(OkResponse { status: "ok" }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchQuery {
    tmdb_id: String,
    #[serde(rename = "type")]
    media_type: String,
    #[serde(default)]
    title: String,
    section: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    rating_key: String,
}

async fn search_item(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<SearchQuery>,
) -> Result<Json<SearchResponse>, AppError> {
    let media_type = MediaType::from_config(&query.media_type).ok_or_else(|| {
        ApiError::BadRequest(format!("invalid type '{}', must be movie or show", query.media_type))
    })?;
    let section = state
        .section_by_title(&query.section)
        .ok_or_else(|| {
            ApiError::NotFound(format!("library '{}' is not configured", query.section))
        })?;

    let rating_key = state
        .media_server
        .search_for_item_and_get_rating_key(&query.tmdb_id, media_type, &query.title, section)
        .await?;
    Ok(Json(SearchResponse { rating_key }))
}

// ---------------------------------------------------------------------------
// Artwork provider images
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediuxImageQuery {
    #[serde(default)]
    modified_date: String,
    #[serde(default)]
    quality: String,
}

/// Caller-input problems are 400; every fetch or cache failure is 500.
fn image_error(err: ArtworkError, started: Instant) -> AppError {
    let message = err.to_string();
    let error = match err.kind() {
        ErrorKind::InvalidInput => ApiError::BadRequest(message),
        _ => ApiError::Internal(message),
    };
    AppError {
        error,
        help: err.help_text().map(str::to_string),
        elapsed: None,
    }
    .with_elapsed(started)
}

fn parse_modified_date(raw: &str) -> Result<DateTime<Utc>, ArtworkError> {
    match raw.trim() {
        "" | "0" | "undefined" => Ok(Utc::now()),
        raw => DateTime::parse_from_rfc3339(raw)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| ArtworkError::InvalidInput(format!("modifiedDate '{raw}': {e}"))),
    }
}

async fn missing_asset_id() -> AppError {
    image_error(
        ArtworkError::InvalidInput("missing asset id".into()),
        Instant::now(),
    )
}

async fn get_mediux_image(
    State(state): State<AppState>,
    AppPath(asset_id): AppPath<String>,
    AppQuery(query): AppQuery<MediuxImageQuery>,
) -> Result<Response, AppError> {
    let started = Instant::now();

    let quality = match query.quality.trim() {
        "" => QualityTier::Thumb,
        raw => QualityTier::parse(raw).ok_or_else(|| {
            image_error(
                ArtworkError::InvalidInput(format!("quality '{raw}', must be thumb or full")),
                started,
            )
        })?,
    };
    let modified_at =
        parse_modified_date(&query.modified_date).map_err(|e| image_error(e, started))?;

    let image = state
        .preview_cache
        .get_or_fetch(&asset_id, modified_at, quality)
        .await
        .map_err(|e| image_error(e, started))?;

    let source = match image.source {
        ImageSource::Cache => "HIT",
        ImageSource::Remote => "MISS",
    };
    Ok((
        [
            (header::CONTENT_TYPE, image.content_type),
            (X_CACHE, source.to_string()),
        ],
        image.bytes,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Saved sets
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveSetRequest {
    rating_key: String,
    #[serde(default)]
    section_title: String,
    set_id: String,
    set_type: String,
    selected_types: Vec<PosterFileType>,
    #[serde(default)]
    auto_download: bool,
    last_update: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SavedSetResponse {
    id: String,
    rating_key: String,
    set_id: String,
    set_type: String,
    selected_types: Vec<PosterFileType>,
    auto_download: bool,
    last_update: String,
}

async fn save_set(
    State(state): State<AppState>,
    AppJson(body): AppJson<SaveSetRequest>,
) -> Result<Json<SavedSetResponse>, AppError> {
    if body.set_id.trim().is_empty() {
        return Err(ApiError::BadRequest("setId is required".into()).into());
    }
    if !matches!(body.set_type.as_str(), "movie" | "show" | "collection") {
        return Err(ApiError::BadRequest(format!(
            "invalid setType '{}', must be movie, show or collection",
            body.set_type
        ))
        .into());
    }
    if body.selected_types.is_empty() {
        return Err(ApiError::BadRequest("selectedTypes must not be empty".into()).into());
    }

    let item = state
        .media_server
        .fetch_item_content(&body.rating_key, &body.section_title)
        .await?;
    media_items::upsert(
        &state.db,
        &item.rating_key,
        &item.library_title,
        item.media_type,
        &item.title,
        item.year,
        item.external_ids.tmdb(),
    )
    .await?;

    let last_update = body.last_update.unwrap_or_else(Utc::now).to_rfc3339();
    let row = saved_sets::upsert(
        &state.db,
        &item.rating_key,
        &body.set_id,
        &body.set_type,
        &body.selected_types,
        body.auto_download,
        &last_update,
    )
    .await?;
    info!(
        set_id = %row.set_id,
        rating_key = %row.rating_key,
        auto_download = row.auto_download,
        "saved set"
    );

    Ok(Json(SavedSetResponse {
        id: row.id,
        rating_key: row.rating_key,
        set_id: row.set_id,
        set_type: row.set_type,
        selected_types: row.selected_types,
        auto_download: row.auto_download,
        last_update: row.last_update,
    }))
}

async fn run_autodownload(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    Ok(Json(run_auto_download(&state).await?))
}
