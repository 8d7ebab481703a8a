use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use artsync_artwork::{
    ArtworkCache, ArtworkError, AssetFetcher, FetchedImage, PosterSet, SetCatalog,
};
use artsync_core::types::{
    LibrarySection, MediaType, PosterFile, PosterFileType, QualityTier,
};
use artsync_db::SqliteItemIndex;
use artsync_db::repo::{media_items, saved_sets};
use artsync_server::config::FileConfig;
use artsync_server::notify::{NotificationDispatcher, Notifier, NotifyError};
use artsync_server::routes::build_router;
use artsync_server::state::AppState;
use axum::http::StatusCode;
use axum_test::TestServer;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Serves `{asset}-bytes` as PNG; asset `broken` fails upstream.
#[derive(Default)]
struct CountingFetcher {
    calls: AtomicUsize,
}

impl CountingFetcher {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AssetFetcher for CountingFetcher {
    async fn fetch_asset(
        &self,
        asset_id: &str,
        _: DateTime<Utc>,
        _: QualityTier,
    ) -> Result<FetchedImage, ArtworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if asset_id == "broken" {
            return Err(ArtworkError::Status {
                status: 502,
                resource: format!("/assets/{asset_id}"),
            });
        }
        Ok(FetchedImage {
            bytes: Bytes::from(format!("{asset_id}-bytes")),
            content_type: "image/png".to_string(),
        })
    }
}

struct FakeCatalog {
    set: PosterSet,
}

#[async_trait::async_trait]
impl SetCatalog for FakeCatalog {
    async fn fetch_set(&self, _: &str, set_id: &str) -> Result<PosterSet, ArtworkError> {
        if set_id == self.set.id {
            Ok(self.set.clone())
        } else {
            Err(ArtworkError::Status {
                status: 404,
                resource: format!("/items/movie_sets/{set_id}"),
            })
        }
    }
}

/// Forwards every notification title and message to the test.
struct RecordingNotifier {
    sent: mpsc::UnboundedSender<(String, String)>,
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        message: &str,
        _: Option<&str>,
        title: &str,
    ) -> Result<(), NotifyError> {
        let _ = self.sent.send((title.to_string(), message.to_string()));
        Ok(())
    }
}

type Sent = mpsc::UnboundedReceiver<(String, String)>;

fn recording_notifier() -> (NotificationDispatcher, Sent) {
    let (sent, received) = mpsc::unbounded_channel();
    let dispatcher = NotificationDispatcher::new(Some(Arc::new(RecordingNotifier { sent })));
    (dispatcher, received)
}

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn remote_set() -> PosterSet {
    PosterSet {
        id: "set-9".into(),
        date_updated: ts("2024-06-01T12:00:00Z"),
        files: vec![
            PosterFile {
                asset_id: "poster-1".into(),
                modified_at: ts("2024-06-01T12:00:00Z"),
                quality: QualityTier::Full,
                file_type: PosterFileType::Poster,
                season_number: None,
                episode_number: None,
            },
            PosterFile {
                asset_id: "backdrop-1".into(),
                modified_at: ts("2024-06-01T12:00:00Z"),
                quality: QualityTier::Full,
                file_type: PosterFileType::Backdrop,
                season_number: None,
                episode_number: None,
            },
        ],
    }
}

struct TestApp {
    server: TestServer,
    plex: MockServer,
    fetcher: Arc<CountingFetcher>,
    state: AppState,
    _dir: TempDir,
}

async fn test_app() -> TestApp {
    test_app_with(NotificationDispatcher::default()).await
}

/// A test server backed by in-memory SQLite and a mocked Plex.
async fn test_app_with(notifier: NotificationDispatcher) -> TestApp {
    let plex = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let pool = artsync_db::connect(":memory:").await.unwrap();
    artsync_db::migrate::run(&pool).await.unwrap();

    let config: FileConfig = serde_json::from_value(json!({
        "CacheImages": true,
        "MediaServer": {
            "Type": "plex",
            "URL": plex.uri(),
            "Token": "plex-token",
            "Libraries": [{ "Name": "Movies" }, { "Name": "Anime" }]
        },
        "Mediux": { "Token": "mediux-token" },
        "Server": { "DataDir": dir.path().to_str().unwrap() }
    }))
    .unwrap();
    let config = config.validate().unwrap();

    let fetcher = Arc::new(CountingFetcher::default());
    let preview_cache = ArtworkCache::new(dir.path().join("thumbs"), true, fetcher.clone());
    let full_cache = ArtworkCache::new(dir.path().join("full"), true, fetcher.clone());
    let media_server = artsync_mediaserver::connect(
        &config.server_settings(),
        Arc::new(SqliteItemIndex::new(pool.clone())),
        full_cache,
    )
    .unwrap();

    let state = AppState {
        db: pool,
        config: Arc::new(config),
        sections: Arc::new(vec![LibrarySection {
            id: "1".into(),
            title: "Movies".into(),
            media_type: MediaType::Movie,
        }]),
        media_server,
        preview_cache,
        catalog: Arc::new(FakeCatalog { set: remote_set() }),
        notifier,
        sweep_lock: Arc::new(tokio::sync::Mutex::new(())),
    };

    TestApp {
        server: TestServer::new(build_router(state.clone())).unwrap(),
        plex,
        fetcher,
        state,
        _dir: dir,
    }
}

fn matrix(rating_key: &str) -> Value {
    json!({
        "ratingKey": rating_key, "type": "movie", "title": "The Matrix", "year": 1999,
        "librarySectionTitle": "Movies",
        "Guid": [{ "id": "tmdb://603" }]
    })
}

async fn mount_item(plex: &MockServer, rating_key: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/library/metadata/{rating_key}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "MediaContainer": { "Metadata": [matrix(rating_key)] }
        })))
        .mount(plex)
        .await;
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let app = test_app().await;
    let resp = app.server.get("/health").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["status"], "ok");
}

// ---------------------------------------------------------------------------
// Image endpoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn image_is_fetched_once_then_served_from_cache() {
    let app = test_app().await;

    let first = app
        .server
        .get("/api/v1/mediux/image/A123")
        .add_query_param("modifiedDate", "2024-05-01T10:00:00Z")
        .await;
    first.assert_status_ok();
    assert_eq!(first.header("content-type"), "image/png");
    assert_eq!(first.header("x-cache"), "MISS");
    assert_eq!(first.as_bytes().as_ref(), b"A123-bytes");

    let second = app
        .server
        .get("/api/v1/mediux/image/A123")
        .add_query_param("modifiedDate", "2024-05-01T23:00:00Z")
        .add_query_param("quality", "full")
        .await;
    second.assert_status_ok();
    assert_eq!(second.header("x-cache"), "HIT");
    assert_eq!(second.as_bytes().as_ref(), b"A123-bytes");
    assert_eq!(app.fetcher.calls(), 1);
}

#[tokio::test]
async fn bad_quality_is_a_bad_request() {
    let app = test_app().await;
    let resp = app
        .server
        .get("/api/v1/mediux/image/A123")
        .add_query_param("quality", "huge")
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = resp.json();
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "bad_request");
    assert!(body["elapsed"].as_str().unwrap().ends_with("ms"));
    assert_eq!(app.fetcher.calls(), 0);
}

#[tokio::test]
async fn missing_asset_id_is_a_bad_request() {
    let app = test_app().await;
    let resp = app.server.get("/api/v1/mediux/image").await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = resp.json();
    assert!(body["message"].as_str().unwrap().contains("missing asset id"));
}

#[tokio::test]
async fn upstream_failure_is_a_json_500() {
    let app = test_app().await;
    let resp = app.server.get("/api/v1/mediux/image/broken").await;
    resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.header("content-type"), "application/json");
    let body: Value = resp.json();
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("502"));
    assert!(body["elapsed"].is_string());
}

// ---------------------------------------------------------------------------
// Media server
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sections_report_which_libraries_resolved() {
    let app = test_app().await;
    let body: Value = app.server.get("/api/v1/mediaserver/sections").await.json();
    assert_eq!(body[0]["name"], "Movies");
    assert_eq!(body[0]["found"], true);
    assert_eq!(body[0]["section"]["id"], "1");
    assert_eq!(body[1]["name"], "Anime");
    assert_eq!(body[1]["found"], false);
}

#[tokio::test]
async fn items_endpoint_synchronizes_configured_sections() {
    let app = test_app().await;
    Mock::given(method("GET"))
        .and(path("/library/sections/1/all"))
        .and(query_param("X-Plex-Container-Start", "0"))
        .and(header("X-Plex-Token", "plex-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "MediaContainer": {
                "totalSize": 2,
                "Metadata": [
                    matrix("101"),
                    { "ratingKey": "102", "type": "movie", "title": "Heat" }
                ]
            }
        })))
        .expect(1)
        .mount(&app.plex)
        .await;

    let resp = app.server.get("/api/v1/mediaserver/items").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["total"], 2);
    assert_eq!(body["sections"][0]["status"], "complete");
    assert_eq!(body["items"][0]["title"], "The Matrix");
}

#[tokio::test]
async fn unknown_item_maps_to_not_found() {
    let app = test_app().await;
    let resp = app
        .server
        .get("/api/v1/mediaserver/items/999")
        .add_query_param("sectionTitle", "Movies")
        .await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_image_slot_is_rejected() {
    let app = test_app().await;
    let resp = app.server.get("/api/v1/mediaserver/items/101/images/logo").await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Saved sets and auto download
// ---------------------------------------------------------------------------

#[tokio::test]
async fn saving_a_set_tracks_the_item() {
    let app = test_app().await;
    mount_item(&app.plex, "101").await;

    let resp = app
        .server
        .post("/api/v1/sets")
        .json(&json!({
            "ratingKey": "101",
            "sectionTitle": "Movies",
            "setId": "set-9",
            "setType": "movie",
            "selectedTypes": ["poster", "backdrop"],
            "autoDownload": true,
            "lastUpdate": "2024-01-01T00:00:00Z"
        }))
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["id"], "101:set-9");
    assert_eq!(body["selectedTypes"], json!(["poster", "backdrop"]));

    let row = media_items::get(&app.state.db, "101").await.unwrap().unwrap();
    assert_eq!(row.tmdb_id.as_deref(), Some("603"));
}

#[tokio::test]
async fn saving_a_set_rejects_unknown_set_type() {
    let app = test_app().await;
    let resp = app
        .server
        .post("/api/v1/sets")
        .json(&json!({
            "ratingKey": "101",
            "setId": "set-9",
            "setType": "boxset",
            "selectedTypes": ["poster"]
        }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_body_gets_the_error_envelope() {
    let app = test_app().await;
    let resp = app
        .server
        .post("/api/v1/sets")
        .content_type("application/json")
        .bytes(Bytes::from_static(b"{\"ratingKey\": "))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(resp.header("content-type"), "application/json");
    let body: Value = resp.json();
    assert_eq!(body["status"], "error");
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn missing_query_parameter_gets_the_error_envelope() {
    let app = test_app().await;
    let resp = app.server.get("/api/v1/mediaserver/search").await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = resp.json();
    assert_eq!(body["code"], "bad_request");
}

async fn seed_saved_set(app: &TestApp, rating_key: &str, last_update: &str) {
    media_items::upsert(
        &app.state.db,
        rating_key,
        "Movies",
        MediaType::Movie,
        "The Matrix",
        Some(1999),
        Some("603"),
    )
    .await
    .unwrap();
    saved_sets::upsert(
        &app.state.db,
        rating_key,
        "set-9",
        "movie",
        &[PosterFileType::Poster],
        true,
        last_update,
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn sweep_pushes_stale_sets_once() {
    let app = test_app().await;
    mount_item(&app.plex, "101").await;
    Mock::given(method("POST"))
        .and(path("/library/metadata/101/posters"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.plex)
        .await;
    seed_saved_set(&app, "101", "2024-01-01T00:00:00Z").await;

    let first: Value = app.server.post("/api/v1/autodownload/run").await.json();
    assert_eq!(first["checked"], 1);
    assert_eq!(first["updated"], 1);
    assert_eq!(first["failed"], 0);

    let stored = saved_sets::list_for_item(&app.state.db, "101").await.unwrap();
    assert_eq!(
        DateTime::parse_from_rfc3339(&stored[0].last_update).unwrap(),
        ts("2024-06-01T12:00:00Z")
    );

    // Same remote revision: nothing to do.
    let second: Value = app.server.post("/api/v1/autodownload/run").await.json();
    assert_eq!(second["updated"], 0);
    assert_eq!(second["skipped"], 1);

    // Only the selected poster was fetched at full quality.
    assert_eq!(app.fetcher.calls(), 1);
}

#[tokio::test]
async fn sweep_rekeys_items_the_server_recreated() {
    let app = test_app().await;
    // 101 is gone; a search by TMDB id finds 555.
    Mock::given(method("GET"))
        .and(path("/library/sections/1/all"))
        .and(query_param("type", "1"))
        .and(query_param("title", "The Matrix"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "MediaContainer": { "Metadata": [matrix("555")] }
        })))
        .mount(&app.plex)
        .await;
    mount_item(&app.plex, "555").await;
    Mock::given(method("POST"))
        .and(path("/library/metadata/555/posters"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.plex)
        .await;
    seed_saved_set(&app, "101", "2024-01-01T00:00:00Z").await;

    let report: Value = app.server.post("/api/v1/autodownload/run").await.json();
    assert_eq!(report["updated"], 1);

    assert!(media_items::get(&app.state.db, "101").await.unwrap().is_none());
    assert!(media_items::get(&app.state.db, "555").await.unwrap().is_some());
}

#[tokio::test]
async fn sweep_isolates_failed_sets() {
    let (notifier, mut sent) = recording_notifier();
    let app = test_app_with(notifier).await;
    mount_item(&app.plex, "101").await;
    mount_item(&app.plex, "202").await;
    Mock::given(method("POST"))
        .and(path("/library/metadata/101/posters"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&app.plex)
        .await;
    Mock::given(method("POST"))
        .and(path("/library/metadata/202/posters"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.plex)
        .await;
    seed_saved_set(&app, "101", "2024-01-01T00:00:00Z").await;
    seed_saved_set(&app, "202", "2024-01-01T00:00:00Z").await;

    let report: Value = app.server.post("/api/v1/autodownload/run").await.json();
    assert_eq!(report["checked"], 2);
    assert_eq!(report["updated"], 1);
    assert_eq!(report["failed"], 1);
    assert_eq!(report["failures"][0]["ratingKey"], "101");

    // A failed push leaves the set stale for the next run.
    let stored = saved_sets::list_for_item(&app.state.db, "101").await.unwrap();
    assert_eq!(stored[0].last_update, "2024-01-01T00:00:00Z");
    let stored = saved_sets::list_for_item(&app.state.db, "202").await.unwrap();
    assert_ne!(stored[0].last_update, "2024-01-01T00:00:00Z");

    let (title, message) = tokio::time::timeout(Duration::from_secs(1), sent.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(title, "Auto download");
    assert!(message.contains("1 updated"));
    assert!(message.contains("1 failed"));
}

#[tokio::test]
async fn sweep_without_changes_sends_no_notification() {
    let (notifier, mut sent) = recording_notifier();
    let app = test_app_with(notifier).await;
    seed_saved_set(&app, "101", "2024-06-01T12:00:00Z").await;

    let report: Value = app.server.post("/api/v1/autodownload/run").await.json();
    assert_eq!(report["skipped"], 1);
    assert_eq!(report["updated"], 0);

    let quiet = tokio::time::timeout(Duration::from_millis(200), sent.recv()).await;
    assert!(quiet.is_err());
}
