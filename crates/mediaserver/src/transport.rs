//! Shared HTTP plumbing: base URL, auth header, timeout, status mapping.

use artsync_core::types::MediaServerKind;
use bytes::Bytes;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, trace};

use crate::MediaServerError;
use crate::server::ServerSettings;

const USER_AGENT: &str = concat!("artsync/", env!("CARGO_PKG_VERSION"));

pub(crate) struct Transport {
    base_url: String,
    kind: MediaServerKind,
    token: String,
    client: reqwest::Client,
}

impl Transport {
    pub(crate) fn new(settings: &ServerSettings) -> Result<Self, MediaServerError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| MediaServerError::Configuration(format!("build HTTP client: {e}")))?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            kind: settings.kind,
            token: settings.token.clone(),
            client,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        self.client
            .request(method, url)
            .header(self.kind.auth_header(), &self.token)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn send(&self, req: RequestBuilder, path: &str) -> Result<Response, MediaServerError> {
        debug!(server = %self.kind, path = %path, "media server request");
        let resp = req.send().await.map_err(MediaServerError::from_reqwest)?;
        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::NOT_FOUND => Err(MediaServerError::NotFound(path.to_string())),
            s => Err(MediaServerError::Status {
                status: s.as_u16(),
                resource: path.to_string(),
            }),
        }
    }

    pub(crate) async fn get_json(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<serde_json::Value, MediaServerError> {
        let resp = self
            .send(self.request(Method::GET, path).query(params), path)
            .await?;
        resp.json()
            .await
            .map_err(|e| MediaServerError::Parse(format!("{path}: {e}")))
    }

    pub(crate) async fn get_bytes(&self, path: &str) -> Result<Bytes, MediaServerError> {
        let resp = self.send(self.request(Method::GET, path), path).await?;
        let bytes = resp.bytes().await.map_err(MediaServerError::from_reqwest)?;
        trace!(path = %path, len = bytes.len(), "media server image read");
        Ok(bytes)
    }

    pub(crate) async fn post_body(
        &self,
        path: &str,
        content_type: &str,
        body: impl Into<reqwest::Body>,
    ) -> Result<(), MediaServerError> {
        let req = self
            .request(Method::POST, path)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        self.send(req, path).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(uri: &str, kind: MediaServerKind, timeout: Duration) -> Transport {
        Transport::new(&ServerSettings {
            kind,
            base_url: format!("{uri}/"),
            token: "tok".into(),
            user_id: None,
            timeout,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn sends_backend_specific_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/identity"))
            .and(header("X-Plex-Token", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/System/Info"))
            .and(header("X-Emby-Token", "tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let plex = transport(&server.uri(), MediaServerKind::Plex, Duration::from_secs(5));
        assert_eq!(plex.get_json("/identity", &[]).await.unwrap()["ok"], true);
        let jelly = transport(&server.uri(), MediaServerKind::Jellyfin, Duration::from_secs(5));
        assert_eq!(jelly.get_json("System/Info", &[]).await.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn maps_statuses_and_timeouts() {
        let server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(path("/denied"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;
        Mock::given(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let t = transport(&server.uri(), MediaServerKind::Emby, Duration::from_millis(100));
        assert!(matches!(t.get_json("/missing", &[]).await, Err(MediaServerError::NotFound(_))));
        assert!(matches!(
            t.get_json("/denied", &[]).await,
            Err(MediaServerError::Status { status: 401, .. })
        ));
        assert!(matches!(t.get_bytes("/slow").await, Err(MediaServerError::Timeout(_))));
        assert!(matches!(t.get_json("/garbage", &[]).await, Err(MediaServerError::Parse(_))));
    }
}
