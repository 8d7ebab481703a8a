//! On-disk artwork cache keyed by asset id and revision day.
//!
//! Files live at `{root}/{assetId}_{YYYYMMDD}.{ext}`. The key ignores the
//! requested quality tier, so the first tier fetched on a given day owns the
//! slot. Concurrent misses for one key share a single provider fetch, and
//! files are written to a temporary sibling and renamed into place so readers
//! never see a partial image.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use artsync_core::types::QualityTier;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, WeakShared};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, trace, warn};

use crate::{ArtworkError, AssetFetcher};

const EXTENSIONS: &[&str] = &["jpg", "png", "webp"];

type FetchFuture = BoxFuture<'static, Result<CachedImage, ArtworkError>>;

/// Where a served image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    Cache,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    pub bytes: Bytes,
    pub content_type: String,
    pub source: ImageSource,
}

/// `{assetId}_{YYYYMMDD}`. Same-day revisions collapse into one slot.
pub fn cache_key(asset_id: &str, modified_at: DateTime<Utc>) -> String {
    format!("{}_{}", asset_id, modified_at.format("%Y%m%d"))
}

fn extension_for(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match mime.as_str() {
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

fn validate_asset_id(asset_id: &str) -> Result<(), ArtworkError> {
    if asset_id.trim().is_empty() {
        return Err(ArtworkError::InvalidInput("missing asset id".into()));
    }
    if asset_id.contains(['/', '\\']) || asset_id.contains("..") {
        return Err(ArtworkError::InvalidInput(format!(
            "asset id '{asset_id}' contains path characters"
        )));
    }
    Ok(())
}

struct CacheInner {
    root: PathBuf,
    persist: bool,
    fetcher: Arc<dyn AssetFetcher>,
    in_flight: Mutex<HashMap<String, WeakShared<FetchFuture>>>,
}

/// Maps `(assetId, modifiedAt)` to bytes on disk, fetching on miss.
#[derive(Clone)]
pub struct ArtworkCache {
    inner: Arc<CacheInner>,
}

impl ArtworkCache {
    /// `persist = false` still serves existing files but never writes new ones.
    pub fn new(root: impl Into<PathBuf>, persist: bool, fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                root: root.into(),
                persist,
                fetcher,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Serve the cached file for this asset version, or fetch it once.
    ///
    /// Dropping the returned future while the provider call is still pending
    /// cancels that call unless another caller is waiting on the same key.
    /// A cache write that has already started always runs to completion.
    pub async fn get_or_fetch(
        &self,
        asset_id: &str,
        modified_at: DateTime<Utc>,
        quality: QualityTier,
    ) -> Result<CachedImage, ArtworkError> {
        validate_asset_id(asset_id)?;
        let key = cache_key(asset_id, modified_at);

        if let Some(hit) = self.inner.read_cached(&key).await {
            trace!(key = %key, "artwork cache hit");
            return Ok(hit);
        }

        let shared = {
            let mut in_flight = self.inner.in_flight.lock().await;
            match in_flight.get(&key).and_then(WeakShared::upgrade) {
                Some(existing) => {
                    debug!(key = %key, "joining in-flight artwork fetch");
                    existing
                }
                None => {
                    let fut: Shared<FetchFuture> = run_fetch(
                        self.inner.clone(),
                        key.clone(),
                        asset_id.to_string(),
                        modified_at,
                        quality,
                    )
                    .boxed()
                    .shared();
                    if let Some(weak) = fut.downgrade() {
                        in_flight.insert(key.clone(), weak);
                    }
                    fut
                }
            }
        };

        shared.await
    }
}

async fn run_fetch(
    inner: Arc<CacheInner>,
    key: String,
    asset_id: String,
    modified_at: DateTime<Utc>,
    quality: QualityTier,
) -> Result<CachedImage, ArtworkError> {
    let result = async {
        // A previous leader may have finished between the caller's disk check
        // and taking the in-flight lock.
        if let Some(hit) = inner.read_cached(&key).await {
            return Ok(hit);
        }

        debug!(key = %key, quality = quality.as_str(), "artwork cache miss, fetching");
        let image = inner.fetcher.fetch_asset(&asset_id, modified_at, quality).await?;

        if inner.persist {
            inner.persist_detached(&key, image.bytes.clone(), &image.content_type).await;
        }

        Ok(CachedImage {
            bytes: image.bytes,
            content_type: image.content_type,
            source: ImageSource::Remote,
        })
    }
    .await;

    inner.in_flight.lock().await.remove(&key);
    result
}

impl CacheInner {
    async fn read_cached(&self, key: &str) -> Option<CachedImage> {
        for ext in EXTENSIONS {
            let path = self.root.join(format!("{key}.{ext}"));
            match tokio::fs::read(&path).await {
                Ok(bytes) if !bytes.is_empty() => {
                    return Some(CachedImage {
                        bytes: Bytes::from(bytes),
                        content_type: content_type_for(ext).to_string(),
                        source: ImageSource::Cache,
                    });
                }
                Ok(_) => warn!(path = %path.display(), "ignoring empty cache file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to read cache file"),
            }
        }
        None
    }

    /// Write on a detached task so a cancelled request cannot abandon a
    /// half-written file. Failures are logged, never returned.
    async fn persist_detached(&self, key: &str, bytes: Bytes, content_type: &str) {
        let root = self.root.clone();
        let file_name = format!("{key}.{}", extension_for(content_type));
        let task = tokio::spawn(async move { write_atomic(&root, &file_name, &bytes).await });

        match task.await {
            Ok(Ok(path)) => debug!(path = %path.display(), "artwork cached"),
            Ok(Err(err)) => error!(
                key = %key,
                kind = %err.kind(),
                error = %err,
                "failed to persist artwork, serving uncached"
            ),
            Err(err) => error!(key = %key, error = %err, "artwork cache writer panicked"),
        }
    }
}

/// Write `bytes` to `root/file_name` via a temp file and rename.
async fn write_atomic(
    root: &Path,
    file_name: &str,
    bytes: &[u8],
) -> Result<PathBuf, ArtworkError> {
    let persist_err = |what: &str, path: &Path, e: std::io::Error| {
        ArtworkError::Persist(format!("{what} {}: {e}", path.display()))
    };

    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| persist_err("create dir", root, e))?;

    let path = root.join(file_name);
    let tmp = root.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4().simple()));

    let written = async {
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| persist_err("create", &tmp, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| persist_err("write", &tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| persist_err("sync", &tmp, e))?;
        drop(file);
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| persist_err("rename", &tmp, e))
    }
    .await;

    if written.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    written.map(|_| path)
}
