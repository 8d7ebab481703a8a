//! YAML configuration: loading, validation and masking for logs.
//!
//! The file is `config.yml` (or `config.yaml`) in `$CONFIG_PATH`. Environment
//! variables prefixed `ARTSYNC_` override file keys, `__` separating levels,
//! e.g. `ARTSYNC_MediaServer__Token`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use artsync_artwork::mediux::DEFAULT_BASE_URL;
use artsync_core::error::ErrorKind;
use artsync_core::types::{DownloadQuality, MediaServerKind, MediaType};
use artsync_mediaserver::emby_jellyfin::fetch_admin_user_id;
use artsync_mediaserver::{MediaServerError, ServerSettings};
use cron::Schedule;
use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::Deserialize;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_DIR: &str = "/config";
pub const DEFAULT_CRON: &str = "0 0 * * *";
const DEFAULT_BIND: &str = "0.0.0.0:8888";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config.yml or config.yaml not found in {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}

// ---------------------------------------------------------------------------
// File shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FileConfig {
    pub cache_images: bool,
    pub logging: LoggingSection,
    pub media_server: MediaServerSection,
    pub mediux: MediuxSection,
    pub auto_download: AutoDownloadSection,
    pub notification: NotificationSection,
    pub server: ServerSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MediaServerSection {
    #[serde(rename = "Type")]
    pub server_type: String,
    #[serde(rename = "URL")]
    pub url: String,
    pub token: String,
    pub libraries: Vec<LibraryEntry>,
    #[serde(rename = "UserID")]
    pub user_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LibraryEntry {
    pub name: String,
    #[serde(rename = "SectionID")]
    pub section_id: String,
    #[serde(rename = "Type")]
    pub library_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MediuxSection {
    pub token: String,
    pub download_quality: String,
    #[serde(rename = "BaseURL")]
    pub base_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AutoDownloadSection {
    pub enabled: bool,
    pub cron: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NotificationSection {
    pub provider: String,
    pub webhook: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServerSection {
    pub bind: String,
    pub data_dir: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            data_dir: PathBuf::new(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

// ---------------------------------------------------------------------------
// Validated configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "TRACE" => Some(Self::Trace),
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARNING" => Some(Self::Warning),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    /// `EnvFilter` directive for this level.
    pub fn directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryConfig {
    pub name: String,
    pub section_id: Option<String>,
    pub media_type: Option<MediaType>,
}

#[derive(Debug, Clone)]
pub struct MediaServerConfig {
    pub kind: MediaServerKind,
    pub url: String,
    pub token: String,
    pub libraries: Vec<LibraryConfig>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MediuxConfig {
    pub token: String,
    pub download_quality: DownloadQuality,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct AutoDownloadConfig {
    pub enabled: bool,
    pub cron: String,
    pub schedule: Schedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationProvider {
    Discord,
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub provider: NotificationProvider,
    pub webhook: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
}

/// Validated, immutable application settings.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cache_images: bool,
    pub log_level: LogLevel,
    pub media_server: MediaServerConfig,
    pub mediux: MediuxConfig,
    pub auto_download: AutoDownloadConfig,
    pub notification: Option<NotificationConfig>,
    pub server: ServerConfig,
    /// Defaults applied during validation, logged once tracing is up.
    pub warnings: Vec<String>,
}

/// Parse a cron expression. Five-field crontab lines get a leading seconds
/// field since the scheduler expects six or seven.
pub fn parse_cron(expr: &str) -> Result<Schedule, String> {
    let expr = expr.trim();
    let full = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&full).map_err(|e| e.to_string())
}

impl FileConfig {
    /// Check every setting and apply defaults. All problems are reported
    /// together.
    pub fn validate(self) -> Result<AppConfig, ConfigError> {
        let mut errors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        let log_level = match self.logging.level.trim() {
            "" => {
                warnings.push("Logging.Level is not set, using INFO".into());
                LogLevel::Info
            }
            raw => LogLevel::parse(raw).unwrap_or_else(|| {
                warnings.push(format!(
                    "Logging.Level: '{raw}'. Must be one of: TRACE, DEBUG, INFO, WARNING, ERROR. Using INFO"
                ));
                LogLevel::Info
            }),
        };

        // Media server
        let ms = self.media_server;
        let kind = match ms.server_type.trim() {
            "" => {
                errors.push("MediaServer.Type is not set".into());
                None
            }
            raw => {
                let kind = MediaServerKind::parse(raw);
                if kind.is_none() {
                    errors.push(format!(
                        "MediaServer.Type: '{raw}'. Must be one of: Plex, Emby, Jellyfin"
                    ));
                }
                kind
            }
        };

        let url = ms.url.trim();
        if url.is_empty() {
            errors.push("MediaServer.URL is not set".into());
        } else if !url.starts_with("http") {
            errors.push(format!(
                "MediaServer.URL: '{url}' must start with http:// or https://"
            ));
        }
        let url = url.trim_end_matches('/').to_string();

        let token = ms.token.trim().to_string();
        if token.is_empty() {
            errors.push("MediaServer.Token is not set".into());
        }

        if ms.libraries.is_empty() {
            errors.push("MediaServer.Libraries are not set".into());
        }
        let mut libraries = Vec::with_capacity(ms.libraries.len());
        for (i, lib) in ms.libraries.into_iter().enumerate() {
            let name = lib.name.trim().to_string();
            if name.is_empty() {
                errors.push(format!("MediaServer.Libraries[{i}].Name is not set"));
                continue;
            }
            let media_type = match lib.library_type.trim() {
                "" => None,
                raw => {
                    let parsed = MediaType::from_config(raw);
                    if parsed.is_none() {
                        errors.push(format!(
                            "MediaServer.Libraries[{i}].Type: '{raw}'. Must be one of: movie, show"
                        ));
                    }
                    parsed
                }
            };
            let section_id = Some(lib.section_id.trim().to_string()).filter(|s| !s.is_empty());
            libraries.push(LibraryConfig {
                name,
                section_id,
                media_type,
            });
        }
        let user_id = Some(ms.user_id.trim().to_string()).filter(|s| !s.is_empty());

        // Mediux
        let mediux_token = self.mediux.token.trim().to_string();
        if mediux_token.is_empty() {
            errors.push("Mediux.Token is not set".into());
        }
        let download_quality = match self.mediux.download_quality.trim() {
            "" => {
                warnings.push("Mediux.DownloadQuality is not set, using optimized".into());
                Some(DownloadQuality::Optimized)
            }
            raw => {
                let q = DownloadQuality::parse(raw);
                if q.is_none() {
                    errors.push(format!(
                        "Mediux.DownloadQuality: '{raw}'. Must be one of: original, optimized"
                    ));
                }
                q
            }
        };
        let mediux_base = match self.mediux.base_url.trim() {
            "" => DEFAULT_BASE_URL.to_string(),
            raw if raw.starts_with("http") => raw.trim_end_matches('/').to_string(),
            raw => {
                errors.push(format!("Mediux.BaseURL: '{raw}' must start with http:// or https://"));
                DEFAULT_BASE_URL.to_string()
            }
        };

        // Auto download
        let cron = match self.auto_download.cron.trim() {
            "" => {
                warnings.push(format!("AutoDownload.Cron is not set, using '{DEFAULT_CRON}'"));
                DEFAULT_CRON.to_string()
            }
            raw => raw.to_string(),
        };
        let schedule = match parse_cron(&cron) {
            Ok(s) => Some(s),
            Err(e) => {
                errors.push(format!("AutoDownload.Cron: '{cron}' is invalid: {e}"));
                None
            }
        };
        if !self.auto_download.enabled {
            warnings.push("AutoDownload is disabled".into());
        }

        // Notification
        let notification = match self.notification.provider.trim().to_ascii_lowercase().as_str() {
            "" => None,
            "discord" => {
                let webhook = self.notification.webhook.trim().to_string();
                if webhook.is_empty() {
                    errors.push("Notification.Webhook is not set for provider Discord".into());
                } else if !webhook.starts_with("http") {
                    errors.push("Notification.Webhook must start with http:// or https://".into());
                }
                Some(NotificationConfig {
                    provider: NotificationProvider::Discord,
                    webhook,
                })
            }
            _ => {
                errors.push(format!(
                    "Notification.Provider: '{}'. Only Discord is supported",
                    self.notification.provider.trim()
                ));
                None
            }
        };

        // HTTP server
        let bind = match self.server.bind.trim() {
            "" => DEFAULT_BIND.to_string(),
            raw => raw.to_string(),
        };
        let data_dir = if self.server.data_dir.as_os_str().is_empty() {
            PathBuf::from(DEFAULT_CONFIG_DIR)
        } else {
            self.server.data_dir
        };
        if self.server.request_timeout_secs == 0 {
            errors.push("Server.RequestTimeoutSecs must be greater than 0".into());
        }

        match (kind, download_quality, schedule) {
            (Some(kind), Some(download_quality), Some(schedule)) if errors.is_empty() => {
                Ok(AppConfig {
                    cache_images: self.cache_images,
                    log_level,
                    media_server: MediaServerConfig {
                        kind,
                        url,
                        token,
                        libraries,
                        user_id,
                    },
                    mediux: MediuxConfig {
                        token: mediux_token,
                        download_quality,
                        base_url: mediux_base,
                    },
                    auto_download: AutoDownloadConfig {
                        enabled: self.auto_download.enabled,
                        cron,
                        schedule,
                    },
                    notification,
                    server: ServerConfig {
                        bind,
                        data_dir,
                        request_timeout: Duration::from_secs(self.server.request_timeout_secs),
                    },
                    warnings,
                })
            }
            _ => Err(ConfigError::Invalid(errors)),
        }
    }
}

/// Locate, read and validate the configuration in `config_dir`.
pub fn load(config_dir: &Path) -> Result<AppConfig, ConfigError> {
    let path = ["config.yml", "config.yaml"]
        .iter()
        .map(|name| config_dir.join(name))
        .find(|p| p.is_file())
        .ok_or_else(|| ConfigError::NotFound(config_dir.to_path_buf()))?;

    let mut raw: FileConfig = Figment::new()
        .merge(Yaml::file(&path))
        .merge(Env::prefixed("ARTSYNC_").split("__").lowercase(false))
        .extract()
        .map_err(Box::new)?;

    if raw.server.data_dir.as_os_str().is_empty() {
        raw.server.data_dir = config_dir.to_path_buf();
    }
    raw.validate()
}

/// `***` followed by the last four characters.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "***".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("***{tail}")
}

/// Scheme and host only.
pub fn mask_webhook(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(u) => format!("{}://{}/***", u.scheme(), u.host_str().unwrap_or_default()),
        Err(_) => "***".to_string(),
    }
}

impl AppConfig {
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            kind: self.media_server.kind,
            base_url: self.media_server.url.clone(),
            token: self.media_server.token.clone(),
            user_id: self.media_server.user_id.clone(),
            timeout: self.server.request_timeout,
        }
    }

    pub fn log_summary(&self) {
        let libraries: Vec<&str> = self
            .media_server
            .libraries
            .iter()
            .map(|l| l.name.as_str())
            .collect();
        info!(
            server_type = %self.media_server.kind,
            url = %self.media_server.url,
            token = %mask_secret(&self.media_server.token),
            user_id = self.media_server.user_id.as_deref().unwrap_or("-"),
            libraries = ?libraries,
            "media server"
        );
        info!(
            token = %mask_secret(&self.mediux.token),
            download_quality = self.mediux.download_quality.as_str(),
            cache_images = self.cache_images,
            "mediux"
        );
        info!(
            enabled = self.auto_download.enabled,
            cron = %self.auto_download.cron,
            "auto download"
        );
        if let Some(n) = &self.notification {
            info!(provider = ?n.provider, webhook = %mask_webhook(&n.webhook), "notifications");
        }
    }
}

/// One-time discovery of the Emby/Jellyfin user the library is read as.
/// Returns the configuration with `UserID` filled in; Plex and explicitly
/// configured ids pass through untouched.
pub async fn bootstrap_user_id(mut config: AppConfig) -> Result<AppConfig, MediaServerError> {
    if config.media_server.kind == MediaServerKind::Plex || config.media_server.user_id.is_some() {
        return Ok(config);
    }
    let user_id = fetch_admin_user_id(&config.server_settings()).await?;
    debug!(user_id = %mask_secret(&user_id), "found administrator user id");
    config.media_server.user_id = Some(user_id);
    Ok(config)
}
