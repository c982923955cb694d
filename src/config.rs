//! Settings for one configured slideshow entry.
//!
//! Layered with the `config` crate: an optional TOML file first, then
//! `PHOTOS_SLIDESHOW_*` environment variables (nested keys use `__`,
//! e.g. `PHOTOS_SLIDESHOW_TOKEN__REFRESH_TOKEN`).

use crate::auth::{OAuthClient, TokenBundle, OAUTH_AUTH_URI, OAUTH_TOKEN_URI};
use crate::error::{Result, SlideshowError};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const PHOTOS_API_BASE: &str = "https://photoslibrary.googleapis.com/v1";

pub const DEFAULT_UPDATE_INTERVAL: u64 = 3600;
pub const MIN_UPDATE_INTERVAL: u64 = 60;
pub const MAX_UPDATE_INTERVAL: u64 = 86_400;

pub const DEFAULT_SLIDESHOW_INTERVAL: u64 = 10;
pub const MIN_SLIDESHOW_INTERVAL: u64 = 1;
pub const MAX_SLIDESHOW_INTERVAL: u64 = 300;

pub const DEFAULT_IMAGE_TIMEOUT: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT: u64 = 30;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("photos-slideshow/", env!("CARGO_PKG_VERSION"));

const ENV_PREFIX: &str = "PHOTOS_SLIDESHOW";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Identity of this entry; the camera's unique id is derived from it.
    #[serde(default = "default_entry_id")]
    pub entry_id: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub token: Option<TokenBundle>,
    #[serde(default)]
    pub album_id: Option<String>,
    /// Seconds between media set refreshes.
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
    /// Seconds between slideshow advances.
    #[serde(default = "default_slideshow_interval")]
    pub slideshow_interval: u64,
    /// Seconds allowed for a single image download.
    #[serde(default = "default_image_timeout")]
    pub image_timeout: u64,
    /// Seconds allowed for a single token or API call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default)]
    pub endpoints: Endpoints,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Endpoints {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token_uri: default_token_uri(),
            auth_uri: default_auth_uri(),
        }
    }
}

fn default_entry_id() -> String {
    "google_photos".to_string()
}

fn default_update_interval() -> u64 {
    DEFAULT_UPDATE_INTERVAL
}

fn default_slideshow_interval() -> u64 {
    DEFAULT_SLIDESHOW_INTERVAL
}

fn default_image_timeout() -> u64 {
    DEFAULT_IMAGE_TIMEOUT
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_api_base() -> String {
    PHOTOS_API_BASE.to_string()
}

fn default_token_uri() -> String {
    OAUTH_TOKEN_URI.to_string()
}

fn default_auth_uri() -> String {
    OAUTH_AUTH_URI.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            entry_id: default_entry_id(),
            client_id: None,
            client_secret: None,
            token: None,
            album_id: None,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            slideshow_interval: DEFAULT_SLIDESHOW_INTERVAL,
            image_timeout: DEFAULT_IMAGE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            endpoints: Endpoints::default(),
        }
    }
}

impl Settings {
    /// Load settings from an optional TOML file overlaid with the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let settings: Settings = builder
            .build()
            .and_then(|config| config.try_deserialize::<Settings>())
            .map_err(|e| SlideshowError::Configuration(e.to_string()))?;

        tracing::debug!(
            "Loaded settings for entry {} (album: {:?})",
            settings.entry_id,
            settings.album_id()
        );
        Ok(settings)
    }

    /// Client id and secret, both required before any OAuth call.
    pub fn oauth_client(&self) -> Result<OAuthClient> {
        let client_id = non_empty(self.client_id.as_deref())
            .ok_or_else(|| SlideshowError::Configuration("client_id is required".into()))?;
        let client_secret = non_empty(self.client_secret.as_deref())
            .ok_or_else(|| SlideshowError::Configuration("client_secret is required".into()))?;
        Ok(OAuthClient::new(client_id, client_secret))
    }

    /// The album filter; an empty string means "all photos".
    pub fn album_id(&self) -> Option<&str> {
        non_empty(self.album_id.as_deref())
    }

    /// Refresh period, clamped to 60s..=1 day.
    pub fn update_interval(&self) -> Duration {
        clamp_secs(
            "update_interval",
            self.update_interval,
            MIN_UPDATE_INTERVAL,
            MAX_UPDATE_INTERVAL,
        )
    }

    /// Advance period, clamped to 1s..=5 min.
    pub fn slideshow_interval(&self) -> Duration {
        clamp_secs(
            "slideshow_interval",
            self.slideshow_interval,
            MIN_SLIDESHOW_INTERVAL,
            MAX_SLIDESHOW_INTERVAL,
        )
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout.max(1))
    }

    /// Upper bound on one token endpoint or API round trip.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    /// Shared HTTP client with connect and overall timeouts applied.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(self.request_timeout().max(self.image_timeout()))
            .build()
            .map_err(|e| SlideshowError::Configuration(format!("failed to build HTTP client: {e}")))
    }
}

#[derive(Serialize)]
struct TokenSection<'a> {
    token: &'a TokenBundle,
}

/// Render `bundle` as the `[token]` table of a settings file.
pub fn token_section(bundle: &TokenBundle) -> Result<String> {
    toml::to_string(&TokenSection { token: bundle })
        .map_err(|e| SlideshowError::Configuration(format!("failed to serialize token: {e}")))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn clamp_secs(name: &str, value: u64, min: u64, max: u64) -> Duration {
    let clamped = value.clamp(min, max);
    if clamped != value {
        tracing::warn!(
            "{} of {}s is outside {}..={}s, using {}s",
            name,
            value,
            min,
            max,
            clamped
        );
    }
    Duration::from_secs(clamped)
}
