//! Wiring for one configured entry: token manager, photo client,
//! coordinator and camera, built once and handed to each other explicitly.

use crate::api::PhotosClient;
use crate::auth::TokenManager;
use crate::camera::SlideshowCamera;
use crate::config::Settings;
use crate::error::{Result, SlideshowError};
use crate::slideshow::{SlideshowCoordinator, SlideshowHandle};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One configured slideshow and everything it owns.
pub struct SlideshowEntry {
    pub tokens: Arc<TokenManager>,
    pub client: PhotosClient,
    pub coordinator: Arc<SlideshowCoordinator>,
    pub camera: SlideshowCamera,
}

impl SlideshowEntry {
    /// Build every component from settings without touching the network.
    pub fn build(settings: &Settings, http: reqwest::Client) -> Result<Self> {
        let oauth = settings.oauth_client()?;
        let tokens = Arc::new(
            TokenManager::new(
                http.clone(),
                oauth,
                settings.token.as_ref(),
                settings.endpoints.token_uri.clone(),
                settings.endpoints.auth_uri.clone(),
            )
            .with_request_timeout(settings.request_timeout()),
        );
        let client = PhotosClient::new(
            http.clone(),
            settings.endpoints.api_base.clone(),
            Arc::clone(&tokens),
        )
        .with_request_timeout(settings.request_timeout());
        let coordinator = Arc::new(SlideshowCoordinator::new(
            client.clone(),
            settings.album_id().map(str::to_string),
            settings.update_interval(),
            settings.slideshow_interval(),
        ));
        let camera = SlideshowCamera::new(
            &settings.entry_id,
            coordinator.subscribe(),
            http,
            settings.image_timeout(),
        );

        Ok(Self {
            tokens,
            client,
            coordinator,
            camera,
        })
    }

    /// Build, verify the credential and load the first media set.
    ///
    /// A configuration error aborts setup. Any other failure of the first
    /// refresh is logged; the periodic refresh retries it.
    pub async fn setup(settings: &Settings, http: reqwest::Client) -> Result<Self> {
        let entry = Self::build(settings, http)?;

        if let Err(e) = entry.tokens.verify_access().await {
            if matches!(e, SlideshowError::Configuration(_)) {
                return Err(e);
            }
            tracing::error!("Unable to connect to the photo library: {}", e);
        }

        match entry.coordinator.first_refresh().await {
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => tracing::warn!("Initial refresh failed, will retry on schedule: {}", e),
            Ok(()) => {}
        }

        Ok(entry)
    }

    /// Spawn the refresh and advance tasks.
    pub fn start(&self, cancel: CancellationToken) -> SlideshowHandle {
        self.coordinator.spawn(cancel)
    }
}
