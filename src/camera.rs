//! Camera entity backed by the slideshow.
//!
//! The host only sees the [`Camera`] capability: image bytes on demand,
//! a set of state attributes and a subscription to state changes.

use crate::error::SlideshowError;
use crate::slideshow::SlideshowState;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;

pub const CAMERA_NAME: &str = "Google Photos";

/// Attributes published alongside the camera state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraAttributes {
    pub album_name: Option<String>,
    pub photo_count: usize,
    /// 1-based position of the photo on display.
    pub current_photo: usize,
    pub photo_url: Option<String>,
}

impl From<&SlideshowState> for CameraAttributes {
    fn from(state: &SlideshowState) -> Self {
        Self {
            album_name: state.album_name.clone(),
            photo_count: state.photo_count(),
            current_photo: state.position(),
            photo_url: state.current_photo_url(),
        }
    }
}

#[async_trait]
pub trait Camera: Send + Sync {
    /// Display name of the entity.
    fn name(&self) -> &str;

    /// Stable id, unique per configured entry.
    fn unique_id(&self) -> &str;

    /// Bytes of the current image, or `None` when there is nothing to show
    /// or it could not be fetched.
    async fn camera_image(&self) -> Option<Vec<u8>>;

    fn attributes(&self) -> CameraAttributes;

    /// Notified on every published slideshow change.
    fn subscribe(&self) -> watch::Receiver<SlideshowState>;
}

/// Camera backed by a slideshow's state channel.
pub struct SlideshowCamera {
    unique_id: String,
    state: watch::Receiver<SlideshowState>,
    http: reqwest::Client,
    timeout: Duration,
}

impl SlideshowCamera {
    /// `timeout` bounds each image download.
    pub fn new(
        entry_id: &str,
        state: watch::Receiver<SlideshowState>,
        http: reqwest::Client,
        timeout: Duration,
    ) -> Self {
        Self {
            unique_id: format!("{entry_id}_camera"),
            state,
            http,
            timeout,
        }
    }

    /// Fresh download of the photo currently on display. Failures are
    /// logged and reported as `None`.
    pub async fn fetch_current_image_bytes(&self) -> Option<Vec<u8>> {
        let url = self.state.borrow().current_photo_url()?;

        match self.download(&url).await {
            Ok(bytes) => {
                tracing::debug!("Fetched {} bytes for current photo", bytes.len());
                Some(bytes)
            }
            Err(e) => {
                tracing::warn!("Error fetching photo: {}", e);
                None
            }
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, SlideshowError> {
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SlideshowError::TransientFetch(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(SlideshowError::TransientFetch(format!(
                "image host returned {status}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SlideshowError::TransientFetch(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Camera for SlideshowCamera {
    fn name(&self) -> &str {
        CAMERA_NAME
    }

    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    async fn camera_image(&self) -> Option<Vec<u8>> {
        self.fetch_current_image_bytes().await
    }

    fn attributes(&self) -> CameraAttributes {
        CameraAttributes::from(&*self.state.borrow())
    }

    fn subscribe(&self) -> watch::Receiver<SlideshowState> {
        self.state.clone()
    }
}
