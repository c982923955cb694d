//! Error types shared by the token manager, the photo client and the slideshow.

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SlideshowError>;

#[derive(Debug, Error)]
pub enum SlideshowError {
    /// Credentials are missing or unusable. Not retryable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The token endpoint rejected or failed the refresh.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The photo service answered with a non-success status.
    #[error("remote service returned {status}: {body}")]
    RemoteService { status: StatusCode, body: String },

    /// Fetching image bytes failed. Only ever logged by the camera.
    #[error("image fetch failed: {0}")]
    TransientFetch(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl SlideshowError {
    /// Whether the next scheduled cycle may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SlideshowError::Configuration(_))
    }

    /// Token refresh or exchange failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, SlideshowError::Authentication(_))
    }
}
