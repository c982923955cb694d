//! Photo library REST client.
//!
//! Thin wrapper over the list/search/get operations. Every request is
//! authorized through the shared [`TokenManager`]; paginated listings are
//! followed to completion before returning.

use crate::auth::{TokenManager, DEFAULT_REQUEST_TIMEOUT};
use crate::error::{Result, SlideshowError};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const SEARCH_PAGE_SIZE: u32 = 50;

/// A single photo (or video) resource in the library.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub id: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Photo,
    Video,
    Unknown,
}

impl MediaItem {
    /// Classify the item by its MIME type.
    pub fn media_type(&self) -> MediaType {
        match self.mime_type.as_deref() {
            Some(mime) if mime.starts_with("image/") => MediaType::Photo,
            Some(mime) if mime.starts_with("video/") => MediaType::Video,
            _ => MediaType::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: String,
    #[serde(default = "unknown_album")]
    pub title: String,
    #[serde(default)]
    pub media_items_count: Option<String>,
}

fn unknown_album() -> String {
    "Unknown Album".to_string()
}

/// One entry of a batch lookup: either the item or a per-id status.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItemResult {
    #[serde(default)]
    pub media_item: Option<MediaItem>,
    #[serde(default)]
    pub status: Option<ItemStatus>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ItemStatus {
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Provider-side handle for an in-progress user selection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickerSession {
    pub id: String,
    #[serde(default)]
    pub picker_uri: Option<String>,
    #[serde(default)]
    pub media_items_set: bool,
    #[serde(default)]
    pub expire_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlbumsPage {
    #[serde(default)]
    albums: Vec<Album>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaItemsPage {
    #[serde(default)]
    media_items: Vec<MediaItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    media_item_results: Vec<MediaItemResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    album_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<SearchFilters>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchFilters {
    media_type_filter: MediaTypeFilter,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaTypeFilter {
    media_types: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetRequest<'a> {
    media_item_ids: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePickerRequest<'a> {
    feature_config: FeatureConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FeatureConfig<'a> {
    photo_picker: PhotoPicker<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PhotoPicker<'a> {
    enabled_features: [&'static str; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    album_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PollPickerRequest<'a> {
    session_id: &'a str,
}

/// Client for the photo library API.
#[derive(Clone)]
pub struct PhotosClient {
    http: reqwest::Client,
    api_base: String,
    tokens: Arc<TokenManager>,
    request_timeout: Duration,
}

impl PhotosClient {
    /// Create a client rooted at `api_base` (e.g. `.../v1`), authorized by `tokens`.
    pub fn new(http: reqwest::Client, api_base: impl Into<String>, tokens: Arc<TokenManager>) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self {
            http,
            api_base,
            tokens,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound every API request by `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The token manager shared with the rest of the entry.
    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    async fn authorized(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let token = self.tokens.ensure_valid_token().await?;
        Ok(self
            .http
            .request(method, url)
            .timeout(self.request_timeout)
            .bearer_auth(token))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SlideshowError::RemoteService { status, body });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// All albums, every page concatenated in service order.
    pub async fn list_albums(&self) -> Result<Vec<Album>> {
        let mut albums = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let url = match page_token.as_deref() {
                Some(token) => format!(
                    "{}?pageToken={}",
                    self.url("albums"),
                    urlencoding::encode(token)
                ),
                None => self.url("albums"),
            };
            let request = self.authorized(Method::GET, &url).await?;
            let page: AlbumsPage = self.send(request).await.inspect_err(|e| {
                tracing::error!("Failed to list albums: {}", e);
            })?;

            albums.extend(page.albums);
            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }

        tracing::debug!("Listed {} albums", albums.len());
        Ok(albums)
    }

    /// Media items of one album, or every photo in the library when no
    /// album is given (videos are filtered out by the service).
    pub async fn list_media_items(&self, album_id: Option<&str>) -> Result<Vec<MediaItem>> {
        let url = self.url("mediaItems:search");
        let mut media_items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let payload = SearchRequest {
                page_size: SEARCH_PAGE_SIZE,
                page_token: page_token.as_deref(),
                album_id,
                filters: album_id.is_none().then(|| SearchFilters {
                    media_type_filter: MediaTypeFilter {
                        media_types: vec!["PHOTO"],
                    },
                }),
            };
            let request = self.authorized(Method::POST, &url).await?.json(&payload);
            let page: MediaItemsPage = self.send(request).await.inspect_err(|e| {
                tracing::error!("Failed to list media items: {}", e);
            })?;

            media_items.extend(page.media_items);
            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }

        tracing::debug!("Listed {} media items", media_items.len());
        Ok(media_items)
    }

    /// Batch lookup by id in a single request.
    pub async fn get_media_items(&self, ids: &[String]) -> Result<Vec<MediaItemResult>> {
        let payload = BatchGetRequest { media_item_ids: ids };
        let request = self
            .authorized(Method::POST, &self.url("mediaItems:batchGet"))
            .await?
            .json(&payload);
        let response: BatchGetResponse = self.send(request).await?;
        Ok(response.media_item_results)
    }

    /// Start a picker session, optionally scoped to one album.
    pub async fn create_picker_session(&self, album_id: Option<&str>) -> Result<PickerSession> {
        let payload = CreatePickerRequest {
            feature_config: FeatureConfig {
                photo_picker: PhotoPicker {
                    enabled_features: ["PHOTOS", "ALBUMS"],
                    album_id,
                },
            },
        };
        let request = self
            .authorized(Method::POST, &self.url("picker:createSession"))
            .await?
            .json(&payload);
        self.send(request).await
    }

    /// Current state of a picker session.
    pub async fn poll_picker_session(&self, session_id: &str) -> Result<PickerSession> {
        let payload = PollPickerRequest { session_id };
        let request = self
            .authorized(Method::POST, &self.url("picker:poll"))
            .await?
            .json(&payload);
        self.send(request).await
    }
}
