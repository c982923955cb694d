//! Slideshow coordinator.
//!
//! Two periodic transitions act on one [`SlideshowState`]:
//! - refresh: re-fetch the media set (and the album label) from the library;
//! - advance: step to the next photo, no I/O.
//!
//! Each transition builds a new state from the current one and publishes it
//! through a `watch` channel in a single step, so subscribers only ever see
//! complete snapshots. Network work happens before that step.

use crate::api::{Album, MediaItem, PhotosClient};
use crate::error::{Result, SlideshowError};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Resize directive understood by the image host.
pub const PHOTO_SIZE_SUFFIX: &str = "=w1920-h1080";

/// Immutable snapshot of the slideshow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlideshowState {
    pub media_items: Arc<Vec<MediaItem>>,
    /// Always `< media_items.len()`, or 0 when the set is empty.
    pub current_index: usize,
    pub album_name: Option<String>,
    pub last_refresh_error: Option<String>,
    pub last_refreshed: Option<DateTime<Utc>>,
    pub reauth_required: bool,
}

impl SlideshowState {
    /// Number of items in the media set.
    pub fn photo_count(&self) -> usize {
        self.media_items.len()
    }

    /// The item on display, if any.
    pub fn current_item(&self) -> Option<&MediaItem> {
        self.media_items.get(self.current_index)
    }

    /// Sized URL of the photo on display; `None` for an empty set.
    pub fn current_photo_url(&self) -> Option<String> {
        self.current_item()
            .filter(|item| !item.base_url.is_empty())
            .map(|item| format!("{}{}", item.base_url, PHOTO_SIZE_SUFFIX))
    }

    /// 1-based position of the current photo, 0 when there is none.
    pub fn position(&self) -> usize {
        if self.media_items.is_empty() {
            0
        } else {
            self.current_index + 1
        }
    }

    /// Next photo, wrapping at the end. An empty set is left untouched.
    pub fn advanced(&self) -> Self {
        let mut next = self.clone();
        if !self.media_items.is_empty() {
            next.current_index = (self.current_index + 1) % self.media_items.len();
        }
        next
    }

    /// Apply a successful refresh. The index is kept if still in range and
    /// reset to 0 otherwise. `album_name` of `None` keeps the previous label.
    pub fn refreshed(
        &self,
        media_items: Vec<MediaItem>,
        album_name: Option<Option<String>>,
        at: DateTime<Utc>,
    ) -> Self {
        let current_index = if self.current_index < media_items.len() {
            self.current_index
        } else {
            0
        };
        Self {
            media_items: Arc::new(media_items),
            current_index,
            album_name: album_name.unwrap_or_else(|| self.album_name.clone()),
            last_refresh_error: None,
            last_refreshed: Some(at),
            reauth_required: self.reauth_required,
        }
    }

    /// Record a failed refresh; the media set and index stay as they were.
    pub fn with_refresh_error(&self, error: &SlideshowError) -> Self {
        Self {
            last_refresh_error: Some(error.to_string()),
            ..self.clone()
        }
    }
}

/// First album whose id matches, by title.
pub fn resolve_album_name(albums: &[Album], album_id: &str) -> Option<String> {
    let mut matches = albums.iter().filter(|album| album.id == album_id);
    let first = matches.next()?;
    let duplicates = matches.count();
    if duplicates > 0 {
        tracing::debug!(
            "Album id {} listed {} more times, using the first title",
            album_id,
            duplicates
        );
    }
    Some(first.title.clone())
}

/// Drives the refresh and advance transitions for one entry.
pub struct SlideshowCoordinator {
    client: PhotosClient,
    album_id: Option<String>,
    update_interval: Duration,
    slideshow_interval: Duration,
    state_tx: watch::Sender<SlideshowState>,
}

impl SlideshowCoordinator {
    /// Create a coordinator with an empty media set. Nothing is fetched
    /// until [`SlideshowCoordinator::first_refresh`] or [`SlideshowCoordinator::spawn`].
    pub fn new(
        client: PhotosClient,
        album_id: Option<String>,
        update_interval: Duration,
        slideshow_interval: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(SlideshowState::default());
        Self {
            client,
            album_id,
            update_interval,
            slideshow_interval,
            state_tx,
        }
    }

    /// Receiver for every published state change.
    pub fn subscribe(&self) -> watch::Receiver<SlideshowState> {
        self.state_tx.subscribe()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> SlideshowState {
        self.state_tx.borrow().clone()
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn slideshow_interval(&self) -> Duration {
        self.slideshow_interval
    }

    /// Setup-time refresh. Same transition as the periodic one, but the
    /// caller gets the error to decide whether setup can continue.
    pub async fn first_refresh(&self) -> Result<()> {
        self.refresh().await
    }

    /// Re-fetch the media set. On failure the previous items and index are
    /// kept and the error is recorded in the published state.
    pub async fn refresh(&self) -> Result<()> {
        let outcome = self.fetch().await;
        let reauth_required = self.client.tokens().needs_reauth();

        match outcome {
            Ok((media_items, album_name)) => {
                if media_items.is_empty() {
                    tracing::warn!("No media items found");
                } else {
                    tracing::info!("Fetched {} media items", media_items.len());
                }
                let now = Utc::now();
                self.state_tx.send_modify(|state| {
                    let mut next = state.refreshed(media_items, album_name, now);
                    next.reauth_required = reauth_required;
                    *state = next;
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Refresh failed, keeping previous photos: {}", e);
                self.state_tx.send_modify(|state| {
                    let mut next = state.with_refresh_error(&e);
                    next.reauth_required = reauth_required;
                    *state = next;
                });
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> Result<(Vec<MediaItem>, Option<Option<String>>)> {
        let album_id = self.album_id.as_deref();
        let media_items = self.client.list_media_items(album_id).await?;

        let album_name = match album_id {
            None => Some(None),
            Some(id) => match self.client.list_albums().await {
                Ok(albums) => Some(resolve_album_name(&albums, id)),
                Err(e) => {
                    tracing::warn!("Album lookup failed, keeping previous name: {}", e);
                    None
                }
            },
        };

        Ok((media_items, album_name))
    }

    /// Step to the next photo. Publishes only when there is something to show.
    pub fn advance(&self) -> bool {
        self.state_tx.send_if_modified(|state| {
            if state.media_items.is_empty() {
                return false;
            }
            *state = state.advanced();
            true
        })
    }

    /// Start the periodic refresh and advance tasks. They run until the
    /// token is cancelled or the handle is shut down or dropped.
    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> SlideshowHandle {
        let refresh = tokio::spawn(Arc::clone(self).run_refresh(cancel.clone()));
        let advance = tokio::spawn(Arc::clone(self).run_advance(cancel.clone()));
        tracing::info!(
            "Slideshow started: refresh every {:?}, advance every {:?}",
            self.update_interval,
            self.slideshow_interval
        );
        SlideshowHandle {
            cancel,
            tasks: vec![refresh, advance],
        }
    }

    async fn run_refresh(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.update_interval, self.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        // Errors are already recorded in the state.
                        _ = self.refresh() => {}
                    }
                }
            }
        }
        tracing::debug!("Refresh task stopped");
    }

    async fn run_advance(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval_at(
            Instant::now() + self.slideshow_interval,
            self.slideshow_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.advance();
                }
            }
        }
        tracing::debug!("Advance task stopped");
    }
}

/// Owns the running slideshow tasks.
pub struct SlideshowHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SlideshowHandle {
    /// True while either task is still alive.
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Cancel both tasks and wait for them to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut self.tasks);
        for result in join_all(tasks).await {
            if let Err(e) = result {
                tracing::error!("Slideshow task ended abnormally: {}", e);
            }
        }
        tracing::info!("Slideshow stopped");
    }
}

impl Drop for SlideshowHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
