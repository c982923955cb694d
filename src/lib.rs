//! Remote photo library slideshow exposed as a camera entity.
//!
//! Data flows one way: [`auth::TokenManager`] authorizes the
//! [`api::PhotosClient`], which feeds the [`slideshow::SlideshowCoordinator`],
//! whose snapshots the [`camera::SlideshowCamera`] turns into image bytes and
//! attributes.

pub mod api;
pub mod auth;
pub mod camera;
pub mod config;
pub mod entry;
pub mod error;
pub mod slideshow;

pub use api::{Album, MediaItem, PhotosClient};
pub use auth::{TokenBundle, TokenManager};
pub use camera::{Camera, CameraAttributes, SlideshowCamera};
pub use config::Settings;
pub use entry::SlideshowEntry;
pub use error::{Result, SlideshowError};
pub use slideshow::{SlideshowCoordinator, SlideshowHandle, SlideshowState};
