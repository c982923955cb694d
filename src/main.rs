use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use photos_slideshow::camera::Camera;
use photos_slideshow::config::token_section;
use photos_slideshow::{Settings, SlideshowEntry, TokenBundle};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "photos-slideshow",
    version,
    about = "Slideshow of a remote photo library exposed as a camera."
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the slideshow until interrupted (default).
    Run {
        /// Write the current image here whenever the slideshow moves.
        #[arg(long, value_name = "FILE")]
        snapshot: Option<PathBuf>,
    },
    /// Print the consent URL for an offline grant.
    AuthUrl {
        #[arg(long)]
        redirect_uri: String,
    },
    /// Exchange an authorization code and print the token section.
    ExchangeCode {
        #[arg(long)]
        code: String,
        #[arg(long)]
        redirect_uri: String,
    },
    /// List albums with their ids.
    Albums,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    let http = settings.http_client().context("Failed to build HTTP client")?;

    match cli.command.unwrap_or(Commands::Run { snapshot: None }) {
        Commands::Run { snapshot } => run(&settings, http, snapshot.as_deref()).await,
        Commands::AuthUrl { redirect_uri } => {
            let entry = SlideshowEntry::build(&settings, http)?;
            let state: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(32)
                .map(char::from)
                .collect();
            let url = entry.tokens.authorize_url(&redirect_uri, &state)?;
            println!("{url}");
            Ok(())
        }
        Commands::ExchangeCode { code, redirect_uri } => {
            let entry = SlideshowEntry::build(&settings, http)?;
            let bundle = entry
                .tokens
                .exchange_code(&code, &redirect_uri)
                .await
                .context("Authorization code exchange failed")?;
            print!("{}", token_section(&bundle)?);
            Ok(())
        }
        Commands::Albums => {
            let entry = SlideshowEntry::build(&settings, http)?;
            let albums = entry.client.list_albums().await.context("Failed to list albums")?;
            for album in albums {
                println!("{}\t{}", album.id, album.title);
            }
            Ok(())
        }
    }
}

async fn run(settings: &Settings, http: reqwest::Client, snapshot: Option<&Path>) -> Result<()> {
    let entry = SlideshowEntry::setup(settings, http)
        .await
        .context("Failed to set up slideshow")?;

    let cancel = CancellationToken::new();
    let handle = entry.start(cancel.clone());
    let mut updates = entry.camera.subscribe();
    let mut rotations = entry.tokens.subscribe_rotations();
    let mut reauth_reported = false;

    publish(&entry.camera, snapshot).await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested");
                break;
            }
            Ok(()) = rotations.changed() => {
                let bundle = rotations.borrow_and_update().clone();
                if let Some(bundle) = bundle {
                    persist_hint(&bundle);
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let reauth_required = updates.borrow_and_update().reauth_required;
                if reauth_required && !reauth_reported {
                    tracing::error!(
                        "Photo library access was revoked or expired; run `photos-slideshow auth-url` to re-authorize"
                    );
                }
                reauth_reported = reauth_required;
                publish(&entry.camera, snapshot).await;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

async fn publish(camera: &impl Camera, snapshot: Option<&Path>) {
    let attributes = camera.attributes();
    match serde_json::to_string(&attributes) {
        Ok(json) => tracing::info!("{} state: {}", camera.name(), json),
        Err(e) => tracing::warn!("Failed to serialize camera attributes: {}", e),
    }

    let Some(path) = snapshot else {
        return;
    };
    let Some(bytes) = camera.camera_image().await else {
        return;
    };
    if let Err(e) = tokio::fs::write(path, &bytes).await {
        tracing::warn!("Failed to write snapshot to {:?}: {}", path, e);
    }
}

/// The stored refresh token is stale after a rotation; print the replacement.
fn persist_hint(bundle: &TokenBundle) {
    match token_section(bundle) {
        Ok(section) => {
            tracing::warn!("Refresh token rotated; replace the [token] section of the settings file");
            println!("{section}");
        }
        Err(e) => tracing::error!("Refresh token rotated but could not be rendered: {}", e),
    }
}
