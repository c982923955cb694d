//! OAuth2 token lifecycle for the photo library.
//!
//! The [`TokenManager`] owns the credential for one entry. Every outbound
//! request asks it for a bearer token via [`TokenManager::ensure_valid_token`],
//! which refreshes against the token endpoint when the stored token is about
//! to expire.

use crate::error::{Result, SlideshowError};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use url::Url;

pub const OAUTH_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const OAUTH_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";

pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/photoslibrary.readonly",
    "https://www.googleapis.com/auth/photoslibrary.sharing",
];

/// Refresh this long before the recorded expiry.
const REFRESH_MARGIN_SECS: i64 = 5 * 60;
/// Assumed lifetime when the token endpoint omits `expires_in`.
const FALLBACK_TOKEN_LIFETIME_SECS: i64 = 3600;
/// Consecutive refresh failures after which the user must re-consent.
pub const REAUTH_THRESHOLD: u32 = 3;
/// Upper bound on a single token endpoint round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Token part of the credential in the shape it is persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenBundle {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp in seconds.
    #[serde(default)]
    pub expires_at: Option<f64>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// The registered OAuth application.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

impl OAuthClient {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct Credential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub client: OAuthClient,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expiry", &self.expiry)
            .field("client", &self.client)
            .finish()
    }
}

impl Credential {
    /// Rebuild a credential from its persisted form. Empty tokens count as absent.
    pub fn from_bundle(client: OAuthClient, bundle: &TokenBundle) -> Self {
        let expiry = bundle.expires_at.and_then(|secs| {
            DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
        });
        let non_empty = |token: &Option<String>| token.clone().filter(|t| !t.is_empty());
        Self {
            access_token: non_empty(&bundle.access_token),
            refresh_token: non_empty(&bundle.refresh_token),
            expiry,
            client,
        }
    }

    /// Persisted form of the credential.
    pub fn to_bundle(&self) -> TokenBundle {
        TokenBundle {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expiry.map(|e| e.timestamp_millis() as f64 / 1000.0),
            token_type: Some("Bearer".to_string()),
            scope: Some(SCOPES.join(" ")),
        }
    }

    /// True when the token is missing, has no known expiry, or expires
    /// within the refresh margin of `now`.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_none() {
            return true;
        }
        match self.expiry {
            None => true,
            Some(expiry) => now + TimeDelta::seconds(REFRESH_MARGIN_SECS) >= expiry,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct RefreshGrant<'a> {
    grant_type: &'static str,
    refresh_token: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Debug, Serialize)]
struct CodeGrant<'a> {
    grant_type: &'static str,
    code: &'a str,
    redirect_uri: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
}

/// Owns the credential of one entry and keeps its access token fresh.
pub struct TokenManager {
    http: reqwest::Client,
    token_uri: String,
    auth_uri: String,
    client: OAuthClient,
    request_timeout: Duration,
    credential: Mutex<Option<Credential>>,
    consecutive_failures: AtomicU32,
    rotations: watch::Sender<Option<TokenBundle>>,
}

impl TokenManager {
    /// Create a manager. Without a token bundle every token request fails
    /// with a configuration error until [`TokenManager::exchange_code`] runs.
    pub fn new(
        http: reqwest::Client,
        client: OAuthClient,
        token: Option<&TokenBundle>,
        token_uri: impl Into<String>,
        auth_uri: impl Into<String>,
    ) -> Self {
        let credential = token.map(|bundle| Credential::from_bundle(client.clone(), bundle));
        Self {
            http,
            token_uri: token_uri.into(),
            auth_uri: auth_uri.into(),
            client,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            credential: Mutex::new(credential),
            consecutive_failures: AtomicU32::new(0),
            rotations: watch::Sender::new(None),
        }
    }

    /// Bound every token endpoint call by `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Receives the persisted form of the credential whenever the token
    /// endpoint hands out a new refresh token.
    pub fn subscribe_rotations(&self) -> watch::Receiver<Option<TokenBundle>> {
        self.rotations.subscribe()
    }

    /// Return a bearer token that stays valid for at least the refresh
    /// margin, refreshing it first if needed. At most one refresh per call.
    pub async fn ensure_valid_token(&self) -> Result<String> {
        let mut guard = self.credential.lock().await;
        let credential = guard
            .as_mut()
            .ok_or_else(|| SlideshowError::Configuration("no credentials available".into()))?;

        let Some(refresh_token) = credential.refresh_token.clone() else {
            return Err(SlideshowError::Configuration(
                "credential has no refresh token".into(),
            ));
        };

        if credential.needs_refresh(Utc::now()) {
            tracing::debug!("Access token missing or near expiry, refreshing");
            match self.refresh(&refresh_token).await {
                Ok(response) => {
                    let rotated = self.apply(credential, response);
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    tracing::info!("Access token refreshed, valid until {:?}", credential.expiry);
                    if rotated {
                        tracing::warn!("Token endpoint rotated the refresh token; the stored one is now stale");
                        self.rotations.send_replace(Some(credential.to_bundle()));
                    }
                }
                Err(e) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    if failures >= REAUTH_THRESHOLD {
                        tracing::error!(
                            "Token refresh failed {} times in a row, re-authorization required: {}",
                            failures,
                            e
                        );
                    } else {
                        tracing::warn!("Token refresh failed ({} in a row): {}", failures, e);
                    }
                    return Err(e);
                }
            }
        }

        credential
            .access_token
            .clone()
            .ok_or_else(|| SlideshowError::Authentication("no access token issued".into()))
    }

    /// Setup-time check that the stored credential can produce a token.
    pub async fn verify_access(&self) -> Result<()> {
        self.ensure_valid_token().await.map(|_| ())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let grant = RefreshGrant {
            grant_type: "refresh_token",
            refresh_token,
            client_id: &self.client.client_id,
            client_secret: &self.client.client_secret,
        };
        self.post_grant(&grant).await
    }

    async fn post_grant<T: Serialize>(&self, grant: &T) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.token_uri)
            .form(grant)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| SlideshowError::Authentication(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SlideshowError::Authentication(format!("failed to read token response: {e}")))?;

        if !status.is_success() {
            return Err(SlideshowError::Authentication(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| SlideshowError::Authentication(format!("malformed token response: {e}")))
    }

    /// Install a token response. Returns whether the refresh token changed.
    fn apply(&self, credential: &mut Credential, response: TokenResponse) -> bool {
        let lifetime = response
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(FALLBACK_TOKEN_LIFETIME_SECS);
        credential.access_token = Some(response.access_token);
        credential.expiry = Some(expiry_after(Utc::now(), lifetime));
        match response.refresh_token {
            Some(rotated) if credential.refresh_token.as_deref() != Some(rotated.as_str()) => {
                credential.refresh_token = Some(rotated);
                true
            }
            _ => false,
        }
    }

    /// Consent URL that yields an offline (refreshable) grant.
    pub fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<Url> {
        let scope = SCOPES.join(" ");
        Url::parse_with_params(
            &self.auth_uri,
            &[
                ("response_type", "code"),
                ("client_id", self.client.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("state", state),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("scope", scope.as_str()),
            ],
        )
        .map_err(|e| SlideshowError::Configuration(format!("invalid authorization endpoint: {e}")))
    }

    /// Trade an authorization code for the initial credential and install it.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenBundle> {
        let grant = CodeGrant {
            grant_type: "authorization_code",
            code,
            redirect_uri,
            client_id: &self.client.client_id,
            client_secret: &self.client.client_secret,
        };
        let response = self.post_grant(&grant).await?;
        if response.refresh_token.is_none() {
            return Err(SlideshowError::Authentication(
                "authorization server issued no refresh token".into(),
            ));
        }

        let mut credential = Credential {
            access_token: None,
            refresh_token: None,
            expiry: None,
            client: self.client.clone(),
        };
        self.apply(&mut credential, response);
        let bundle = credential.to_bundle();

        *self.credential.lock().await = Some(credential);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        tracing::info!("Authorization code exchanged for a new credential");
        Ok(bundle)
    }

    /// Snapshot of the current token state for persistence.
    pub async fn token_bundle(&self) -> Option<TokenBundle> {
        self.credential.lock().await.as_ref().map(Credential::to_bundle)
    }

    /// Whether repeated refresh failures mean the user has to re-consent.
    pub fn needs_reauth(&self) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) >= REAUTH_THRESHOLD
    }

    /// Refresh failures since the last successful refresh.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

/// `now + secs`, falling back to the default lifetime when the provider's
/// value does not fit in a timestamp.
fn expiry_after(now: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    TimeDelta::try_seconds(secs)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or_else(|| {
            tracing::warn!("Ignoring out-of-range token lifetime of {}s", secs);
            now + TimeDelta::seconds(FALLBACK_TOKEN_LIFETIME_SECS)
        })
}
