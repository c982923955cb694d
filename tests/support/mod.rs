//! In-process stand-in for the token endpoint, the photo library API and
//! the image host.

#![allow(dead_code)]

use axum::extract::{Form, Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use photos_slideshow::api::PhotosClient;
use photos_slideshow::auth::{OAuthClient, TokenBundle, TokenManager};
use photos_slideshow::config::{Endpoints, Settings};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub struct FakeLibrary {
    pub library_items: Mutex<Vec<Value>>,
    pub album_items: Mutex<HashMap<String, Vec<Value>>>,
    pub albums: Mutex<Vec<Value>>,
    /// Items per page; 0 returns everything in one page.
    pub page_size: AtomicUsize,

    pub search_status: AtomicU16,
    pub album_status: AtomicU16,
    pub search_bodies: Mutex<Vec<Value>>,
    pub album_queries: Mutex<Vec<HashMap<String, String>>>,
    pub auth_headers: Mutex<Vec<String>>,

    pub token_status: AtomicU16,
    pub token_expires_in: Mutex<Option<i64>>,
    /// Refresh token handed out by refresh grants, if any.
    pub rotated_refresh_token: Mutex<Option<String>>,
    pub token_calls: AtomicUsize,
    pub grants: Mutex<Vec<HashMap<String, String>>>,

    pub image_status: AtomicU16,
    pub image_delay: Mutex<Duration>,
    pub image_requests: AtomicUsize,
    pub image_auth_seen: AtomicUsize,
}

impl FakeLibrary {
    fn new() -> Self {
        Self {
            library_items: Mutex::new(Vec::new()),
            album_items: Mutex::new(HashMap::new()),
            albums: Mutex::new(Vec::new()),
            page_size: AtomicUsize::new(0),
            search_status: AtomicU16::new(200),
            album_status: AtomicU16::new(200),
            search_bodies: Mutex::new(Vec::new()),
            album_queries: Mutex::new(Vec::new()),
            auth_headers: Mutex::new(Vec::new()),
            token_status: AtomicU16::new(200),
            token_expires_in: Mutex::new(Some(3600)),
            rotated_refresh_token: Mutex::new(None),
            token_calls: AtomicUsize::new(0),
            grants: Mutex::new(Vec::new()),
            image_status: AtomicU16::new(200),
            image_delay: Mutex::new(Duration::ZERO),
            image_requests: AtomicUsize::new(0),
            image_auth_seen: AtomicUsize::new(0),
        }
    }

    fn record_auth(&self, headers: &HeaderMap) {
        if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            self.auth_headers.lock().unwrap().push(value.to_string());
        }
    }

    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_bodies.lock().unwrap().len()
    }

    pub fn fail_search_with(&self, status: u16) {
        self.search_status.store(status, Ordering::SeqCst);
    }

    pub fn fail_token_with(&self, status: u16) {
        self.token_status.store(status, Ordering::SeqCst);
    }
}

pub struct FakeServer {
    pub base: String,
    pub lib: Arc<FakeLibrary>,
}

pub async fn start() -> FakeServer {
    let lib = Arc::new(FakeLibrary::new());
    let router = Router::new()
        .route("/token", post(token))
        .route("/v1/albums", get(albums))
        .route("/v1/mediaItems:search", post(search))
        .route("/v1/mediaItems:batchGet", post(batch_get))
        .route("/v1/picker:createSession", post(create_session))
        .route("/v1/picker:poll", post(poll_session))
        .route("/img/{id}", get(image))
        .with_state(Arc::clone(&lib));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    FakeServer {
        base: format!("http://{addr}"),
        lib,
    }
}

impl FakeServer {
    pub fn photo(&self, id: &str) -> Value {
        json!({
            "id": id,
            "baseUrl": format!("{}/img/{}", self.base, id),
            "mimeType": "image/jpeg",
            "filename": format!("{id}.jpg"),
        })
    }

    pub fn photos(&self, prefix: &str, n: usize) -> Vec<Value> {
        (0..n).map(|i| self.photo(&format!("{prefix}{i}"))).collect()
    }

    pub fn set_library(&self, items: Vec<Value>) {
        *self.lib.library_items.lock().unwrap() = items;
    }

    pub fn set_album(&self, id: &str, title: &str, items: Vec<Value>) {
        self.lib
            .albums
            .lock()
            .unwrap()
            .push(json!({ "id": id, "title": title }));
        self.lib
            .album_items
            .lock()
            .unwrap()
            .insert(id.to_string(), items);
    }

    pub fn endpoints(&self) -> Endpoints {
        Endpoints {
            api_base: format!("{}/v1", self.base),
            token_uri: format!("{}/token", self.base),
            auth_uri: "https://accounts.example.test/o/oauth2/v2/auth".to_string(),
        }
    }

    pub fn settings(&self, token: Option<TokenBundle>) -> Settings {
        Settings {
            entry_id: "test_entry".to_string(),
            client_id: Some("client-id".to_string()),
            client_secret: Some("client-secret".to_string()),
            token,
            endpoints: self.endpoints(),
            ..Settings::default()
        }
    }

    pub fn token_manager(&self, token: Option<TokenBundle>) -> Arc<TokenManager> {
        Arc::new(TokenManager::new(
            reqwest::Client::new(),
            OAuthClient::new("client-id", "client-secret"),
            token.as_ref(),
            format!("{}/token", self.base),
            "https://accounts.example.test/o/oauth2/v2/auth",
        ))
    }

    pub fn client(&self, token: Option<TokenBundle>) -> PhotosClient {
        PhotosClient::new(
            reqwest::Client::new(),
            format!("{}/v1", self.base),
            self.token_manager(token),
        )
    }
}

/// Base URL of a listener that accepts connections and never answers.
pub async fn silent_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}")
}

/// Token bundle expiring `secs` from now.
pub fn bundle_expiring_in(secs: i64) -> TokenBundle {
    TokenBundle {
        access_token: Some("stored-access".to_string()),
        refresh_token: Some("stored-refresh".to_string()),
        expires_at: Some((Utc::now().timestamp() + secs) as f64),
        ..TokenBundle::default()
    }
}

pub fn valid_bundle() -> TokenBundle {
    bundle_expiring_in(3600)
}

fn status(code: &AtomicU16) -> StatusCode {
    StatusCode::from_u16(code.load(Ordering::SeqCst)).unwrap()
}

fn paginate(items: &[Value], token: Option<&str>, size: usize) -> (Vec<Value>, Option<String>) {
    let start = token
        .and_then(|t| t.strip_prefix("cursor/"))
        .and_then(|t| t.strip_suffix('+'))
        .and_then(|n| n.parse::<usize>().ok())
        .unwrap_or(0)
        .min(items.len());
    let size = if size == 0 { items.len() } else { size };
    let end = start.saturating_add(size).min(items.len());
    let next = (end < items.len()).then(|| format!("cursor/{end}+"));
    (items[start..end].to_vec(), next)
}

async fn token(
    State(lib): State<Arc<FakeLibrary>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let n = lib.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let grant_type = form.get("grant_type").cloned().unwrap_or_default();
    lib.grants.lock().unwrap().push(form);

    let code = status(&lib.token_status);
    if !code.is_success() {
        return (code, Json(json!({ "error": "invalid_grant" }))).into_response();
    }

    let mut body = json!({
        "access_token": format!("access-{n}"),
        "token_type": "Bearer",
    });
    if let Some(expires_in) = *lib.token_expires_in.lock().unwrap() {
        body["expires_in"] = json!(expires_in);
    }
    if grant_type == "authorization_code" {
        body["refresh_token"] = json!("refresh-from-code");
    } else if let Some(rotated) = lib.rotated_refresh_token.lock().unwrap().clone() {
        body["refresh_token"] = json!(rotated);
    }
    Json(body).into_response()
}

async fn albums(
    State(lib): State<Arc<FakeLibrary>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    lib.record_auth(&headers);
    let page_token = query.get("pageToken").cloned();
    lib.album_queries.lock().unwrap().push(query);

    let code = status(&lib.album_status);
    if !code.is_success() {
        return (code, "albums unavailable").into_response();
    }

    let albums = lib.albums.lock().unwrap().clone();
    let size = lib.page_size.load(Ordering::SeqCst);
    let (page, next) = paginate(&albums, page_token.as_deref(), size);
    let mut body = json!({ "albums": page });
    if let Some(next) = next {
        body["nextPageToken"] = json!(next);
    }
    Json(body).into_response()
}

async fn search(
    State(lib): State<Arc<FakeLibrary>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    lib.record_auth(&headers);
    lib.search_bodies.lock().unwrap().push(request.clone());

    let code = status(&lib.search_status);
    if !code.is_success() {
        return (code, "backend error").into_response();
    }

    let items = match request.get("albumId").and_then(Value::as_str) {
        Some(id) => lib
            .album_items
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default(),
        None => lib.library_items.lock().unwrap().clone(),
    };
    let size = lib.page_size.load(Ordering::SeqCst);
    let (page, next) = paginate(
        &items,
        request.get("pageToken").and_then(Value::as_str),
        size,
    );
    let mut body = json!({ "mediaItems": page });
    if let Some(next) = next {
        body["nextPageToken"] = json!(next);
    }
    Json(body).into_response()
}

async fn batch_get(
    State(lib): State<Arc<FakeLibrary>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    lib.record_auth(&headers);
    let known = lib.library_items.lock().unwrap().clone();
    let ids = request["mediaItemIds"].as_array().cloned().unwrap_or_default();

    let results: Vec<Value> = ids
        .iter()
        .map(|id| match known.iter().find(|item| item["id"] == *id) {
            Some(item) => json!({ "mediaItem": item }),
            None => json!({ "status": { "code": 5, "message": "NOT_FOUND" } }),
        })
        .collect();
    Json(json!({ "mediaItemResults": results })).into_response()
}

async fn create_session(
    State(lib): State<Arc<FakeLibrary>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    lib.record_auth(&headers);
    lib.search_bodies.lock().unwrap().push(request);
    Json(json!({
        "id": "session-1",
        "pickerUri": "https://photos.example.test/picker/session-1",
        "mediaItemsSet": false,
    }))
    .into_response()
}

async fn poll_session(
    State(lib): State<Arc<FakeLibrary>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    lib.record_auth(&headers);
    let id = request["sessionId"].as_str().unwrap_or_default().to_string();
    Json(json!({ "id": id, "mediaItemsSet": true })).into_response()
}

async fn image(
    State(lib): State<Arc<FakeLibrary>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    lib.image_requests.fetch_add(1, Ordering::SeqCst);
    if headers.contains_key(AUTHORIZATION) {
        lib.image_auth_seen.fetch_add(1, Ordering::SeqCst);
    }
    let delay = *lib.image_delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    (status(&lib.image_status), format!("jpeg:{id}")).into_response()
}
