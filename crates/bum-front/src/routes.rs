//! HTTP routes.
//!
//! Every handler turns a request into one coordinator exchange and relays
//! the reply. A non-OK status becomes the matching HTTP error with an
//! empty body.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use blake2::digest::consts::U16;
use blake2::{Blake2b, Digest};
use bum_protocol::{Method, unpack_sequence};
use serde::Deserialize;

use crate::Rpc;
use crate::error::{FrontError, FrontResult, check};
use crate::stream::transcode_response;

const JSON: &str = "application/json";
const BINARY: &str = "binary/octet-stream";

/// Covers rarely change, so browsers may keep them for half a year.
const COVER_CACHE_CONTROL: &str = "public, max-age=15768000";

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub rpc: Arc<Rpc>,
    /// Content type of transcoded streams.
    pub stream_type: &'static str,
}

impl AppState {
    pub fn new(rpc: Arc<Rpc>, stream_type: &'static str) -> Self {
        Self { rpc, stream_type }
    }

    async fn call(&self, method: Method, body: &[u8]) -> FrontResult<Vec<u8>> {
        let (status, reply) = self.rpc.call(method, body).await?;
        check(status)?;
        Ok(reply)
    }

    /// Calls a cover method for `ids`, returning the packed images.
    async fn covers(&self, method: Method, ids: &[&str]) -> FrontResult<Vec<u8>> {
        let body = serde_json::to_vec(ids).map_err(|e| FrontError::Malformed(e.to_string()))?;
        self.call(method, &body).await
    }
}

/// Builds the front's router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/music/songs", get(list_songs))
        .route("/api/music/albums", get(list_albums))
        .route("/api/music/album/:id/metadata", get(album_metadata))
        .route("/api/music/album/:id/cover", get(album_cover))
        .route("/api/music/thumbnail", get(thumbnails))
        .route("/api/music/song/:id/stream", get(song_stream))
        .fallback(static_file)
        .with_state(state)
}

fn json(body: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, JSON)], body).into_response()
}

async fn list_songs(State(state): State<AppState>) -> FrontResult<Response> {
    state.call(Method::ListSongs, b"").await.map(json)
}

async fn list_albums(State(state): State<AppState>) -> FrontResult<Response> {
    state.call(Method::ListAlbums, b"").await.map(json)
}

async fn album_metadata(State(state): State<AppState>, Path(id): Path<String>) -> FrontResult<Response> {
    state.call(Method::AlbumDetails, id.as_bytes()).await.map(json)
}

async fn album_cover(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> FrontResult<Response> {
    let packed = state.covers(Method::Cover, &[id.as_str()]).await?;
    let image = unpack_sequence(&packed)
        .map_err(|e| FrontError::Malformed(e.to_string()))?
        .into_iter()
        .next()
        .unwrap_or_default();
    if image.is_empty() {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }

    let tag = etag(&image);
    let cache_headers = [
        (header::CACHE_CONTROL, HeaderValue::from_static(COVER_CACHE_CONTROL)),
        (header::ETAG, tag.clone()),
    ];
    if headers.get(header::IF_NONE_MATCH) == Some(&tag) {
        return Ok((StatusCode::NOT_MODIFIED, cache_headers).into_response());
    }
    Ok((
        cache_headers,
        [(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"))],
        image,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct ThumbnailQuery {
    #[serde(default)]
    ids: String,
}

async fn thumbnails(State(state): State<AppState>, Query(query): Query<ThumbnailQuery>) -> FrontResult<Response> {
    let ids: Vec<&str> = if query.ids.is_empty() {
        Vec::new()
    } else {
        query.ids.split(',').collect()
    };
    let packed = state.covers(Method::Thumbnail, &ids).await?;
    Ok(([(header::CONTENT_TYPE, BINARY)], packed).into_response())
}

async fn song_stream(State(state): State<AppState>, Path(id): Path<String>) -> FrontResult<Response> {
    transcode_response(&state.rpc, &id, state.stream_type).await
}

async fn static_file(State(state): State<AppState>, uri: Uri) -> FrontResult<Response> {
    let path = uri.path().trim_start_matches('/');
    let data = state.call(Method::GetFile, path.as_bytes()).await?;
    Ok(([(header::CONTENT_TYPE, content_type(path))], Body::from(data)).into_response())
}

/// Strong validator for an image: quoted blake2b-128 hex digest.
fn etag(data: &[u8]) -> HeaderValue {
    let digest = Blake2b::<U16>::digest(data);
    let mut tag = String::with_capacity(34);
    tag.push('"');
    for byte in digest {
        tag.push_str(&format!("{byte:02x}"));
    }
    tag.push('"');
    // Hex digits and quotes are always valid header bytes.
    HeaderValue::from_str(&tag).unwrap_or_else(|_| HeaderValue::from_static("\"\""))
}

/// Guesses a content type from the file extension.
fn content_type(path: &str) -> &'static str {
    let name = if path.is_empty() { "index.html" } else { path };
    let extension = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("js" | "mjs") => "application/javascript",
        Some("json") => JSON,
        Some("txt") => "text/plain",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => BINARY,
    }
}
