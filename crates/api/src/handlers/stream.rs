//! Media delivery: local files with byte ranges, provider proxying, and
//! placeholder thumbnails.
//!
//! These routes are public. A job id is not a secret worth protecting more
//! than the CDN URL the provider already handed out.

use std::io::SeekFrom;
use std::path::Path as FsPath;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE,
    CONTENT_TYPE, RANGE,
};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use lumora_core::delivery::{
    attachment_disposition, content_type_for_extension, extension_from_url, parse_range_header,
    placeholder_thumbnail_png, unsatisfiable_content_range, MediaKind, PLACEHOLDER_HEIGHT,
    PLACEHOLDER_WIDTH,
};
use lumora_core::error::CoreError;
use lumora_core::generation::GenerationType;
use lumora_core::job::GenerationJob;
use lumora_core::types::DbId;
use lumora_pipeline::MediaSource;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Largest span served for an open-ended `bytes=N-` request.
pub const MAX_RANGE_CHUNK: u64 = 8 * 1024 * 1024;

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    /// Serve as an attachment instead of inline.
    #[serde(default)]
    pub download: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /stream/image/{id}
pub async fn stream_image(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> AppResult<Response> {
    deliver(&state, &raw_id, MediaKind::Image, &params, &headers).await
}

/// GET /stream/video/{id}
pub async fn stream_video(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> AppResult<Response> {
    deliver(&state, &raw_id, MediaKind::Video, &params, &headers).await
}

/// GET /stream/video/{id}/thumbnail
pub async fn stream_thumbnail(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> AppResult<Response> {
    deliver(
        &state,
        &raw_id,
        MediaKind::VideoThumbnail,
        &StreamParams::default(),
        &HeaderMap::new(),
    )
    .await
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

fn parse_media_id(raw: &str) -> AppResult<DbId> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::BadRequest("Missing media id".into()));
    }
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid media id '{raw}'")))
}

fn expected_type(kind: MediaKind) -> GenerationType {
    match kind {
        MediaKind::Image => GenerationType::Image,
        MediaKind::Video | MediaKind::VideoThumbnail => GenerationType::Video,
    }
}

async fn deliver(
    state: &AppState,
    raw_id: &str,
    kind: MediaKind,
    params: &StreamParams,
    headers: &HeaderMap,
) -> AppResult<Response> {
    let id = parse_media_id(raw_id)?;
    let not_found = || {
        AppError::Core(CoreError::NotFound {
            entity: "Media",
            id,
        })
    };

    let job = state
        .stores
        .jobs
        .find(id)
        .await?
        .filter(|job| job.generation_type == expected_type(kind));
    let job = match (job, kind) {
        (Some(job), _) => job,
        // A thumbnail slot always gets an image, even for an unknown job.
        (None, MediaKind::VideoThumbnail) => return placeholder(placeholder_png()?),
        (None, _) => return Err(not_found()),
    };

    let source = state.media.resolve(&job, kind).await?.ok_or_else(not_found)?;
    let range = headers.get(RANGE).and_then(|v| v.to_str().ok());

    match source {
        MediaSource::Local { path, size } => {
            let disposition = params
                .download
                .then(|| download_name(&job, path.extension().and_then(|e| e.to_str())));
            serve_local(&path, size, range, disposition).await
        }
        MediaSource::Remote { url } => {
            let disposition = params
                .download
                .then(|| download_name(&job, extension_from_url(&url).as_deref()));
            proxy_remote(&state.http, &url, range, disposition).await
        }
        MediaSource::Placeholder(bytes) => placeholder(bytes),
    }
}

fn download_name(job: &GenerationJob, ext: Option<&str>) -> String {
    let ext = ext
        .or(job.format.as_deref())
        .unwrap_or(MediaKind::for_generation(job.generation_type).default_extension());
    attachment_disposition(&format!("lumora-{}.{ext}", job.id))
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Serve a local file, honouring a single-range `Range` header.
///
/// Unparseable or multi-range headers are served in full with 200.
async fn serve_local(
    path: &FsPath,
    size: u64,
    range: Option<&str>,
    disposition: Option<String>,
) -> AppResult<Response> {
    let content_type = content_type_for_extension(&path.to_string_lossy());
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| AppError::InternalError(format!("open {}: {e}", path.display())))?;

    let mut builder = Response::builder()
        .header(CONTENT_TYPE, content_type)
        .header(ACCEPT_RANGES, "bytes")
        .header(CACHE_CONTROL, "public, max-age=86400");
    if let Some(disposition) = disposition {
        builder = builder.header(CONTENT_DISPOSITION, disposition);
    }

    let response = match range.and_then(parse_range_header) {
        None => builder
            .status(StatusCode::OK)
            .header(CONTENT_LENGTH, size)
            .body(Body::from_stream(ReaderStream::new(file))),
        Some(requested) => match requested.resolve(size, MAX_RANGE_CHUNK) {
            Some(span) => {
                file.seek(SeekFrom::Start(span.start))
                    .await
                    .map_err(|e| AppError::InternalError(format!("seek: {e}")))?;
                let body = Body::from_stream(ReaderStream::new(file.take(span.len())));
                builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(CONTENT_RANGE, span.content_range(size))
                    .header(CONTENT_LENGTH, span.len())
                    .body(body)
            }
            None => builder
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(CONTENT_RANGE, unsatisfiable_content_range(size))
                .body(Body::empty()),
        },
    };
    response.map_err(|e| AppError::InternalError(e.to_string()))
}

/// Stream an asset from the provider, forwarding `Range` and copying back
/// the headers a player needs.
async fn proxy_remote(
    client: &reqwest::Client,
    url: &str,
    range: Option<&str>,
    disposition: Option<String>,
) -> AppResult<Response> {
    let mut request = client.get(url);
    if let Some(range) = range {
        request = request.header(RANGE, range);
    }
    let upstream = request.send().await.map_err(|e| AppError::Proxy {
        status: e.status(),
        message: e.to_string(),
    })?;

    let status = upstream.status();
    if !status.is_success() {
        return Err(AppError::Proxy {
            status: Some(status),
            message: format!("provider returned {status} for {url}"),
        });
    }

    let mut builder = Response::builder().status(status);
    for name in [CONTENT_TYPE, CONTENT_LENGTH, CONTENT_RANGE, ACCEPT_RANGES] {
        if let Some(value) = upstream.headers().get(&name) {
            builder = builder.header(name, value.clone());
        }
    }
    if let Some(disposition) = disposition {
        builder = builder.header(CONTENT_DISPOSITION, disposition);
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| AppError::InternalError(e.to_string()))
}

fn placeholder_png() -> AppResult<Vec<u8>> {
    placeholder_thumbnail_png(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT)
        .map_err(|e| AppError::InternalError(format!("placeholder thumbnail: {e}")))
}

fn placeholder(bytes: Vec<u8>) -> AppResult<Response> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "image/png")
        .header(CONTENT_LENGTH, bytes.len())
        .header(CACHE_CONTROL, "no-store")
        .body(Body::from(bytes))
        .map_err(|e| AppError::InternalError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn media_id_must_be_numeric() {
        assert_eq!(parse_media_id(" 42 ").unwrap(), 42);
        assert_matches!(parse_media_id(""), Err(AppError::BadRequest(_)));
        assert_matches!(parse_media_id("abc"), Err(AppError::BadRequest(_)));
    }
}
