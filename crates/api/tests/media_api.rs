//! Integration tests for `/api/v1/stream/*`.

mod common;

use std::net::SocketAddr;
use std::path::Path;

use axum::body::Body;
use axum::http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::{routing, Router};
use common::{body_bytes, body_json, build_test_app, get, get_with_header};
use lumora_core::delivery::parse_range_header;
use lumora_core::generation::GenerationType;
use lumora_core::job::{CompletionPath, JobCompletion, NewGenerationJob};
use lumora_core::store::JobStore;
use lumora_core::types::DbId;
use lumora_pipeline::InMemoryStore;

// -- Fixtures --

fn new_video_job() -> NewGenerationJob {
    NewGenerationJob {
        user_id: 7,
        generation_type: GenerationType::Video,
        prompt: "a paper boat in the rain".into(),
        model_id: "kling-v1".into(),
        aspect_ratio: Some("16:9".into()),
        duration_secs: Some(5),
        cost_charged: 10,
        used_free_tier: false,
        watermark: false,
        reservation_id: uuid::Uuid::new_v4(),
    }
}

/// A completed video job whose file sits at `path`.
async fn completed_video(store: &InMemoryStore, path: &Path) -> DbId {
    complete_video_job(
        store,
        "https://mock.lumora.local/videos/gen-abc.mp4",
        Some(path.to_string_lossy().into_owned()),
    )
    .await
}

async fn complete_video_job(
    store: &InMemoryStore,
    remote_url: &str,
    local_file_path: Option<String>,
) -> DbId {
    let job = store.create(new_video_job()).await.unwrap();
    let completion = JobCompletion {
        generation_id: "gen-abc".into(),
        remote_url: remote_url.into(),
        local_file_path,
        format: Some("mp4".into()),
        ..Default::default()
    };
    assert!(store
        .complete(job.id, &completion, CompletionPath::Synchronous)
        .await
        .unwrap());
    job.id
}

fn sample_bytes() -> Vec<u8> {
    (0..1000u32).map(|i| (i % 251) as u8).collect()
}

// ---------------------------------------------------------------------------
// Local files
// ---------------------------------------------------------------------------

#[tokio::test]
async fn range_request_returns_partial_content() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path().to_path_buf());
    let file = dir.path().join("clip.mp4");
    let bytes = sample_bytes();
    std::fs::write(&file, &bytes).unwrap();
    let id = completed_video(&app.store, &file).await;

    let response = get_with_header(
        app.app(),
        &format!("/api/v1/stream/video/{id}"),
        "range",
        "bytes=100-199",
    )
    .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let headers = response.headers();
    assert_eq!(headers["content-range"], "bytes 100-199/1000");
    assert_eq!(headers["content-length"], "100");
    assert_eq!(headers["accept-ranges"], "bytes");
    assert_eq!(headers["content-type"], "video/mp4");
    assert_eq!(body_bytes(response).await, bytes[100..200].to_vec());
}

#[tokio::test]
async fn unranged_request_returns_whole_file() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path().to_path_buf());
    let file = dir.path().join("clip.mp4");
    let bytes = sample_bytes();
    std::fs::write(&file, &bytes).unwrap();
    let id = completed_video(&app.store, &file).await;

    let response = get(app.app(), &format!("/api/v1/stream/video/{id}")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-length"], "1000");
    assert!(response.headers().get("content-disposition").is_none());
    assert_eq!(body_bytes(response).await, bytes);
}

#[tokio::test]
async fn suffix_range_returns_tail() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path().to_path_buf());
    let file = dir.path().join("clip.mp4");
    let bytes = sample_bytes();
    std::fs::write(&file, &bytes).unwrap();
    let id = completed_video(&app.store, &file).await;

    let response = get_with_header(
        app.app(),
        &format!("/api/v1/stream/video/{id}"),
        "range",
        "bytes=-50",
    )
    .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["content-range"], "bytes 950-999/1000");
    assert_eq!(body_bytes(response).await, bytes[950..].to_vec());
}

#[tokio::test]
async fn range_past_end_returns_416() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path().to_path_buf());
    let file = dir.path().join("clip.mp4");
    std::fs::write(&file, sample_bytes()).unwrap();
    let id = completed_video(&app.store, &file).await;

    let response = get_with_header(
        app.app(),
        &format!("/api/v1/stream/video/{id}"),
        "range",
        "bytes=5000-",
    )
    .await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()["content-range"], "bytes */1000");
}

#[tokio::test]
async fn download_flag_sets_attachment() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path().to_path_buf());
    let file = dir.path().join("clip.mp4");
    std::fs::write(&file, sample_bytes()).unwrap();
    let id = completed_video(&app.store, &file).await;

    let response = get(app.app(), &format!("/api/v1/stream/video/{id}?download=true")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-disposition"],
        format!("attachment; filename=\"lumora-{id}.mp4\"").as_str()
    );
}

#[tokio::test]
async fn cached_file_is_found_by_generation_id() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path().to_path_buf());
    let missing = dir.path().join("moved-away.mp4");
    let id = completed_video(&app.store, &missing).await;

    std::fs::create_dir_all(dir.path().join("videos")).unwrap();
    std::fs::write(dir.path().join("videos/gen-abc.mp4"), sample_bytes()).unwrap();

    let response = get(app.app(), &format!("/api/v1/stream/video/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-length"], "1000");
}

// ---------------------------------------------------------------------------
// Thumbnails
// ---------------------------------------------------------------------------

#[tokio::test]
async fn thumbnail_falls_back_to_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path().to_path_buf());
    let job = app.store.create(new_video_job()).await.unwrap();

    let response = get(app.app(), &format!("/api/v1/stream/video/{}/thumbnail", job.id)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
    assert_eq!(response.headers()["cache-control"], "no-store");
    let body = body_bytes(response).await;
    assert_eq!(&body[..8], b"\x89PNG\r\n\x1a\n");
}

#[tokio::test]
async fn thumbnail_for_unknown_job_is_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path().to_path_buf());

    let response = get(app.app(), "/api/v1/stream/video/424242/thumbnail").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
    let body = body_bytes(response).await;
    assert_eq!(&body[..8], b"\x89PNG\r\n\x1a\n");
}

#[tokio::test]
async fn thumbnail_with_non_numeric_id_returns_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path().to_path_buf());

    let response = get(app.app(), "/api/v1/stream/video/abc/thumbnail").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Remote proxy
// ---------------------------------------------------------------------------

/// Serves `/clip.mp4` (1000 bytes, single ranges honoured) and answers
/// `/gone.mp4` with 410. Returns the bound address.
async fn spawn_origin() -> SocketAddr {
    async fn clip(headers: HeaderMap) -> Response {
        let bytes = sample_bytes();
        let range = headers
            .get(RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range_header)
            .and_then(|r| r.resolve(bytes.len() as u64, u64::MAX));
        let builder = Response::builder()
            .header(CONTENT_TYPE, "video/mp4")
            .header(ACCEPT_RANGES, "bytes");
        match range {
            Some(span) => {
                let body = bytes[span.start as usize..=span.end as usize].to_vec();
                builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(CONTENT_RANGE, span.content_range(bytes.len() as u64))
                    .header(CONTENT_LENGTH, body.len())
                    .body(Body::from(body))
                    .unwrap()
            }
            None => builder
                .header(CONTENT_LENGTH, bytes.len())
                .body(Body::from(bytes))
                .unwrap(),
        }
    }

    let origin = Router::new()
        .route("/clip.mp4", routing::get(clip))
        .route("/gone.mp4", routing::get(|| async { StatusCode::GONE }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, origin).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn remote_asset_is_proxied_with_range() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path().to_path_buf());
    let origin = spawn_origin().await;
    let id = complete_video_job(&app.store, &format!("http://{origin}/clip.mp4"), None).await;

    let response = get_with_header(
        app.app(),
        &format!("/api/v1/stream/video/{id}"),
        "range",
        "bytes=100-199",
    )
    .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let headers = response.headers();
    assert_eq!(headers["content-range"], "bytes 100-199/1000");
    assert_eq!(headers["content-length"], "100");
    assert_eq!(headers["accept-ranges"], "bytes");
    assert_eq!(headers["content-type"], "video/mp4");
    assert_eq!(body_bytes(response).await, sample_bytes()[100..200].to_vec());
}

#[tokio::test]
async fn upstream_error_status_is_mirrored() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path().to_path_buf());
    let origin = spawn_origin().await;
    let id = complete_video_job(&app.store, &format!("http://{origin}/gone.mp4"), None).await;

    let response = get(app.app(), &format!("/api/v1/stream/video/{id}")).await;

    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(body_json(response).await["code"], "UPSTREAM_ERROR");
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_numeric_id_returns_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path().to_path_buf());

    let response = get(app.app(), "/api/v1/stream/image/not-a-number").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn unfinished_job_returns_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path().to_path_buf());
    let job = app.store.create(new_video_job()).await.unwrap();

    let response = get(app.app(), &format!("/api/v1/stream/video/{}", job.id)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn image_route_does_not_serve_videos() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path().to_path_buf());
    let file = dir.path().join("clip.mp4");
    std::fs::write(&file, sample_bytes()).unwrap();
    let id = completed_video(&app.store, &file).await;

    let response = get(app.app(), &format!("/api/v1/stream/image/{id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
