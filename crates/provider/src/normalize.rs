//! Mapping heterogeneous upstream payloads onto [`NormalizedResult`].
//!
//! Upstreams disagree on where the asset URL, id, and thumbnail live, and
//! some wrap everything in a `data` envelope. Lookups go through ordered
//! JSON-pointer lists so adding a new shape is a one-line change.

use lumora_core::delivery::extension_from_url;
use lumora_core::generation::GenerationType;
use serde_json::Value;

use crate::error::ProviderError;
use crate::types::{NormalizedResult, PollStatus};

const URL_POINTERS: &[&str] = &[
    "/url",
    "/video_url",
    "/image_url",
    "/output/url",
    "/output/0",
    "/output",
    "/data/0/url",
    "/data/url",
    "/data/video_url",
    "/data/output/url",
    "/result/url",
    "/result/videos/0/url",
    "/result/images/0/url",
    "/videos/0/url",
    "/images/0/url",
    "/data/result/videos/0/url",
    "/data/result/images/0/url",
];

const ID_POINTERS: &[&str] = &[
    "/id",
    "/task_id",
    "/generation_id",
    "/data/id",
    "/data/task_id",
    "/data/0/id",
];

const THUMBNAIL_POINTERS: &[&str] = &[
    "/thumbnail_url",
    "/cover_url",
    "/thumbnail",
    "/data/thumbnail_url",
    "/data/cover_url",
    "/result/videos/0/cover_url",
    "/result/videos/0/thumbnail_url",
    "/data/result/videos/0/cover_url",
];

const STATUS_POINTERS: &[&str] = &["/status", "/state", "/data/status", "/data/state"];

const PROGRESS_POINTERS: &[&str] = &["/progress", "/data/progress", "/percent"];

const ERROR_POINTERS: &[&str] = &[
    "/error/message",
    "/error",
    "/fail_reason",
    "/failure_reason",
    "/message",
    "/data/error",
    "/data/fail_reason",
];

/// First non-empty string found at any of `pointers`.
pub fn first_str(value: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|p| match value.pointer(p) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn first_progress(value: &Value) -> Option<i64> {
    PROGRESS_POINTERS.iter().find_map(|p| match value.pointer(p)? {
        Value::Number(n) => n.as_f64().map(|f| f.round() as i64),
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    })
}

fn default_format(generation_type: GenerationType) -> &'static str {
    match generation_type {
        GenerationType::Image => "png",
        GenerationType::Video => "mp4",
    }
}

/// Build a [`NormalizedResult`] from a finished upstream payload.
///
/// `known_id` is used when the payload itself carries no id (the id was
/// returned at submission). A payload with no media URL is a permanent
/// failure: the upstream claims success but produced nothing usable.
pub fn normalize_result(
    payload: &Value,
    generation_type: GenerationType,
    known_id: Option<&str>,
) -> Result<NormalizedResult, ProviderError> {
    let remote_url = first_str(payload, URL_POINTERS).ok_or_else(|| {
        ProviderError::PermanentFailure("upstream reported success without a media URL".into())
    })?;

    let generation_id = first_str(payload, ID_POINTERS)
        .or_else(|| known_id.map(str::to_string))
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let format = first_str(payload, &["/format", "/data/format", "/output_format"])
        .map(|f| f.to_ascii_lowercase())
        .or_else(|| extension_from_url(&remote_url))
        .unwrap_or_else(|| default_format(generation_type).to_string());

    Ok(NormalizedResult {
        remote_url,
        local_path: None,
        generation_id,
        format,
        thumbnail_url: first_str(payload, THUMBNAIL_POINTERS),
        metadata: Some(payload.clone()),
    })
}

/// Classify an upstream status payload.
pub fn parse_status(
    payload: &Value,
    generation_type: GenerationType,
    known_id: &str,
) -> Result<PollStatus, ProviderError> {
    let status = first_str(payload, STATUS_POINTERS)
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();

    match status.as_str() {
        "completed" | "complete" | "succeeded" | "success" | "done" | "finished" => {
            normalize_result(payload, generation_type, Some(known_id)).map(PollStatus::Completed)
        }
        "failed" | "failure" | "error" | "cancelled" | "canceled" | "rejected" => {
            let reason = first_str(payload, ERROR_POINTERS)
                .unwrap_or_else(|| format!("upstream status '{status}'"));
            Ok(PollStatus::Failed(reason))
        }
        _ => Ok(PollStatus::Pending {
            progress: first_progress(payload),
        }),
    }
}

/// Parse a response body as JSON. HTML error pages and truncated bodies
/// are transient: the next poll may well get a real answer.
pub fn parse_body(body: &str) -> Result<Value, ProviderError> {
    serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(80).collect();
        ProviderError::Transient(format!("non-JSON response ({e}): {preview}"))
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn openai_style_data_array() {
        let payload = json!({"created": 1, "data": [{"url": "https://cdn.x/a.png"}]});
        let r = normalize_result(&payload, GenerationType::Image, Some("gen-1")).unwrap();
        assert_eq!(r.remote_url, "https://cdn.x/a.png");
        assert_eq!(r.generation_id, "gen-1");
        assert_eq!(r.format, "png");
    }

    #[test]
    fn nested_video_result_with_cover() {
        let payload = json!({
            "task_id": "t-9",
            "status": "succeeded",
            "result": {"videos": [{"url": "https://cdn.x/v.webm?sig=1", "cover_url": "https://cdn.x/c.jpg"}]}
        });
        let r = normalize_result(&payload, GenerationType::Video, None).unwrap();
        assert_eq!(r.generation_id, "t-9");
        assert_eq!(r.format, "webm");
        assert_eq!(r.thumbnail_url.as_deref(), Some("https://cdn.x/c.jpg"));
    }

    #[test]
    fn missing_url_is_permanent_failure() {
        assert_matches!(
            normalize_result(&json!({"id": "x"}), GenerationType::Image, None),
            Err(ProviderError::PermanentFailure(_))
        );
    }

    #[test]
    fn format_falls_back_to_type_default() {
        let payload = json!({"video_url": "https://cdn.x/stream"});
        let r = normalize_result(&payload, GenerationType::Video, Some("g")).unwrap();
        assert_eq!(r.format, "mp4");
    }

    #[test]
    fn status_pending_with_string_progress() {
        let status = parse_status(&json!({"data": {"status": "running", "progress": "45%"}}), GenerationType::Video, "g").unwrap();
        assert_eq!(status, PollStatus::Pending { progress: Some(45) });
    }

    #[test]
    fn status_failed_carries_reason() {
        let status = parse_status(
            &json!({"status": "FAILED", "error": {"message": "content policy"}}),
            GenerationType::Image,
            "g",
        )
        .unwrap();
        assert_eq!(status, PollStatus::Failed("content policy".into()));
    }

    #[test]
    fn status_completed_is_normalized() {
        let status = parse_status(
            &json!({"status": "completed", "output": {"url": "https://cdn.x/o.mp4"}}),
            GenerationType::Video,
            "g-7",
        )
        .unwrap();
        assert_matches!(status, PollStatus::Completed(r) if r.generation_id == "g-7");
    }

    #[test]
    fn html_body_is_transient() {
        assert_matches!(
            parse_body("<html><body>502 Bad Gateway</body></html>"),
            Err(ProviderError::Transient(_))
        );
    }
}
