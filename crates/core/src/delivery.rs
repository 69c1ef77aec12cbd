//! Media delivery helpers: byte ranges, content types, local cache layout,
//! and the placeholder thumbnail.

use std::path::{Path, PathBuf};

use crate::generation::GenerationType;

// ---------------------------------------------------------------------------
// Cache layout
// ---------------------------------------------------------------------------

/// Extensions searched for cached images, in priority order.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];
/// Extensions searched for cached videos, in priority order.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov"];
/// Extensions searched for cached thumbnails, in priority order.
pub const THUMBNAIL_EXTENSIONS: &[&str] = &["jpg", "png", "webp"];

/// What a delivery request is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    VideoThumbnail,
}

impl MediaKind {
    pub fn for_generation(generation_type: GenerationType) -> Self {
        match generation_type {
            GenerationType::Image => MediaKind::Image,
            GenerationType::Video => MediaKind::Video,
        }
    }

    /// Subdirectory of the media root this kind is cached under.
    pub fn cache_dir(self) -> &'static str {
        match self {
            MediaKind::Image => "images",
            MediaKind::Video => "videos",
            MediaKind::VideoThumbnail => "thumbnails",
        }
    }

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            MediaKind::Image => IMAGE_EXTENSIONS,
            MediaKind::Video => VIDEO_EXTENSIONS,
            MediaKind::VideoThumbnail => THUMBNAIL_EXTENSIONS,
        }
    }

    pub fn default_extension(self) -> &'static str {
        self.extensions()[0]
    }
}

/// Path a freshly downloaded asset is written to.
pub fn cache_file_path(media_dir: &Path, kind: MediaKind, stem: &str, ext: &str) -> PathBuf {
    media_dir.join(kind.cache_dir()).join(format!("{stem}.{ext}"))
}

/// Deterministic list of paths a cached asset may live at.
///
/// Every stem is tried with every extension of `kind`, stems first. Callers
/// pass the job id and, when known, the upstream generation id.
pub fn cache_candidates(media_dir: &Path, kind: MediaKind, stems: &[&str]) -> Vec<PathBuf> {
    let mut out = Vec::with_capacity(stems.len() * kind.extensions().len());
    for stem in stems.iter().filter(|s| !s.is_empty()) {
        for ext in kind.extensions() {
            let path = cache_file_path(media_dir, kind, stem, ext);
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
    out
}

/// File extension of a URL path, ignoring query string and fragment.
pub fn extension_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or("");
    let last = path.rsplit('/').next().unwrap_or("");
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Guess a Content-Type from a file extension.
pub fn content_type_for_extension(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// `Content-Disposition` value forcing a download with `filename`.
pub fn attachment_disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .filter(|c| !matches!(c, '"' | '\\' | '\r' | '\n'))
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

// ---------------------------------------------------------------------------
// Byte ranges
// ---------------------------------------------------------------------------

/// A parsed `Range: bytes=...` specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-` or `bytes=start-end`.
    From { start: u64, end: Option<u64> },
    /// `bytes=-n`: the final `n` bytes.
    Suffix(u64),
}

/// Parse a single-range `Range` header. Multi-range requests return `None`
/// and are served in full.
pub fn parse_range_header(value: &str) -> Option<ByteRange> {
    let spec = value.trim().strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        let n = end.parse::<u64>().ok()?;
        return Some(ByteRange::Suffix(n));
    }

    let start = start.parse::<u64>().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse::<u64>().ok()?)
    };
    Some(ByteRange::From { start, end })
}

/// Inclusive byte span to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub end: u64,
}

impl ResolvedRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Content-Range` header value for a file of `total` bytes.
    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{total}", self.start, self.end)
    }
}

impl ByteRange {
    /// Clamp against the file size. `None` means 416 Range Not Satisfiable.
    ///
    /// An open-ended range is capped at `max_chunk` bytes so a player's
    /// `bytes=0-` request does not pin one request to the whole file.
    pub fn resolve(self, file_size: u64, max_chunk: u64) -> Option<ResolvedRange> {
        if file_size == 0 {
            return None;
        }
        let last = file_size - 1;
        match self {
            ByteRange::From { start, end } => {
                if start > last {
                    return None;
                }
                let end = match end {
                    Some(e) if e < start => return None,
                    Some(e) => e.min(last),
                    None => start.saturating_add(max_chunk.max(1) - 1).min(last),
                };
                Some(ResolvedRange { start, end })
            }
            ByteRange::Suffix(0) => None,
            ByteRange::Suffix(n) => Some(ResolvedRange {
                start: file_size.saturating_sub(n),
                end: last,
            }),
        }
    }
}

/// `Content-Range` value for a 416 response.
pub fn unsatisfiable_content_range(file_size: u64) -> String {
    format!("bytes */{file_size}")
}

// ---------------------------------------------------------------------------
// Placeholder
// ---------------------------------------------------------------------------

pub const PLACEHOLDER_WIDTH: u32 = 320;
pub const PLACEHOLDER_HEIGHT: u32 = 180;

/// Encode a neutral grey PNG with a darker play-triangle, served when a
/// video thumbnail cannot be found anywhere.
pub fn placeholder_thumbnail_png(width: u32, height: u32) -> Result<Vec<u8>, image::ImageError> {
    let (cx, cy) = (width as i64 / 2, height as i64 / 2);
    let size = (height.min(width) / 4) as i64;

    let img = image::RgbImage::from_fn(width, height, |x, y| {
        let (dx, dy) = (x as i64 - cx + size / 3, y as i64 - cy);
        let inside = dx >= 0 && dx <= size && dy.abs() * 2 <= size - dx;
        if inside {
            image::Rgb([90, 90, 96])
        } else {
            image::Rgb([200, 200, 206])
        }
    });

    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)?;
    Ok(out.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_closed_open_and_suffix_ranges() {
        assert_eq!(
            parse_range_header("bytes=100-199"),
            Some(ByteRange::From {
                start: 100,
                end: Some(199)
            })
        );
        assert_eq!(
            parse_range_header("bytes=500-"),
            Some(ByteRange::From {
                start: 500,
                end: None
            })
        );
        assert_eq!(parse_range_header("bytes=-50"), Some(ByteRange::Suffix(50)));
    }

    #[test]
    fn rejects_malformed_and_multi_ranges() {
        assert_eq!(parse_range_header("items=0-1"), None);
        assert_eq!(parse_range_header("bytes=abc-"), None);
        assert_eq!(parse_range_header("bytes=0-1,5-9"), None);
    }

    #[test]
    fn closed_range_resolves_exactly() {
        let r = parse_range_header("bytes=100-199")
            .unwrap()
            .resolve(1000, 1 << 20)
            .unwrap();
        assert_eq!((r.start, r.end, r.len()), (100, 199, 100));
        assert_eq!(r.content_range(1000), "bytes 100-199/1000");
    }

    #[test]
    fn end_past_eof_is_clamped() {
        let r = ByteRange::From {
            start: 900,
            end: Some(5000),
        }
        .resolve(1000, 1 << 20)
        .unwrap();
        assert_eq!((r.start, r.end), (900, 999));
    }

    #[test]
    fn open_range_is_capped_by_chunk() {
        let r = ByteRange::From {
            start: 0,
            end: None,
        }
        .resolve(10_000, 4096)
        .unwrap();
        assert_eq!((r.start, r.end), (0, 4095));
    }

    #[test]
    fn suffix_range_takes_tail() {
        let r = ByteRange::Suffix(100).resolve(1000, 1 << 20).unwrap();
        assert_eq!((r.start, r.end), (900, 999));
        let r = ByteRange::Suffix(5000).resolve(1000, 1 << 20).unwrap();
        assert_eq!((r.start, r.end), (0, 999));
    }

    #[test]
    fn unsatisfiable_ranges() {
        let start_past_end = ByteRange::From {
            start: 1000,
            end: None,
        };
        assert_eq!(start_past_end.resolve(1000, 1 << 20), None);
        let inverted = ByteRange::From {
            start: 10,
            end: Some(5),
        };
        assert_eq!(inverted.resolve(1000, 1 << 20), None);
        assert_eq!(ByteRange::Suffix(10).resolve(0, 1 << 20), None);
        assert_eq!(unsatisfiable_content_range(1000), "bytes */1000");
    }

    #[test]
    fn candidates_are_deterministic_and_deduplicated() {
        let root = Path::new("/media");
        let c = cache_candidates(root, MediaKind::Video, &["42", "gen-abc", "42"]);
        assert_eq!(c.len(), 6);
        assert_eq!(c[0], PathBuf::from("/media/videos/42.mp4"));
        assert_eq!(c[1], PathBuf::from("/media/videos/42.webm"));
        assert_eq!(c[3], PathBuf::from("/media/videos/gen-abc.mp4"));
    }

    #[test]
    fn extension_from_url_ignores_query() {
        assert_eq!(
            extension_from_url("https://cdn.example.com/out/abc.MP4?sig=1.2"),
            Some("mp4".into())
        );
        assert_eq!(extension_from_url("https://cdn.example.com/out/abc"), None);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for_extension("a/b.webm"), "video/webm");
        assert_eq!(content_type_for_extension("a/b.JPG"), "image/jpeg");
        assert_eq!(content_type_for_extension("a/b"), "application/octet-stream");
    }

    #[test]
    fn attachment_strips_quotes() {
        assert_eq!(
            attachment_disposition("my\"clip.mp4"),
            "attachment; filename=\"myclip.mp4\""
        );
    }

    #[test]
    fn placeholder_is_a_png() {
        let png = placeholder_thumbnail_png(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
