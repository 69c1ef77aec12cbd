//! Local media cache: downloading finished assets and finding them again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use lumora_core::delivery::{
    cache_candidates, cache_file_path, extension_from_url, placeholder_thumbnail_png, MediaKind,
    PLACEHOLDER_HEIGHT, PLACEHOLDER_WIDTH,
};
use lumora_core::error::CoreError;
use lumora_core::generation::GenerationType;
use lumora_core::job::GenerationJob;
use lumora_core::status::JobStatus;
use lumora_core::store::JobStore;
use lumora_core::types::DbId;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Download failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Cache write failed: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// Writes remote assets under `media_dir/{images,videos,thumbnails}`.
#[derive(Clone)]
pub struct MediaCache {
    client: reqwest::Client,
    media_dir: PathBuf,
}

impl MediaCache {
    pub fn new(media_dir: PathBuf) -> Self {
        Self {
            client: reqwest::Client::new(),
            media_dir,
        }
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Stream `url` into the cache as `{stem}.{ext}`.
    ///
    /// The body goes to a `.part` file first and is renamed into place, so
    /// a reader never sees a truncated asset.
    pub async fn download(
        &self,
        kind: MediaKind,
        stem: &str,
        url: &str,
        format: Option<&str>,
    ) -> Result<PathBuf, MediaError> {
        let ext = format
            .map(str::to_ascii_lowercase)
            .filter(|f| kind.extensions().contains(&f.as_str()))
            .or_else(|| extension_from_url(url))
            .unwrap_or_else(|| kind.default_extension().to_string());
        let path = cache_file_path(&self.media_dir, kind, stem, &ext);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self.client.get(url).send().await?.error_for_status()?;
        let partial = path.with_extension(format!("{ext}.part"));
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(e.into());
                }
            };
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, &path).await?;

        Ok(path)
    }

    /// Best-effort caching after a job completes. Failures only cost a
    /// proxied read later.
    pub async fn cache_job_assets(
        &self,
        jobs: &dyn JobStore,
        job_id: DbId,
        generation_type: GenerationType,
        remote_url: &str,
        format: Option<&str>,
        thumbnail_url: Option<&str>,
    ) {
        let stem = job_id.to_string();
        let kind = MediaKind::for_generation(generation_type);
        match self.download(kind, &stem, remote_url, format).await {
            Ok(path) => {
                let path = path.to_string_lossy();
                if let Err(e) = jobs.record_local_path(job_id, &path).await {
                    tracing::warn!(job_id, error = %e, "Failed to record cached path");
                } else {
                    tracing::debug!(job_id, path = %path, "Asset cached");
                }
            }
            Err(e) => tracing::warn!(job_id, error = %e, "Asset download failed"),
        }

        if let Some(url) = thumbnail_url {
            if let Err(e) = self
                .download(MediaKind::VideoThumbnail, &stem, url, None)
                .await
            {
                tracing::warn!(job_id, error = %e, "Thumbnail download failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Where the bytes for a delivery request come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Local { path: PathBuf, size: u64 },
    /// Proxy from the provider.
    Remote { url: String },
    /// Generated PNG, only for thumbnails.
    Placeholder(Vec<u8>),
}

/// Finds the best source for a job's media.
///
/// Order for images and videos: the recorded `local_file_path`, then the
/// deterministic cache candidates (repairing the record on a hit), then the
/// provider URL. Thumbnails never 404: the last resort is a placeholder.
#[derive(Clone)]
pub struct MediaResolver {
    jobs: Arc<dyn JobStore>,
    media_dir: PathBuf,
}

impl MediaResolver {
    pub fn new(jobs: Arc<dyn JobStore>, media_dir: PathBuf) -> Self {
        Self { jobs, media_dir }
    }

    pub async fn resolve(
        &self,
        job: &GenerationJob,
        kind: MediaKind,
    ) -> Result<Option<MediaSource>, CoreError> {
        match kind {
            MediaKind::VideoThumbnail => self.resolve_thumbnail(job).await.map(Some),
            MediaKind::Image | MediaKind::Video => Ok(self.resolve_asset(job, kind).await),
        }
    }

    async fn resolve_asset(&self, job: &GenerationJob, kind: MediaKind) -> Option<MediaSource> {
        if job.status != JobStatus::Completed {
            return None;
        }

        if let Some(recorded) = job.local_file_path.as_deref() {
            if let Some(source) = local_file(Path::new(recorded)).await {
                return Some(source);
            }
        }

        let hit = self.find_cached(job, kind).await;
        if let Some(MediaSource::Local { ref path, .. }) = hit {
            self.repair_local_path(job.id, path).await;
            return hit;
        }

        job.remote_url
            .clone()
            .map(|url| MediaSource::Remote { url })
    }

    async fn resolve_thumbnail(&self, job: &GenerationJob) -> Result<MediaSource, CoreError> {
        if job.status == JobStatus::Completed {
            if let Some(hit) = self.find_cached(job, MediaKind::VideoThumbnail).await {
                return Ok(hit);
            }
            if let Some(url) = job.thumbnail_url.clone() {
                return Ok(MediaSource::Remote { url });
            }
        }
        placeholder_thumbnail_png(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT)
            .map(MediaSource::Placeholder)
            .map_err(|e| CoreError::Internal(format!("placeholder thumbnail: {e}")))
    }

    async fn find_cached(&self, job: &GenerationJob, kind: MediaKind) -> Option<MediaSource> {
        let id = job.id.to_string();
        let mut stems = vec![id.as_str()];
        if let Some(generation_id) = job.generation_id.as_deref() {
            stems.push(generation_id);
        }
        for candidate in cache_candidates(&self.media_dir, kind, &stems) {
            if let Some(source) = local_file(&candidate).await {
                return Some(source);
            }
        }
        None
    }

    /// Write a rediscovered cache path back onto the job. Failing to do so
    /// only means the next read searches again.
    async fn repair_local_path(&self, job_id: DbId, path: &Path) {
        let path = path.to_string_lossy();
        match self.jobs.record_local_path(job_id, &path).await {
            Ok(_) => tracing::debug!(job_id, path = %path, "Repaired cached path"),
            Err(e) => tracing::warn!(job_id, error = %e, "Failed to repair cached path"),
        }
    }
}

async fn local_file(path: &Path) -> Option<MediaSource> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    meta.is_file().then(|| MediaSource::Local {
        path: path.to_path_buf(),
        size: meta.len(),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use lumora_core::job::{CompletionPath, JobCompletion, NewGenerationJob};
    use uuid::Uuid;

    use super::*;
    use crate::memory::InMemoryStore;

    async fn completed_job(store: &InMemoryStore, generation_type: GenerationType) -> GenerationJob {
        let job = store
            .create(NewGenerationJob {
                user_id: 1,
                generation_type,
                prompt: "lighthouse".into(),
                model_id: "flux-schnell".into(),
                aspect_ratio: None,
                duration_secs: None,
                cost_charged: 5,
                used_free_tier: false,
                watermark: false,
                reservation_id: Uuid::now_v7(),
            })
            .await
            .unwrap();
        let completion = JobCompletion {
            generation_id: "gen-42".into(),
            remote_url: "https://cdn.example.com/out/gen-42.png".into(),
            thumbnail_url: None,
            ..Default::default()
        };
        store
            .complete(job.id, &completion, CompletionPath::Synchronous)
            .await
            .unwrap();
        store.find(job.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn falls_back_to_remote_when_nothing_cached() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new(3));
        let job = completed_job(&store, GenerationType::Image).await;
        let resolver = MediaResolver::new(store.clone(), dir.path().to_path_buf());

        let source = resolver.resolve(&job, MediaKind::Image).await.unwrap();
        assert_eq!(
            source,
            Some(MediaSource::Remote {
                url: "https://cdn.example.com/out/gen-42.png".into()
            })
        );
    }

    #[tokio::test]
    async fn cache_hit_by_generation_id_repairs_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new(3));
        let job = completed_job(&store, GenerationType::Image).await;
        let images = dir.path().join("images");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::write(images.join("gen-42.webp"), b"webp-bytes").unwrap();
        let resolver = MediaResolver::new(store.clone(), dir.path().to_path_buf());

        let source = resolver.resolve(&job, MediaKind::Image).await.unwrap();

        assert_matches!(source, Some(MediaSource::Local { size: 10, .. }));
        let repaired = store.find(job.id).await.unwrap().unwrap();
        assert!(repaired
            .local_file_path
            .as_deref()
            .is_some_and(|p| p.ends_with("gen-42.webp")));
    }

    #[tokio::test]
    async fn pending_job_has_no_asset() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new(3));
        let job = store
            .create(NewGenerationJob {
                user_id: 1,
                generation_type: GenerationType::Image,
                prompt: "p".into(),
                model_id: "flux-schnell".into(),
                aspect_ratio: None,
                duration_secs: None,
                cost_charged: 5,
                used_free_tier: false,
                watermark: false,
                reservation_id: Uuid::now_v7(),
            })
            .await
            .unwrap();
        let resolver = MediaResolver::new(store.clone(), dir.path().to_path_buf());

        assert_eq!(resolver.resolve(&job, MediaKind::Image).await.unwrap(), None);
    }

    #[tokio::test]
    async fn thumbnail_falls_back_to_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new(3));
        let job = completed_job(&store, GenerationType::Video).await;
        let resolver = MediaResolver::new(store.clone(), dir.path().to_path_buf());

        let source = resolver
            .resolve(&job, MediaKind::VideoThumbnail)
            .await
            .unwrap();
        assert_matches!(source, Some(MediaSource::Placeholder(bytes)) => {
            assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        });
    }
}
