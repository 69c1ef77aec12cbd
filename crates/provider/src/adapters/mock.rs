//! In-process provider for development and tests.
//!
//! Behaviour is scripted through [`MockBehavior`]; call counters let tests
//! assert how many submissions and polls the surrounding machinery made.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use lumora_core::generation::GenerationType;

use crate::error::ProviderError;
use crate::types::{JobHandle, NormalizedResult, PollStatus, ProviderRequest, Submission};
use crate::GenerationProvider;

const MOCK_HOST: &str = "https://mock.lumora.local";

/// Scripted outcome for a [`MockProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// `submit` returns the finished asset. Synchronous.
    Instant,
    /// Synchronous, but `submit` is rejected with a 400.
    RejectInstantly,
    /// `submit` returns a handle; polls report pending `pending_polls`
    /// times, then completed.
    Polled { pending_polls: u32 },
    /// Polls fail with unparseable bodies `garbled_polls` times, then complete.
    GarbledThenComplete { garbled_polls: u32 },
    /// Polls report pending `pending_polls` times, then an explicit failure.
    FailAfterPolls { pending_polls: u32 },
    /// Polls report pending forever.
    NeverFinishes,
    /// `submit` is rejected with a 400.
    RejectSubmission,
    /// `submit` fails transiently `times` times, then returns the asset.
    TransientSubmissions { times: u32 },
}

pub struct MockProvider {
    behavior: MockBehavior,
    submissions: AtomicU32,
    polls: AtomicU32,
}

impl MockProvider {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            submissions: AtomicU32::new(0),
            polls: AtomicU32::new(0),
        }
    }

    pub fn instant() -> Self {
        Self::new(MockBehavior::Instant)
    }

    pub fn behavior(&self) -> MockBehavior {
        self.behavior
    }

    /// Number of `submit` calls so far, including failed ones.
    pub fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Number of `poll_status` calls so far.
    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

/// Deterministic fake asset for `generation_id`.
pub fn mock_result(generation_type: GenerationType, generation_id: &str) -> NormalizedResult {
    let (dir, ext) = match generation_type {
        GenerationType::Image => ("images", "png"),
        GenerationType::Video => ("videos", "mp4"),
    };
    let thumbnail_url = match generation_type {
        GenerationType::Video => Some(format!("{MOCK_HOST}/thumbnails/{generation_id}.jpg")),
        GenerationType::Image => None,
    };
    NormalizedResult {
        remote_url: format!("{MOCK_HOST}/{dir}/{generation_id}.{ext}"),
        local_path: None,
        generation_id: generation_id.to_string(),
        format: ext.to_string(),
        thumbnail_url,
        metadata: Some(serde_json::json!({ "provider": "mock" })),
    }
}

#[async_trait]
impl GenerationProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_synchronous(&self) -> bool {
        matches!(
            self.behavior,
            MockBehavior::Instant | MockBehavior::RejectInstantly
        )
    }

    async fn submit(&self, request: &ProviderRequest) -> Result<Submission, ProviderError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        let generation_id = format!("mock-{n}");

        match self.behavior {
            MockBehavior::Instant => Ok(Submission::Ready(mock_result(
                request.generation_type,
                &generation_id,
            ))),
            MockBehavior::RejectSubmission | MockBehavior::RejectInstantly => Err(ProviderError::Upstream {
                status: Some(400),
                message: "prompt rejected by mock".into(),
            }),
            MockBehavior::TransientSubmissions { times } if n <= times => {
                Err(ProviderError::Transient(format!("mock outage {n}/{times}")))
            }
            MockBehavior::TransientSubmissions { .. } => Ok(Submission::Ready(mock_result(
                request.generation_type,
                &generation_id,
            ))),
            MockBehavior::Polled { .. }
            | MockBehavior::GarbledThenComplete { .. }
            | MockBehavior::FailAfterPolls { .. }
            | MockBehavior::NeverFinishes => Ok(Submission::Pending(JobHandle {
                generation_id,
                generation_type: request.generation_type,
            })),
        }
    }

    async fn poll_status(&self, handle: &JobHandle) -> Result<PollStatus, ProviderError> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        let done = || {
            PollStatus::Completed(mock_result(handle.generation_type, &handle.generation_id))
        };

        match self.behavior {
            MockBehavior::Polled { pending_polls } if n <= pending_polls => {
                Ok(PollStatus::Pending {
                    progress: Some(i64::from(n * 100 / (pending_polls + 1))),
                })
            }
            MockBehavior::GarbledThenComplete { garbled_polls } if n <= garbled_polls => Err(
                ProviderError::Transient("non-JSON response: <html>gateway</html>".into()),
            ),
            MockBehavior::FailAfterPolls { pending_polls } if n <= pending_polls => {
                Ok(PollStatus::Pending { progress: None })
            }
            MockBehavior::FailAfterPolls { .. } => {
                Ok(PollStatus::Failed("content policy violation".into()))
            }
            MockBehavior::NeverFinishes => Ok(PollStatus::Pending { progress: Some(10) }),
            _ => Ok(done()),
        }
    }

    async fn enhance_prompt(&self, prompt: &str) -> Result<String, ProviderError> {
        Ok(format!(
            "{}, highly detailed, dramatic lighting, sharp focus",
            prompt.trim()
        ))
    }
}
