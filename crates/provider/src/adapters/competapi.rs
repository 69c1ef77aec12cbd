//! REST client for the CompetAPI aggregation gateway.
//!
//! Images usually come back in the submission response. Videos are
//! accepted as tasks and polled at `GET /v1/videos/generations/{id}`.

use async_trait::async_trait;
use lumora_core::generation::GenerationType;
use serde_json::{json, Value};

use crate::adapters::{http_client, read_body};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::normalize::{first_str, normalize_result, parse_body, parse_status};
use crate::types::{JobHandle, PollStatus, ProviderRequest, Submission};
use crate::GenerationProvider;

#[derive(Debug)]
pub struct CompetApiProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    enhance_model: String,
}

fn collection(generation_type: GenerationType) -> &'static str {
    match generation_type {
        GenerationType::Image => "images",
        GenerationType::Video => "videos",
    }
}

impl CompetApiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::Validation("CompetAPI requires an API key".into()))?;
        Ok(Self {
            client: http_client(config.request_timeout)?,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key,
            enhance_model: config.enhance_model.clone(),
        })
    }

    fn generations_url(&self, generation_type: GenerationType) -> String {
        format!("{}/v1/{}/generations", self.api_url, collection(generation_type))
    }

    fn body_for(request: &ProviderRequest) -> Value {
        match request.generation_type {
            GenerationType::Image => json!({
                "model": request.model_id,
                "prompt": request.prompt,
                "aspect_ratio": request.aspect_ratio,
                "n": 1,
                "watermark": request.watermark,
            }),
            GenerationType::Video => json!({
                "model": request.model_id,
                "prompt": request.prompt,
                "aspect_ratio": request.aspect_ratio,
                "duration": request.duration_secs,
                "watermark": request.watermark,
            }),
        }
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ProviderError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        parse_body(&read_body(response).await?)
    }
}

#[async_trait]
impl GenerationProvider for CompetApiProvider {
    fn name(&self) -> &'static str {
        "competapi"
    }

    async fn submit(&self, request: &ProviderRequest) -> Result<Submission, ProviderError> {
        let payload = self
            .post_json(&self.generations_url(request.generation_type), &Self::body_for(request))
            .await?;

        // A submission that already carries an asset is finished.
        if let Ok(result) = normalize_result(&payload, request.generation_type, None) {
            return Ok(Submission::Ready(result));
        }

        let generation_id =
            first_str(&payload, &["/id", "/task_id", "/data/id", "/data/task_id"]).ok_or_else(
                || ProviderError::Upstream {
                    status: None,
                    message: "submission response carried neither an asset nor a task id".into(),
                },
            )?;

        tracing::debug!(
            provider = self.name(),
            generation_id = %generation_id,
            "Upstream accepted generation",
        );
        Ok(Submission::Pending(JobHandle {
            generation_id,
            generation_type: request.generation_type,
        }))
    }

    async fn poll_status(&self, handle: &JobHandle) -> Result<PollStatus, ProviderError> {
        let url = format!(
            "{}/{}",
            self.generations_url(handle.generation_type),
            handle.generation_id
        );
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let payload = parse_body(&read_body(response).await?)?;
        parse_status(&payload, handle.generation_type, &handle.generation_id)
    }

    async fn enhance_prompt(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = chat_enhance_body(&self.enhance_model, prompt);
        let payload = self
            .post_json(&format!("{}/v1/chat/completions", self.api_url), &body)
            .await?;
        chat_content(&payload)
    }
}

const ENHANCE_INSTRUCTIONS: &str = "Rewrite the user's prompt for an image or video \
    generation model. Add concrete detail about subject, composition, lighting and style. \
    Reply with the rewritten prompt only.";

/// OpenAI-compatible chat request used for prompt enhancement.
pub(crate) fn chat_enhance_body(model: &str, prompt: &str) -> Value {
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": ENHANCE_INSTRUCTIONS },
            { "role": "user", "content": prompt },
        ],
        "temperature": 0.7,
    })
}

/// First choice's message text from a chat completion.
pub(crate) fn chat_content(payload: &Value) -> Result<String, ProviderError> {
    first_str(payload, &["/choices/0/message/content"])
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ProviderError::Upstream {
            status: None,
            message: "chat completion carried no content".into(),
        })
}
