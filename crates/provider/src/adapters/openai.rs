//! OpenAI Images API adapter. Image generation only.

use async_trait::async_trait;
use lumora_core::generation::GenerationType;
use serde_json::{json, Value};

use crate::adapters::competapi::{chat_content, chat_enhance_body};
use crate::adapters::{http_client, read_body};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::normalize::{normalize_result, parse_body};
use crate::types::{JobHandle, PollStatus, ProviderRequest, Submission};
use crate::GenerationProvider;

const DEFAULT_API_URL: &str = "https://api.openai.com";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    enhance_model: String,
}

/// Closest supported output size for an aspect ratio.
fn size_for(aspect_ratio: &str) -> &'static str {
    match aspect_ratio {
        "16:9" | "3:2" | "4:3" | "21:9" => "1536x1024",
        "9:16" | "2:3" | "3:4" => "1024x1536",
        _ => "1024x1024",
    }
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::Validation("OpenAI requires an API key".into()))?;
        // The shared default points at CompetAPI; fall back to OpenAI's own host.
        let api_url = if config.api_url == ProviderConfig::default().api_url {
            DEFAULT_API_URL.to_string()
        } else {
            config.api_url.trim_end_matches('/').to_string()
        };
        Ok(Self {
            client: http_client(config.request_timeout)?,
            api_url,
            api_key,
            enhance_model: config.enhance_model.clone(),
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ProviderError> {
        let response = self
            .client
            .post(format!("{}{path}", self.api_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        parse_body(&read_body(response).await?)
    }
}

#[async_trait]
impl GenerationProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn submit(&self, request: &ProviderRequest) -> Result<Submission, ProviderError> {
        if request.generation_type != GenerationType::Image {
            return Err(ProviderError::Validation(
                "the OpenAI provider only generates images".into(),
            ));
        }

        let body = json!({
            "model": request.model_id,
            "prompt": request.prompt,
            "n": 1,
            "size": size_for(&request.aspect_ratio),
            "response_format": "url",
        });
        let payload = self.post_json("/v1/images/generations", &body).await?;
        let generation_id = uuid::Uuid::new_v4().to_string();
        normalize_result(&payload, GenerationType::Image, Some(&generation_id))
            .map(Submission::Ready)
    }

    async fn poll_status(&self, handle: &JobHandle) -> Result<PollStatus, ProviderError> {
        Err(ProviderError::Validation(format!(
            "OpenAI image generations are not pollable ({})",
            handle.generation_id
        )))
    }

    async fn enhance_prompt(&self, prompt: &str) -> Result<String, ProviderError> {
        let payload = self
            .post_json(
                "/v1/chat/completions",
                &chat_enhance_body(&self.enhance_model, prompt),
            )
            .await?;
        chat_content(&payload)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::config::ProviderKind;

    fn config() -> ProviderConfig {
        ProviderConfig {
            kind: ProviderKind::OpenAi,
            api_key: Some("sk-test".into()),
            ..Default::default()
        }
    }

    #[test]
    fn maps_aspect_ratio_to_size() {
        assert_eq!(size_for("16:9"), "1536x1024");
        assert_eq!(size_for("9:16"), "1024x1536");
        assert_eq!(size_for("1:1"), "1024x1024");
    }

    #[test]
    fn default_url_is_openai() {
        let provider = OpenAiProvider::new(&config()).unwrap();
        assert_eq!(provider.api_url, DEFAULT_API_URL);
    }

    #[tokio::test]
    async fn video_is_rejected_before_any_request() {
        let provider = OpenAiProvider::new(&config()).unwrap();
        let request = ProviderRequest {
            generation_type: GenerationType::Video,
            prompt: "waves".into(),
            model_id: "gpt-image-1".into(),
            aspect_ratio: "16:9".into(),
            duration_secs: Some(5),
            watermark: false,
        };
        assert_matches!(
            provider.submit(&request).await,
            Err(ProviderError::Validation(_))
        );
    }
}
