use super::{MAX_OUTPUT_TOKENS, Provider, TEMPERATURE, VendorError, read_body, sse};
use crate::error::ApiError;
use crate::types::*;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Generative AI (Gemini API key) provider.
pub struct GoogleProvider {
    client: Client,
    base_url: String,
}

impl GoogleProvider {
    pub fn new() -> Self {
        Self::with_base_url(GEMINI_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, model: &str, method: &str, api_key: &str) -> String {
        match method {
            "streamGenerateContent" => format!(
                "{}/models/{}:streamGenerateContent?alt=sse&key={}",
                self.base_url, model, api_key
            ),
            _ => format!("{}/models/{}:{}?key={}", self.base_url, model, method, api_key),
        }
    }
}

impl Default for GoogleProvider {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

/// Buffered calls are capped at [`MAX_OUTPUT_TOKENS`]; streaming calls are not.
fn request_body(prompt: &str, max_output_tokens: Option<u32>) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            parts: vec![Part {
                text: prompt.to_string(),
            }],
        }],
        generation_config: GenerationConfig {
            temperature: TEMPERATURE,
            max_output_tokens,
        },
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Shape of both the buffered response and each streamed chunk.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    error: Option<VendorError>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    total_token_count: Option<u64>,
}

impl GenerateContentResponse {
    fn parts(&self) -> &[ResponsePart] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
    }

    /// `candidates[0].content.parts[0].text`
    fn first_text(&self) -> Option<&str> {
        self.parts().first().and_then(|p| p.text.as_deref())
    }

    /// Every text part of the first candidate, joined.
    fn delta_text(&self) -> String {
        self.parts().iter().filter_map(|p| p.text.as_deref()).collect()
    }

    fn total_tokens(&self) -> Option<u64> {
        self.usage_metadata.as_ref().and_then(|u| u.total_token_count)
    }
}

fn model_for(profile: &ModelProfile) -> String {
    profile
        .effective_model()
        .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string())
}

// ---------------------------------------------------------------------------
// Provider impl
// ---------------------------------------------------------------------------

#[async_trait]
impl Provider for GoogleProvider {
    async fn invoke(&self, prompt: &str, profile: &ModelProfile) -> Result<Completion, ApiError> {
        let model = model_for(profile);
        let url = self.url(&model, "generateContent", &profile.api_key);
        let body = request_body(prompt, Some(MAX_OUTPUT_TOKENS));

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(ApiError::network)?;

        let raw = read_body(resp, &profile.api_key, true).await?;
        let gen_resp: GenerateContentResponse =
            serde_json::from_str(&raw).map_err(|_| ApiError::EmptyResponse)?;

        let text = gen_resp
            .first_text()
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::EmptyResponse)?;

        Ok(Completion {
            text: text.to_string(),
            tokens_used: gen_resp.total_tokens(),
            model,
        })
    }

    fn stream(
        &self,
        prompt: &str,
        profile: &ModelProfile,
    ) -> BoxStream<'static, Result<ProviderEvent, ApiError>> {
        let model = model_for(profile);
        let url = self.url(&model, "streamGenerateContent", &profile.api_key);
        let body = request_body(prompt, None);
        let client = self.client.clone();
        let api_key = profile.api_key.clone();

        let s = async_stream::stream! {
            let resp = match client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    yield Err(ApiError::network(e));
                    return;
                }
            };

            let status = resp.status();
            if !status.is_success() {
                let err = read_body(resp, &api_key, true)
                    .await
                    .err()
                    .unwrap_or(ApiError::HttpFailure { status: status.as_u16() });
                yield Err(err);
                return;
            }

            let mut text_buf = String::new();
            let mut tokens_used = None;
            let mut payloads = sse::data_payloads(resp);

            while let Some(payload) = payloads.next().await {
                let data = match payload {
                    Ok(d) => d,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                // A partial or garbled line is not fatal.
                let mut chunk: GenerateContentResponse = match serde_json::from_str(&data) {
                    Ok(c) => c,
                    Err(err) => {
                        tracing::trace!(%err, "skipping unparseable SSE line");
                        continue;
                    }
                };

                if let Some(err) = chunk.error.take() {
                    yield Err(err.into_api_error(&api_key, true));
                    return;
                }

                // Only the last chunk carries usage.
                if let Some(total) = chunk.total_tokens() {
                    tokens_used = Some(total);
                }

                let delta = chunk.delta_text();
                if !delta.is_empty() {
                    text_buf.push_str(&delta);
                    yield Ok(ProviderEvent::TextDelta(delta));
                }
            }

            if text_buf.is_empty() {
                yield Err(ApiError::EmptyResponse);
                return;
            }

            yield Ok(ProviderEvent::Done(Completion {
                text: text_buf,
                tokens_used,
                model,
            }));
        };

        Box::pin(s)
    }
}
