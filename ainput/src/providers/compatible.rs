//! OpenAI-compatible `/v1/chat/completions` provider, shared by the `openai`,
//! `openrouter` and `custom` profile kinds.

use super::{MAX_OUTPUT_TOKENS, Provider, TEMPERATURE, VendorError, read_body, sse};
use crate::error::{ApiError, ConfigError};
use crate::types::*;
use crate::usage::estimate_tokens;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Attribution headers sent to hosted gateways (OpenRouter ranks apps by them).
pub const ATTRIBUTION_REFERER: &str = "https://github.com/stonega/ainput";
pub const ATTRIBUTION_TITLE: &str = "AInput";

pub struct OpenAiCompatibleProvider {
    client: Client,
}

impl OpenAiCompatibleProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn chat_completions_url(profile: &ModelProfile) -> Result<String, ConfigError> {
        let base = profile
            .effective_base_url()
            .ok_or_else(|| ConfigError::MissingBaseUrl {
                profile: profile.name.clone(),
            })?;
        Ok(format!("{}/v1/chat/completions", base))
    }

    fn build_request(
        &self,
        profile: &ModelProfile,
        body: &ChatRequest,
    ) -> Result<reqwest::RequestBuilder, ApiError> {
        let url = Self::chat_completions_url(profile).map_err(|_| ApiError::MissingEndpoint)?;
        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", profile.api_key));
        // Some self-hosted gateways reject unknown headers.
        if profile.provider_kind != ProviderKind::Custom {
            req = req
                .header("HTTP-Referer", ATTRIBUTION_REFERER)
                .header("X-Title", ATTRIBUTION_TITLE);
        }
        Ok(req.json(body))
    }
}

impl Default for OpenAiCompatibleProvider {
    fn default() -> Self {
        Self::new()
    }
}

// ---- Request/response types (OpenAI wire format) ----
#[derive(Serialize)]
struct ChatRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<ChatMsg>,
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct ChatMsg {
    role: &'static str,
    content: String,
}

fn chat_request(prompt: &str, model: Option<String>, stream: bool) -> ChatRequest {
    ChatRequest {
        model,
        messages: vec![ChatMsg {
            role: "user",
            content: prompt.to_string(),
        }],
        temperature: TEMPERATURE,
        max_tokens: MAX_OUTPUT_TOKENS,
        stream,
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<UsageResp>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageResp>,
}

#[derive(Deserialize)]
struct ChatMessageResp {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<UsageResp>,
    error: Option<VendorError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Option<DeltaContent>,
}

#[derive(Deserialize)]
struct DeltaContent {
    content: Option<String>,
}

#[derive(Deserialize)]
struct UsageResp {
    total_tokens: Option<u64>,
}

/// Model string recorded for usage; custom gateways may run without one.
fn recorded_model(profile: &ModelProfile, model: &Option<String>) -> String {
    model
        .clone()
        .unwrap_or_else(|| profile.provider_kind.as_str().to_string())
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    async fn invoke(&self, prompt: &str, profile: &ModelProfile) -> Result<Completion, ApiError> {
        let model = profile.effective_model();
        let body = chat_request(prompt, model.clone(), false);

        let resp = self
            .build_request(profile, &body)?
            .send()
            .await
            .map_err(ApiError::network)?;

        let raw = read_body(resp, &profile.api_key, false).await?;
        let chat_resp: ChatResponse =
            serde_json::from_str(&raw).map_err(|_| ApiError::EmptyResponse)?;

        let text = chat_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::EmptyResponse)?;

        Ok(Completion {
            text,
            tokens_used: chat_resp.usage.and_then(|u| u.total_tokens),
            model: recorded_model(profile, &model),
        })
    }

    fn stream(
        &self,
        prompt: &str,
        profile: &ModelProfile,
    ) -> BoxStream<'static, Result<ProviderEvent, ApiError>> {
        let model = profile.effective_model();
        let body = chat_request(prompt, model.clone(), true);
        let req = match self.build_request(profile, &body) {
            Ok(r) => r,
            Err(e) => return Box::pin(stream::once(async move { Err::<ProviderEvent, ApiError>(e) })),
        };
        let api_key = profile.api_key.clone();
        let prompt = prompt.to_string();
        let model_id = recorded_model(profile, &model);

        let s = async_stream::stream! {
            let resp = match req.send().await {
                Ok(r) => r,
                Err(e) => { yield Err(ApiError::network(e)); return; }
            };
            let status = resp.status();
            if !status.is_success() {
                let err = read_body(resp, &api_key, false)
                    .await
                    .err()
                    .unwrap_or(ApiError::HttpFailure { status: status.as_u16() });
                yield Err(err);
                return;
            }

            let mut text_buf = String::new();
            let mut reported_tokens = None;
            let mut payloads = sse::data_payloads(resp);

            // Completion is the end of the body; `[DONE]` never reaches here.
            while let Some(payload) = payloads.next().await {
                let data = match payload {
                    Ok(d) => d,
                    Err(e) => { yield Err(e); return; }
                };
                let chunk: StreamChunk = match serde_json::from_str(&data) {
                    Ok(c) => c,
                    Err(err) => {
                        tracing::trace!(%err, "skipping unparseable SSE line");
                        continue;
                    }
                };
                if let Some(err) = chunk.error {
                    yield Err(err.into_api_error(&api_key, false));
                    return;
                }
                if let Some(total) = chunk.usage.and_then(|u| u.total_tokens) {
                    reported_tokens = Some(total);
                }
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.and_then(|d| d.content) {
                        if !content.is_empty() {
                            text_buf.push_str(&content);
                            yield Ok(ProviderEvent::TextDelta(content));
                        }
                    }
                }
            }

            if text_buf.is_empty() {
                yield Err(ApiError::EmptyResponse);
                return;
            }

            // Streams from this family rarely carry usage; approximate it.
            let tokens_used = reported_tokens.unwrap_or_else(|| estimate_tokens(&prompt, &text_buf));
            yield Ok(ProviderEvent::Done(Completion {
                text: text_buf,
                tokens_used: Some(tokens_used),
                model: model_id,
            }));
        };
        Box::pin(s)
    }
}
