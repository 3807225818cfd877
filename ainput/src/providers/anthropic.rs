use super::{MAX_OUTPUT_TOKENS, Provider, read_body};
use crate::error::ApiError;
use crate::types::*;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API. Buffered only; see [`Provider::stream`] below.
#[derive(Clone)]
pub struct AnthropicProvider {
    client: Client,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    async fn send(&self, prompt: &str, profile: &ModelProfile) -> Result<Completion, ApiError> {
        let base = profile.effective_base_url().ok_or(ApiError::MissingEndpoint)?;
        let model = profile.effective_model().unwrap_or_default();
        let body = MessagesRequest {
            model: &model,
            max_tokens: MAX_OUTPUT_TOKENS,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let resp = self
            .client
            .post(format!("{}/v1/messages", base))
            .header("Content-Type", "application/json")
            .header("x-api-key", &profile.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::network)?;

        let raw = read_body(resp, &profile.api_key, false).await?;
        let msg_resp: MessagesResponse =
            serde_json::from_str(&raw).map_err(|_| ApiError::EmptyResponse)?;

        let text = msg_resp
            .content
            .into_iter()
            .next()
            .and_then(|b| b.text)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::EmptyResponse)?;

        Ok(Completion {
            text,
            tokens_used: msg_resp.usage.map(|u| u.input_tokens + u.output_tokens),
            model,
        })
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlockResp>,
    usage: Option<UsageData>,
}

#[derive(Deserialize)]
struct ContentBlockResp {
    text: Option<String>,
}

#[derive(Deserialize)]
struct UsageData {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn invoke(&self, prompt: &str, profile: &ModelProfile) -> Result<Completion, ApiError> {
        self.send(prompt, profile).await
    }

    /// No incremental decode: the buffered answer arrives as a single chunk.
    fn stream(
        &self,
        prompt: &str,
        profile: &ModelProfile,
    ) -> BoxStream<'static, Result<ProviderEvent, ApiError>> {
        let this = self.clone();
        let prompt = prompt.to_string();
        let profile = profile.clone();

        stream::once(async move { this.send(&prompt, &profile).await })
            .flat_map(|result| {
                let events = match result {
                    Ok(done) => vec![
                        Ok(ProviderEvent::TextDelta(done.text.clone())),
                        Ok(ProviderEvent::Done(done)),
                    ],
                    Err(e) => vec![Err(e)],
                };
                stream::iter(events)
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    fn profile(base_url: &str) -> ModelProfile {
        ModelProfile {
            id: "a1".into(),
            name: "Claude".into(),
            provider_kind: ProviderKind::Anthropic,
            api_key: "ant-test-key-0001".into(),
            base_url: Some(base_url.to_string()),
            model_string: Some("claude-test".into()),
        }
    }

    async fn mock_reply(server: &MockServer) {
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/v1/messages"))
            .and(matchers::header("x-api-key", "ant-test-key-0001"))
            .and(matchers::header("anthropic-version", ANTHROPIC_VERSION))
            .and(matchers::body_partial_json(json!({
                "model": "claude-test",
                "max_tokens": 2048,
                "messages": [{"role": "user", "content": "Hi"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "message",
                "content": [{"type": "text", "text": "Hello!"}],
                "usage": {"input_tokens": 4, "output_tokens": 3}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn buffered_call_reads_first_content_block() {
        let server = MockServer::start().await;
        mock_reply(&server).await;

        let out = AnthropicProvider::new().invoke("Hi", &profile(&server.uri())).await.unwrap();
        assert_eq!(out.text, "Hello!");
        assert_eq!(out.tokens_used, Some(7));
    }

    #[tokio::test]
    async fn streaming_delivers_one_chunk_then_done() {
        let server = MockServer::start().await;
        mock_reply(&server).await;

        let events: Vec<_> = AnthropicProvider::new()
            .stream("Hi", &profile(&server.uri()))
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], Ok(ProviderEvent::TextDelta("Hello!".into())));
        assert!(matches!(&events[1], Ok(ProviderEvent::Done(c)) if c.text == "Hello!"));
    }

    #[tokio::test]
    async fn error_body_is_vendor_rejection() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "type": "error",
                "error": {"type": "invalid_request_error", "message": "max_tokens: too large"}
            })))
            .mount(&server)
            .await;

        let err = AnthropicProvider::new()
            .invoke("Hi", &profile(&server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::VendorRejected { message: "max_tokens: too large".into() });
    }
}
