//! Single entry point for running an AI action against the active model.

use crate::error::{ConfigError, DispatchError, TransportError};
use crate::formfill::parse_form_values;
use crate::prompts::{Action, ActionRequest, build_prompt};
use crate::providers::{Provider, Providers};
use crate::registry::resolve_active_model;
use crate::settings::{Settings, SettingsStore};
use crate::types::{ModelProfile, ProviderEvent, UsageRecord, WireFormat};
use crate::usage::{UsageRecorder, estimate_tokens};
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Item yielded by a streaming dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// A non-empty fragment, in receive order.
    Chunk(String),
    /// Terminal; carries the full text.
    Done(String),
}

/// Result of a buffered action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ActionOutput {
    Text(String),
    Fields(BTreeMap<String, String>),
}

#[derive(Clone)]
pub struct Dispatcher {
    settings: SettingsStore,
    providers: Providers,
    usage: UsageRecorder,
}

impl Dispatcher {
    pub fn new(settings: SettingsStore, providers: Providers, usage: UsageRecorder) -> Self {
        Self {
            settings,
            providers,
            usage,
        }
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn usage(&self) -> &UsageRecorder {
        &self.usage
    }

    fn load_settings(&self) -> Result<Settings, DispatchError> {
        self.settings
            .load()
            .map_err(|e| DispatchError::Settings(format!("{e:#}")))
    }

    /// Active profile and the adapter that speaks its wire format.
    fn resolve(&self, settings: &Settings) -> Result<(ModelProfile, Arc<dyn Provider>), DispatchError> {
        let profile = resolve_active_model(&settings.registry)?;
        let provider = self.providers.for_kind(&profile.provider_kind)?;

        let needs_base_url = matches!(
            profile.provider_kind.wire_format(),
            Some(WireFormat::OpenAiCompatible | WireFormat::Anthropic)
        );
        if needs_base_url && profile.effective_base_url().is_none() {
            return Err(ConfigError::MissingBaseUrl {
                profile: profile.name.clone(),
            }
            .into());
        }

        tracing::debug!(
            profile = %profile.id,
            provider = %profile.provider_kind,
            model = profile.effective_model().as_deref().unwrap_or("-"),
            "resolved active model"
        );
        Ok((profile, provider))
    }

    fn record_usage(&self, kind: &str, model: String, tokens: u64) {
        self.usage.record(UsageRecord {
            date: Utc::now(),
            model_id: model,
            kind: kind.to_string(),
            tokens,
        });
    }

    /// Buffered call with an already-built prompt.
    pub async fn run(&self, prompt: &str, kind: &str) -> Result<String, DispatchError> {
        let settings = self.load_settings()?;
        self.run_with(&settings, prompt, kind).await
    }

    async fn run_with(&self, settings: &Settings, prompt: &str, kind: &str) -> Result<String, DispatchError> {
        let (profile, provider) = self.resolve(settings)?;
        tracing::debug!(kind, "dispatching buffered request");

        let completion = provider.invoke(prompt, &profile).await?;
        let tokens = completion
            .tokens_used
            .unwrap_or_else(|| estimate_tokens(prompt, &completion.text));
        self.record_usage(kind, completion.model, tokens);
        Ok(completion.text)
    }

    /// Streaming call. Yields chunks, then exactly one `Done` or one error.
    pub fn run_streaming(
        &self,
        prompt: &str,
        kind: &str,
    ) -> BoxStream<'static, Result<DispatchEvent, DispatchError>> {
        let this = self.clone();
        let prompt = prompt.to_string();
        let kind = kind.to_string();

        let s = async_stream::stream! {
            let settings = match this.load_settings() {
                Ok(s) => s,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let mut inner = this.stream_with(&settings, prompt, kind);
            while let Some(ev) = inner.next().await {
                yield ev;
            }
        };
        Box::pin(s)
    }

    fn stream_with(
        &self,
        settings: &Settings,
        prompt: String,
        kind: String,
    ) -> BoxStream<'static, Result<DispatchEvent, DispatchError>> {
        let resolved = self.resolve(settings);
        let this = self.clone();

        let s = async_stream::stream! {
            let (profile, provider) = match resolved {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            tracing::debug!(kind = %kind, "dispatching streaming request");

            let mut events = provider.stream(&prompt, &profile);
            let mut text = String::new();
            while let Some(event) = events.next().await {
                match event {
                    Ok(ProviderEvent::TextDelta(delta)) => {
                        if delta.is_empty() {
                            continue;
                        }
                        text.push_str(&delta);
                        yield Ok(DispatchEvent::Chunk(delta));
                    }
                    Ok(ProviderEvent::Done(completion)) => {
                        let tokens = completion
                            .tokens_used
                            .unwrap_or_else(|| estimate_tokens(&prompt, &text));
                        this.record_usage(&kind, completion.model, tokens);
                        yield Ok(DispatchEvent::Done(text));
                        return;
                    }
                    Err(e) => {
                        yield Err(e.into());
                        return;
                    }
                }
            }
            yield Err(TransportError::Disconnected.into());
        };
        Box::pin(s)
    }

    /// Drive a streaming call to completion, handing each chunk to `on_chunk`.
    pub async fn run_streaming_with(
        &self,
        prompt: &str,
        kind: &str,
        mut on_chunk: impl FnMut(&str),
    ) -> Result<String, DispatchError> {
        let mut events = self.run_streaming(prompt, kind);
        while let Some(event) = events.next().await {
            match event? {
                DispatchEvent::Chunk(c) => on_chunk(&c),
                DispatchEvent::Done(text) => return Ok(text),
            }
        }
        Err(TransportError::Disconnected.into())
    }

    /// Build the prompt for a UI request and run it buffered.
    pub async fn handle(&self, req: &ActionRequest) -> Result<ActionOutput, DispatchError> {
        let settings = self.load_settings()?;
        let (action, prompt) = build_prompt(req, settings.target_language.as_deref())?;
        let text = self.run_with(&settings, &prompt, action.as_str()).await?;

        if action == Action::AutoFillForm {
            return Ok(ActionOutput::Fields(parse_form_values(&text)?));
        }
        Ok(ActionOutput::Text(text))
    }

    /// Build the prompt for a UI request and stream it.
    pub fn handle_streaming(
        &self,
        req: &ActionRequest,
    ) -> BoxStream<'static, Result<DispatchEvent, DispatchError>> {
        let this = self.clone();
        let req = req.clone();

        let s = async_stream::stream! {
            let prepared = this.load_settings().and_then(|settings| {
                let (action, prompt) = build_prompt(&req, settings.target_language.as_deref())?;
                if action == Action::AutoFillForm {
                    return Err(DispatchError::NotStreamable(action.as_str()));
                }
                Ok((settings, action, prompt))
            });
            let (settings, action, prompt) = match prepared {
                Ok(p) => p,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let mut inner = this.stream_with(&settings, prompt, action.as_str().to_string());
            while let Some(ev) = inner.next().await {
                yield ev;
            }
        };
        Box::pin(s)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{ApiError, UsageError};
    use crate::types::{ProviderKind, UsagePage};
    use crate::usage::{SqliteUsageStore, UsageStore};
    use serde_json::json;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    pub(crate) struct Harness {
        pub _dir: tempfile::TempDir,
        pub server: MockServer,
        pub dispatcher: Dispatcher,
    }

    pub(crate) fn gemini_profile() -> ModelProfile {
        ModelProfile {
            id: "g1".into(),
            name: "Gemini".into(),
            provider_kind: ProviderKind::Gemini,
            api_key: "test-gemini-key".into(),
            base_url: None,
            model_string: None,
        }
    }

    pub(crate) async fn harness_with(store: Arc<dyn UsageStore>, profile: Option<ModelProfile>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::new(dir.path().join("settings.json"));
        if let Some(p) = profile {
            settings.add_profile(p).unwrap();
        }
        let server = MockServer::start().await;
        let providers = Providers::new().with_gemini_base_url(&server.uri());
        let dispatcher = Dispatcher::new(settings, providers, UsageRecorder::spawn(store));
        Harness {
            _dir: dir,
            server,
            dispatcher,
        }
    }

    pub(crate) async fn harness() -> Harness {
        harness_with(
            Arc::new(SqliteUsageStore::open_in_memory().unwrap()),
            Some(gemini_profile()),
        )
        .await
    }

    pub(crate) async fn mock_gemini_text(server: &MockServer, text: &str, tokens: u64) {
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/models/gemini-2.5-flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": text}]}}],
                "usageMetadata": {"totalTokenCount": tokens}
            })))
            .mount(server)
            .await;
    }

    pub(crate) async fn mock_gemini_stream(server: &MockServer, parts: &[&str]) {
        let body: String = parts
            .iter()
            .map(|p| format!("data: {}\n\n", json!({"candidates": [{"content": {"parts": [{"text": p}]}}]})))
            .collect();
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/models/gemini-2.5-flash:streamGenerateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(server)
            .await;
    }

    async fn usage(d: &Dispatcher) -> UsagePage {
        d.usage().flush().await;
        d.usage().page(1, 10).await.unwrap()
    }

    #[tokio::test]
    async fn fix_grammar_end_to_end_records_usage() {
        let h = harness().await;
        mock_gemini_text(&h.server, "I am happy.", 42).await;

        let out = h.dispatcher.run("Fix: 'I are happy'", "fixGrammar").await.unwrap();
        assert_eq!(out, "I am happy.");

        let page = usage(&h.dispatcher).await;
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].kind, "fixGrammar");
        assert_eq!(page.items[0].tokens, 42);
        assert_eq!(page.items[0].model_id, "gemini-2.5-flash");
    }

    #[tokio::test]
    async fn config_errors_pass_through_unchanged() {
        let h = harness_with(Arc::new(SqliteUsageStore::open_in_memory().unwrap()), None).await;
        let err = h.dispatcher.run("hi", "fixGrammar").await.unwrap_err();
        assert_eq!(err, DispatchError::Config(ConfigError::NoModelConfigured));
        assert!(err.is_config_error());
        assert!(h.server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn custom_profile_without_base_url_is_a_config_error() {
        let profile = ModelProfile {
            id: "c1".into(),
            name: "Local".into(),
            provider_kind: ProviderKind::Custom,
            api_key: "x".into(),
            base_url: None,
            model_string: Some("llama3".into()),
        };
        let h = harness_with(Arc::new(SqliteUsageStore::open_in_memory().unwrap()), Some(profile)).await;
        let err = h.dispatcher.run("hi", "translate").await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::Config(ConfigError::MissingBaseUrl { profile: "Local".into() })
        );
    }

    #[tokio::test]
    async fn openai_and_anthropic_profiles_need_a_base_url() {
        for kind in [ProviderKind::OpenAi, ProviderKind::Anthropic] {
            let profile = ModelProfile {
                id: "p1".into(),
                name: "Hosted".into(),
                provider_kind: kind,
                api_key: "x".into(),
                base_url: Some("  ".into()),
                model_string: None,
            };
            let h = harness_with(Arc::new(SqliteUsageStore::open_in_memory().unwrap()), Some(profile)).await;
            let err = h.dispatcher.run("hi", "translate").await.unwrap_err();
            assert_eq!(
                err,
                DispatchError::Config(ConfigError::MissingBaseUrl { profile: "Hosted".into() })
            );
            assert!(h.server.received_requests().await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn unsupported_kind_fails_without_calling_out() {
        let mut profile = gemini_profile();
        profile.provider_kind = ProviderKind::Unsupported("mistral".into());
        let h = harness_with(Arc::new(SqliteUsageStore::open_in_memory().unwrap()), Some(profile)).await;
        let err = h.dispatcher.run("hi", "fixGrammar").await.unwrap_err();
        assert_eq!(err, DispatchError::UnsupportedProvider("mistral".into()));
    }

    struct FailingStore;

    impl UsageStore for FailingStore {
        fn append(&self, _: &UsageRecord) -> Result<(), UsageError> {
            Err(UsageError::Poisoned)
        }
        fn page(&self, _: u32, _: u32) -> Result<Vec<UsageRecord>, UsageError> {
            Ok(Vec::new())
        }
        fn count(&self) -> Result<u64, UsageError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn usage_failures_never_reach_the_caller() {
        let h = harness_with(Arc::new(FailingStore), Some(gemini_profile())).await;
        mock_gemini_text(&h.server, "ok", 3).await;

        assert_eq!(h.dispatcher.run("p", "fixGrammar").await.unwrap(), "ok");
        assert_eq!(usage(&h.dispatcher).await.total, 0);
    }

    #[tokio::test]
    async fn vendor_errors_are_not_retried() {
        let h = harness().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "API key not valid"}
            })))
            .expect(1)
            .mount(&h.server)
            .await;

        let err = h.dispatcher.run("p", "fixGrammar").await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::Api(ApiError::VendorRejected { message: "API key not valid".into() })
        );
        assert_eq!(usage(&h.dispatcher).await.total, 0);
    }

    #[tokio::test]
    async fn streaming_forwards_chunks_and_estimates_tokens() {
        let h = harness().await;
        mock_gemini_stream(&h.server, &["Hel", "lo"]).await;

        let mut chunks = Vec::new();
        let text = h
            .dispatcher
            .run_streaming_with("abcd", "enhancePrompt", |c| chunks.push(c.to_string()))
            .await
            .unwrap();
        assert_eq!(chunks, vec!["Hel", "lo"]);
        assert_eq!(text, "Hello");

        let page = usage(&h.dispatcher).await;
        assert_eq!(page.items[0].kind, "enhancePrompt");
        // ceil(5/4) + ceil(4/4)
        assert_eq!(page.items[0].tokens, 3);
    }

    #[tokio::test]
    async fn form_fill_returns_parsed_fields() {
        let h = harness().await;
        mock_gemini_text(&h.server, "Here is the data:\n{\"firstName\":\"Ann\"}\n", 10).await;

        let req = ActionRequest::new(Action::AutoFillForm).with_fields(vec![
            crate::prompts::FormFieldInfo {
                name: "firstName".into(),
                ..Default::default()
            },
        ]);
        let out = h.dispatcher.handle(&req).await.unwrap();
        assert_eq!(
            out,
            ActionOutput::Fields(BTreeMap::from([("firstName".to_string(), "Ann".to_string())]))
        );
        assert_eq!(usage(&h.dispatcher).await.items[0].kind, "autoFillForm");
    }

    #[tokio::test]
    async fn translate_uses_configured_language() {
        let h = harness().await;
        h.dispatcher.settings().set_target_language("German").unwrap();
        Mock::given(matchers::method("POST"))
            .and(matchers::body_string_contains("to German."))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "Hallo"}]}}],
                "usageMetadata": {"totalTokenCount": 5}
            })))
            .mount(&h.server)
            .await;

        let req = ActionRequest::new(Action::Translate).with_text("Hello");
        assert_eq!(h.dispatcher.handle(&req).await.unwrap(), ActionOutput::Text("Hallo".into()));
    }

    #[tokio::test]
    async fn form_fill_cannot_be_streamed() {
        let h = harness().await;
        let req = ActionRequest::new(Action::AutoFillForm).with_fields(vec![Default::default()]);
        let events: Vec<_> = h.dispatcher.handle_streaming(&req).collect().await;
        assert_eq!(events, vec![Err(DispatchError::NotStreamable("autoFillForm"))]);
    }
}
