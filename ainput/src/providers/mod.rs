pub mod anthropic;
pub mod compatible;
pub mod google;
pub mod sanitize;
pub mod sse;

use crate::error::{ApiError, DispatchError};
use crate::types::{Completion, ModelProfile, ProviderEvent, ProviderKind};
use anthropic::AnthropicProvider;
use async_trait::async_trait;
use compatible::OpenAiCompatibleProvider;
use futures::stream::BoxStream;
use google::GoogleProvider;
use serde::Deserialize;
use std::sync::Arc;

/// Sampling temperature sent on every call.
pub const TEMPERATURE: f64 = 0.7;
/// Output cap for buffered calls (and all OpenAI/Anthropic calls).
pub const MAX_OUTPUT_TOKENS: u32 = 2048;

/// One vendor family's adapter.
///
/// `stream` yields zero or more `TextDelta`s in receive order and then exactly
/// one `Done`, or stops at the first `Err`. Nothing follows `Done` or an error.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Buffered call: wait for the whole response.
    async fn invoke(&self, prompt: &str, profile: &ModelProfile) -> Result<Completion, ApiError>;

    /// Streaming call.
    fn stream(
        &self,
        prompt: &str,
        profile: &ModelProfile,
    ) -> BoxStream<'static, Result<ProviderEvent, ApiError>>;
}

/// The adapters, one per wire format.
#[derive(Clone)]
pub struct Providers {
    google: Arc<GoogleProvider>,
    compatible: Arc<OpenAiCompatibleProvider>,
    anthropic: Arc<AnthropicProvider>,
}

impl Providers {
    pub fn new() -> Self {
        Self {
            google: Arc::new(GoogleProvider::new()),
            compatible: Arc::new(OpenAiCompatibleProvider::new()),
            anthropic: Arc::new(AnthropicProvider::new()),
        }
    }

    /// Point the Gemini adapter at another host (tests, regional endpoints).
    pub fn with_gemini_base_url(mut self, base_url: &str) -> Self {
        self.google = Arc::new(GoogleProvider::with_base_url(base_url));
        self
    }

    /// Adapter for a profile kind. Adding a kind means extending this match.
    pub fn for_kind(&self, kind: &ProviderKind) -> Result<Arc<dyn Provider>, DispatchError> {
        match kind {
            ProviderKind::Gemini => Ok(self.google.clone() as Arc<dyn Provider>),
            ProviderKind::OpenAi | ProviderKind::OpenRouter | ProviderKind::Custom => {
                Ok(self.compatible.clone() as Arc<dyn Provider>)
            }
            ProviderKind::Anthropic => Ok(self.anthropic.clone() as Arc<dyn Provider>),
            ProviderKind::Unsupported(tag) => Err(DispatchError::UnsupportedProvider(tag.clone())),
        }
    }
}

impl Default for Providers {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Shared response handling
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub(crate) struct VendorErrorBody {
    pub error: Option<VendorError>,
}

#[derive(Deserialize)]
pub(crate) struct VendorError {
    pub message: Option<String>,
}

impl VendorError {
    /// Classify a vendor error. Only Gemini's quota wording gets its own variant.
    pub(crate) fn into_api_error(self, api_key: &str, quota_aware: bool) -> ApiError {
        let message = sanitize::redact(self.message.as_deref().unwrap_or("Unknown error"), api_key);
        if quota_aware && message.to_lowercase().contains("quota") {
            ApiError::QuotaExceeded { message }
        } else {
            ApiError::VendorRejected { message }
        }
    }
}

/// Read a response body, surfacing vendor errors and failed statuses.
///
/// A body carrying `error.message` is a vendor rejection whatever the status;
/// an unparseable body on a failed status is a plain `HttpFailure`.
pub(crate) async fn read_body(
    resp: reqwest::Response,
    api_key: &str,
    quota_aware: bool,
) -> Result<String, ApiError> {
    let status = resp.status();
    let body = resp.text().await.map_err(ApiError::network)?;
    check_body(status.as_u16(), status.is_success(), &body, api_key, quota_aware)?;
    Ok(body)
}

pub(crate) fn check_body(
    status: u16,
    success: bool,
    body: &str,
    api_key: &str,
    quota_aware: bool,
) -> Result<(), ApiError> {
    if let Ok(VendorErrorBody { error: Some(err) }) = serde_json::from_str::<VendorErrorBody>(body) {
        return Err(err.into_api_error(api_key, quota_aware));
    }
    if !success {
        tracing::debug!(status, body = %sanitize::redact(body, api_key), "provider request failed");
        return Err(ApiError::HttpFailure { status });
    }
    Ok(())
}
