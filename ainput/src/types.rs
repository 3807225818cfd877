use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Model used for Gemini profiles that leave `model` blank.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// Vendor family of a configured profile.
///
/// Stored as a lowercase tag (`"gemini"`, `"openai"`, ...). Tags this build
/// does not recognise are kept verbatim in [`ProviderKind::Unsupported`] so the
/// settings file survives a round trip through an older binary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    #[serde(rename = "openai", alias = "openai-compatible")]
    OpenAi,
    Anthropic,
    OpenRouter,
    Custom,
    #[serde(untagged)]
    Unsupported(String),
}

/// Request/response dialect spoken by a provider kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Gemini,
    OpenAiCompatible,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Custom => "custom",
            ProviderKind::Unsupported(tag) => tag,
        }
    }

    /// Parse a user-supplied tag. Unknown tags become `Unsupported`.
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "gemini" => ProviderKind::Gemini,
            "openai" | "openai-compatible" => ProviderKind::OpenAi,
            "anthropic" => ProviderKind::Anthropic,
            "openrouter" => ProviderKind::OpenRouter,
            "custom" => ProviderKind::Custom,
            other => ProviderKind::Unsupported(other.to_string()),
        }
    }

    pub fn wire_format(&self) -> Option<WireFormat> {
        match self {
            ProviderKind::Gemini => Some(WireFormat::Gemini),
            ProviderKind::OpenAi | ProviderKind::OpenRouter | ProviderKind::Custom => {
                Some(WireFormat::OpenAiCompatible)
            }
            ProviderKind::Anthropic => Some(WireFormat::Anthropic),
            ProviderKind::Unsupported(_) => None,
        }
    }

    /// Base URL used when the profile does not set one. Only OpenRouter has
    /// a fixed host; other OpenAI-compatible and Anthropic profiles must set it.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenRouter => Some("https://openrouter.ai/api"),
            ProviderKind::Gemini
            | ProviderKind::OpenAi
            | ProviderKind::Anthropic
            | ProviderKind::Custom
            | ProviderKind::Unsupported(_) => None,
        }
    }

    pub fn default_model(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Gemini => Some(DEFAULT_GEMINI_MODEL),
            ProviderKind::OpenAi => Some("gpt-4o-mini"),
            ProviderKind::OpenRouter => Some("openrouter/auto"),
            ProviderKind::Anthropic => Some("claude-3-5-haiku-latest"),
            ProviderKind::Custom | ProviderKind::Unsupported(_) => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-configured AI endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub provider_kind: ProviderKind,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, rename = "model", skip_serializing_if = "Option::is_none")]
    pub model_string: Option<String>,
}

impl ModelProfile {
    /// The vendor model identifier that will actually be sent.
    pub fn effective_model(&self) -> Option<String> {
        self.model_string
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .or_else(|| self.provider_kind.default_model())
            .map(String::from)
    }

    pub fn effective_base_url(&self) -> Option<String> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .or_else(|| self.provider_kind.default_base_url())
            .map(|u| u.trim_end_matches('/').to_string())
    }
}

/// The model-selection part of the durable settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryState {
    #[serde(default, rename = "models")]
    pub profiles: Vec<ModelProfile>,
    #[serde(default, rename = "activeModelId", skip_serializing_if = "Option::is_none")]
    pub active_profile_id: Option<String>,
    /// Bare Gemini key from before profiles existed.
    #[serde(default, rename = "apiKey", skip_serializing_if = "Option::is_none")]
    pub legacy_api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Completions
// ---------------------------------------------------------------------------

/// Result of one provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: Option<u64>,
    /// Vendor model string that served the request.
    pub model: String,
}

/// Item yielded by a provider's streaming call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    TextDelta(String),
    Done(Completion),
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

/// One entry per completed AI call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub date: DateTime<Utc>,
    #[serde(rename = "model")]
    pub model_id: String,
    pub kind: String,
    pub tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsagePage {
    pub items: Vec<UsageRecord>,
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_tags_round_trip() {
        let kinds: Vec<ProviderKind> =
            serde_json::from_str(r#"["gemini","openai","openai-compatible","openrouter","custom","anthropic","mistral"]"#)
                .unwrap();
        assert_eq!(
            kinds,
            vec![
                ProviderKind::Gemini,
                ProviderKind::OpenAi,
                ProviderKind::OpenAi,
                ProviderKind::OpenRouter,
                ProviderKind::Custom,
                ProviderKind::Anthropic,
                ProviderKind::Unsupported("mistral".into()),
            ]
        );
        assert_eq!(
            serde_json::to_string(&ProviderKind::Unsupported("mistral".into())).unwrap(),
            r#""mistral""#
        );
        assert_eq!(serde_json::to_string(&ProviderKind::OpenRouter).unwrap(), r#""openrouter""#);
    }

    #[test]
    fn profile_uses_extension_field_names() {
        let json = r#"{"id":"p1","name":"Work","type":"custom","apiKey":"k","baseUrl":"http://localhost:8080/","model":"llama3"}"#;
        let p: ModelProfile = serde_json::from_str(json).unwrap();
        assert_eq!(p.provider_kind, ProviderKind::Custom);
        assert_eq!(p.effective_base_url().as_deref(), Some("http://localhost:8080"));
        assert_eq!(p.effective_model().as_deref(), Some("llama3"));
    }

    #[test]
    fn only_openrouter_has_a_default_host() {
        let mut p: ModelProfile =
            serde_json::from_str(r#"{"id":"o","name":"","type":"openrouter","apiKey":"k"}"#).unwrap();
        assert_eq!(p.effective_base_url().as_deref(), Some("https://openrouter.ai/api"));
        for kind in [ProviderKind::OpenAi, ProviderKind::Anthropic, ProviderKind::Custom] {
            p.provider_kind = kind;
            assert_eq!(p.effective_base_url(), None);
        }
    }

    #[test]
    fn blank_model_falls_back_to_kind_default() {
        let p = ModelProfile {
            id: "g".into(),
            name: String::new(),
            provider_kind: ProviderKind::Gemini,
            api_key: "k".into(),
            base_url: None,
            model_string: Some("  ".into()),
        };
        assert_eq!(p.effective_model().as_deref(), Some(DEFAULT_GEMINI_MODEL));
    }
}
