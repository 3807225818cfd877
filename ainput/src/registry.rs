//! Picks the profile a request should go to.

use crate::error::ConfigError;
use crate::types::{DEFAULT_GEMINI_MODEL, ModelProfile, ProviderKind, RegistryState};

/// Id given to the profile synthesized from a legacy bare API key.
pub const LEGACY_PROFILE_ID: &str = "legacy";

/// Resolve the active profile from a settings snapshot.
///
/// A dangling `activeModelId` is an error; no other profile is picked in its
/// place. With no profiles at all, a legacy `apiKey` stands in for a single
/// Gemini profile.
pub fn resolve_active_model(state: &RegistryState) -> Result<ModelProfile, ConfigError> {
    if !state.profiles.is_empty() {
        let active = state
            .active_profile_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::NoActiveModelSelected)?;

        return state
            .profiles
            .iter()
            .find(|p| p.id == active)
            .cloned()
            .ok_or(ConfigError::ActiveModelNotFound);
    }

    match state.legacy_api_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => Ok(legacy_profile(key)),
        _ => Err(ConfigError::NoModelConfigured),
    }
}

/// The Gemini profile a legacy key stands for.
pub fn legacy_profile(api_key: &str) -> ModelProfile {
    ModelProfile {
        id: LEGACY_PROFILE_ID.to_string(),
        name: "Gemini".to_string(),
        provider_kind: ProviderKind::Gemini,
        api_key: api_key.to_string(),
        base_url: None,
        model_string: Some(DEFAULT_GEMINI_MODEL.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, kind: ProviderKind) -> ModelProfile {
        ModelProfile {
            id: id.into(),
            name: id.into(),
            provider_kind: kind,
            api_key: format!("key-{id}"),
            base_url: None,
            model_string: None,
        }
    }

    #[test]
    fn empty_state_is_not_configured() {
        let state = RegistryState::default();
        assert_eq!(resolve_active_model(&state), Err(ConfigError::NoModelConfigured));

        let blank_key = RegistryState {
            legacy_api_key: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(resolve_active_model(&blank_key), Err(ConfigError::NoModelConfigured));
    }

    #[test]
    fn active_profile_is_returned() {
        let state = RegistryState {
            profiles: vec![profile("a", ProviderKind::Gemini), profile("b", ProviderKind::OpenRouter)],
            active_profile_id: Some("b".into()),
            legacy_api_key: Some("ignored".into()),
        };
        let p = resolve_active_model(&state).unwrap();
        assert_eq!(p.id, "b");
        assert_eq!(p.provider_kind, ProviderKind::OpenRouter);
    }

    #[test]
    fn missing_active_id_is_reported() {
        let mut state = RegistryState {
            profiles: vec![profile("a", ProviderKind::Gemini)],
            active_profile_id: None,
            legacy_api_key: None,
        };
        assert_eq!(resolve_active_model(&state), Err(ConfigError::NoActiveModelSelected));

        state.active_profile_id = Some(String::new());
        assert_eq!(resolve_active_model(&state), Err(ConfigError::NoActiveModelSelected));
    }

    #[test]
    fn dangling_active_id_never_falls_back() {
        let state = RegistryState {
            profiles: vec![profile("a", ProviderKind::Gemini), profile("b", ProviderKind::Custom)],
            active_profile_id: Some("gone".into()),
            legacy_api_key: Some("legacy".into()),
        };
        assert_eq!(resolve_active_model(&state), Err(ConfigError::ActiveModelNotFound));
    }

    #[test]
    fn legacy_key_synthesizes_gemini_profile() {
        let state = RegistryState {
            legacy_api_key: Some("AIza-old".into()),
            ..Default::default()
        };
        let p = resolve_active_model(&state).unwrap();
        assert_eq!(p.provider_kind, ProviderKind::Gemini);
        assert_eq!(p.api_key, "AIza-old");
        assert_eq!(p.model_string.as_deref(), Some(DEFAULT_GEMINI_MODEL));
    }
}
