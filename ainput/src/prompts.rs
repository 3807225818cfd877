//! Prompt templates, one per action kind.
//!
//! Templates are plain interpolation. Caller text is trimmed and otherwise
//! passed through untouched.

use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Translation target when the user has not picked one.
pub const DEFAULT_TARGET_LANGUAGE: &str = "Spanish";

/// A request from the UI, as sent over the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FormFieldInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl ActionRequest {
    pub fn new(action: Action) -> Self {
        Self {
            action: action.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_page_content(mut self, content: impl Into<String>) -> Self {
        self.page_content = Some(content.into());
        self
    }

    pub fn with_fields(mut self, fields: Vec<FormFieldInfo>) -> Self {
        self.fields = Some(fields);
        self
    }
}

/// One input of a form to be filled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormFieldInfo {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default, rename = "type")]
    pub field_type: String,
}

/// The action kinds this build knows templates for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    FixGrammar,
    Translate,
    EnhancePrompt,
    AutoReply,
    AutoFillForm,
    AutoComplete,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::FixGrammar,
        Action::Translate,
        Action::EnhancePrompt,
        Action::AutoReply,
        Action::AutoFillForm,
        Action::AutoComplete,
    ];

    /// Wire name, also used as the usage-record kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::FixGrammar => "fixGrammar",
            Action::Translate => "translate",
            Action::EnhancePrompt => "enhancePrompt",
            Action::AutoReply => "autoReply",
            Action::AutoFillForm => "autoFillForm",
            Action::AutoComplete => "autoComplete",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == name)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, DispatchError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(DispatchError::MissingInput(name))
}

fn optional(value: &Option<String>) -> &str {
    value.as_deref().map(str::trim).unwrap_or_default()
}

/// Pick the template for `req.action` and fill it in.
pub fn build_prompt(
    req: &ActionRequest,
    target_language: Option<&str>,
) -> Result<(Action, String), DispatchError> {
    let action =
        Action::parse(&req.action).ok_or_else(|| DispatchError::UnknownAction(req.action.clone()))?;

    let prompt = match action {
        Action::FixGrammar => fix_grammar(required(&req.text, "text")?),
        Action::Translate => translate(
            required(&req.text, "text")?,
            target_language
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .unwrap_or(DEFAULT_TARGET_LANGUAGE),
        ),
        Action::EnhancePrompt => enhance_prompt(required(&req.text, "text")?),
        Action::AutoReply => auto_reply(required(&req.page_content, "pageContent")?),
        Action::AutoFillForm => {
            let fields = req
                .fields
                .as_deref()
                .filter(|f| !f.is_empty())
                .ok_or(DispatchError::MissingInput("fields"))?;
            auto_fill_form(fields, optional(&req.page_content))
        }
        Action::AutoComplete => {
            let label = optional(&req.label);
            let placeholder = optional(&req.placeholder);
            if label.is_empty() && placeholder.is_empty() {
                return Err(DispatchError::MissingInput("label"));
            }
            auto_complete(label, placeholder, optional(&req.page_content))
        }
    };
    Ok((action, prompt))
}

pub fn fix_grammar(text: &str) -> String {
    format!(
        "Fix the grammar and spelling in the following text. Return ONLY the corrected text \
         without any explanations or additional comments:\n\n{}",
        text.trim()
    )
}

pub fn translate(text: &str, target_language: &str) -> String {
    format!(
        "Translate the following text to {}. Return ONLY the translated text without any \
         explanations or additional comments:\n\n{}",
        target_language,
        text.trim()
    )
}

pub fn enhance_prompt(text: &str) -> String {
    format!(
        "Enhance the following prompt to be more detailed and effective for large language \
         models. Return ONLY the enhanced prompt without any explanations or additional \
         comments:\n\n{}",
        text.trim()
    )
}

pub fn auto_reply(page_content: &str) -> String {
    format!(
        "Based on the following page content, generate a concise and relevant reply. The reply \
         should be suitable for a comment or a short message. Return only the suggested reply, \
         without any introductory phrases like \"Here's a reply:\" or any other \
         explanations.\n\nPage Content:\n\"\"\"\n{}\n\"\"\"\n\nSuggested Reply:",
        page_content.trim()
    )
}

pub fn auto_complete(label: &str, placeholder: &str, page_content: &str) -> String {
    format!(
        "Based on the page content provided below, generate a relevant value for a form \
         field.\n\nField Label: {}\nField Placeholder: {}\n\nPage Content:\n\"\"\"\n{}\n\"\"\"\n\n\
         Return ONLY the value to be filled in the form field, without any explanations or quotes.",
        label.trim(),
        placeholder.trim(),
        page_content.trim()
    )
}

pub fn auto_fill_form(fields: &[FormFieldInfo], page_content: &str) -> String {
    let mut listing = String::new();
    for f in fields {
        let _ = writeln!(
            listing,
            "- name: {}, label: {}, placeholder: {}, type: {}",
            f.name.trim(),
            f.label.trim(),
            f.placeholder.trim(),
            f.field_type.trim()
        );
    }
    format!(
        "Based on the page content provided below, generate realistic values for the following \
         form fields.\n\nFields:\n{}\nPage Content:\n\"\"\"\n{}\n\"\"\"\n\n\
         Return ONLY a JSON object whose keys are the field names and whose values are the \
         strings to fill in. Do not add explanations or code fences.",
        listing,
        page_content.trim()
    )
}
