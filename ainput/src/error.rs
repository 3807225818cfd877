//! Error taxonomy. Every `Display` here is the message shown to the user.

/// Settings problems the user can fix from the options page.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("No API key or model configured. Please set your API key in the extension options.")]
    NoModelConfigured,

    #[error("Please select an active model in the extension options.")]
    NoActiveModelSelected,

    #[error("Active model not found. Please check your settings.")]
    ActiveModelNotFound,

    #[error("Model \"{profile}\" has no base URL. Please check your settings.")]
    MissingBaseUrl { profile: String },
}

/// Failures talking to a vendor API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// The vendor answered with an error message.
    #[error("{message}")]
    VendorRejected { message: String },

    /// A Gemini rejection that mentions quota. `message` keeps the vendor text.
    #[error("You have exceeded your Gemini API quota.")]
    QuotaExceeded { message: String },

    #[error("Empty response from provider")]
    EmptyResponse,

    #[error("Request failed with status {status}")]
    HttpFailure { status: u16 },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("No base URL configured for this model")]
    MissingEndpoint,
}

impl ApiError {
    /// Both `VendorRejected` and its quota subtype.
    pub fn is_vendor_rejection(&self) -> bool {
        matches!(self, ApiError::VendorRejected { .. } | ApiError::QuotaExceeded { .. })
    }

    pub(crate) fn network(err: reqwest::Error) -> Self {
        // Gemini carries the key in the query string; never echo the URL.
        ApiError::Network {
            message: err.without_url().to_string(),
        }
    }
}

/// Model output that could not be turned into the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Failed to parse AI response as JSON, please try again.")]
    FormFillJsonInvalid,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection lost")]
    Disconnected,
}

/// Anything a dispatch can fail with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Unsupported model type: {0}")]
    UnsupportedProvider(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Missing `{0}` for this action")]
    MissingInput(&'static str),

    #[error("{0} cannot be streamed")]
    NotStreamable(&'static str),

    #[error("Could not read settings: {0}")]
    Settings(String),
}

impl DispatchError {
    /// True when the UI should offer to open the settings page.
    pub fn is_config_error(&self) -> bool {
        matches!(self, DispatchError::Config(_))
    }
}

/// Durable usage store failures. Never reach a dispatch caller.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("usage store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("usage store directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("usage record has an invalid date: {0}")]
    InvalidDate(String),

    #[error("usage store lock poisoned")]
    Poisoned,

    #[error("usage worker stopped")]
    WorkerGone,
}
