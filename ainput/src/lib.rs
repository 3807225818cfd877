pub mod dispatcher;
pub mod error;
pub mod formfill;
pub mod prompts;
pub mod providers;
pub mod registry;
pub mod settings;
pub mod transport;
pub mod types;
pub mod usage;

// Re-exports for convenience
pub use dispatcher::{ActionOutput, DispatchEvent, Dispatcher};
pub use error::{ApiError, ConfigError, DispatchError, ParseError, TransportError, UsageError};
pub use prompts::{Action, ActionRequest, FormFieldInfo};
pub use providers::{Provider, Providers};
pub use registry::resolve_active_model;
pub use settings::{Settings, SettingsStore};
pub use transport::{SessionState, StreamSession, StreamTransport, TransportEvent};
pub use types::*;
pub use usage::{SqliteUsageStore, UsageRecorder, UsageStore};
