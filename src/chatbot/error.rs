//! Error taxonomy for the conversation pipeline.

use std::path::PathBuf;

/// Errors surfaced by the chatbot core and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A voice parameter key outside the recognized set.
    #[error("invalid config key: {0}")]
    InvalidConfigKey(String),

    /// A recognized voice parameter key given a value of the wrong kind.
    #[error("invalid value for {key}: {value}")]
    InvalidConfigValue { key: String, value: String },

    /// Attachment without a usable image content type.
    #[error("attachment {0} is not an image")]
    UnresolvedAttachment(String),

    /// The LLM or synthesis backend failed.
    #[error("{service} error: {message}")]
    Upstream { service: &'static str, message: String },

    /// Reading or writing persisted state failed.
    #[error("failed to persist {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The messaging platform rejected a send or download.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl Error {
    pub fn upstream(service: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            message: message.into(),
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
