//! Error types shared by the loader, clients, index and engine.

use thiserror::Error;

/// Errors surfaced by the retrieval core.
///
/// Nothing in this crate retries or degrades: every variant reaches the
/// immediate caller (CLI loop or HTTP handler), which decides what to show.
#[derive(Debug, Error)]
pub enum RagError {
    /// A directory, snapshot or document set that was expected is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Embedding dimension, embedding model or snapshot format disagree.
    #[error("configuration mismatch: {0}")]
    ConfigMismatch(String),

    /// The external embedding or generation API failed (network, auth, decode).
    #[error("provider error ({provider}): {message}")]
    Provider {
        /// The provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A query arrived before any index was built or loaded.
    #[error("index not ready: no index has been built yet")]
    IndexNotReady,

    /// The loader cannot extract text from this file.
    #[error("unsupported document: {0}")]
    UnsupportedDocument(String),

    /// The caller sent something unusable, such as an empty question.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or unparseable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Shorthand for a [`RagError::Provider`] error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// A convenience result type for this crate.
pub type Result<T> = std::result::Result<T, RagError>;
