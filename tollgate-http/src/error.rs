//! Error types for the HTTP boundary.

/// Errors encoding or decoding payment headers.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Base64 decoding failed.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}
