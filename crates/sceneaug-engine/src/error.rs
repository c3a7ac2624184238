//! Failure taxonomy for one edit round-trip.

use std::path::PathBuf;

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum EditError {
    #[error("input image not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("rate limited (429): {body}")]
    RateLimited { body: String },

    #[error("still rate limited after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("no image data found in the response")]
    NoInlineImage { raw: Value },

    #[error("request failed: {0:#}")]
    Transport(anyhow::Error),

    #[error("invalid JSON response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to decode image data: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EditError {
    /// Only rate limiting is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Stable label used in run events and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingInput(_) => "missing_input",
            Self::RateLimited { .. } => "rate_limited",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Http { .. } => "http_error",
            Self::NoInlineImage { .. } => "no_inline_image",
            Self::Transport(_) | Self::Json(_) | Self::Decode(_) | Self::Io(_) => "unexpected",
        }
    }
}
