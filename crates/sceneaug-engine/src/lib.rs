//! Image edit client and dataset augmentation driver.
//!
//! One round-trip reads a street-scene image, asks the Gemini
//! `generateContent` endpoint to add pedestrians and bicycles, and writes the
//! first inline image it returns. [`AugmentRunner`] repeats that round-trip
//! with randomized prompts and files every result into a destination folder.

use std::env;

pub mod artifact;
pub mod client;
pub mod config;
pub mod encode;
pub mod error;
pub mod payload;
pub mod prompt;
pub mod retry;
pub mod runner;
pub mod transport;

pub use client::{EditClient, EditedImage};
pub use config::{ApiKey, ClientConfig};
pub use error::EditError;
pub use prompt::{build_edit_prompt, SceneCounts};
pub use retry::{retry_with_backoff, RetryOutcome, RetryPolicy, Sleeper, ThreadSleeper};
pub use runner::{AugmentRunner, RunOptions, RunReport};
pub use transport::{EditTransport, HttpTransport, TransportResponse};

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
pub(crate) mod testing;
