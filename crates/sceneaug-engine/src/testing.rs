//! Scripted transport and recording sleeper shared by unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};

use crate::retry::Sleeper;
use crate::transport::{EditTransport, TransportResponse};

/// Smallest valid PNG header plus padding; enough for format sniffing.
pub const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52,
];

#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|sleeps| sleeps.clone())
            .unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
    }
}

pub enum Scripted {
    Reply(TransportResponse),
    Fail(String),
}

/// Replays queued replies in order, then repeats `fallback` forever.
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Scripted>>,
    fallback: Option<TransportResponse>,
    requests: Mutex<Vec<(String, String, Value)>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            queue: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(reply: TransportResponse) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Some(reply),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    /// `(endpoint, api_key, payload)` for every request seen so far.
    pub fn requests(&self) -> Vec<(String, String, Value)> {
        self.requests
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }
}

impl EditTransport for ScriptedTransport {
    fn post_json(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<TransportResponse> {
        if let Ok(mut rows) = self.requests.lock() {
            rows.push((endpoint.to_string(), api_key.to_string(), payload.clone()));
        }
        let next = self
            .queue
            .lock()
            .map_err(|_| anyhow!("script lock poisoned"))?
            .pop_front();
        match next {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::Fail(message)) => Err(anyhow!(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow!("transport script exhausted")),
        }
    }
}

pub fn reply(status: u16, body: Value) -> TransportResponse {
    TransportResponse {
        status,
        body: body.to_string(),
    }
}

pub fn image_reply(bytes: &[u8]) -> TransportResponse {
    reply(
        200,
        json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "Added pedestrians and cyclists." },
                        { "inlineData": { "mimeType": "image/png", "data": BASE64.encode(bytes) } }
                    ]
                },
                "finishReason": "STOP"
            }]
        }),
    )
}

pub fn rate_limited() -> TransportResponse {
    reply(
        429,
        json!({ "error": { "code": 429, "status": "RESOURCE_EXHAUSTED" } }),
    )
}
