use std::path::{Path, PathBuf};
use std::sync::Arc;

use sceneaug_contracts::events::{EventPayload, EventWriter, RunEventType};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::artifact::{sha256_hex, write_artifact};
use crate::config::{ClientConfig, DEFAULT_INPUT_MIME_TYPE};
use crate::encode::{decode_image, encode_image, mime_for_path};
use crate::error::EditError;
use crate::payload::{EditRequest, EditResponse};
use crate::retry::{retry_with_backoff, RetryOutcome, RetryPolicy, Sleeper, ThreadSleeper};
use crate::transport::{EditTransport, HttpTransport};
use crate::truncate_text;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditedImage {
    pub path: PathBuf,
    pub bytes: usize,
    pub sha256: String,
    pub mime_type: String,
    pub attempts: u32,
}

pub struct EditClient {
    config: ClientConfig,
    transport: Box<dyn EditTransport>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    events: EventWriter,
}

impl EditClient {
    pub fn new(config: ClientConfig) -> Self {
        let transport = HttpTransport::new(config.request_timeout);
        Self {
            config,
            transport: Box::new(transport),
            retry: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
            events: EventWriter::disabled(sceneaug_contracts::new_run_id()),
        }
    }

    pub fn with_transport<T: EditTransport + 'static>(mut self, transport: T) -> Self {
        self.transport = Box::new(transport);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn sleeper(&self) -> &dyn Sleeper {
        self.sleeper.as_ref()
    }

    /// Sends `source` with `instruction` and writes the first returned inline
    /// image to `destination`.
    ///
    /// Nothing is written unless the whole round-trip succeeds.
    pub fn edit_image(
        &self,
        source: &Path,
        instruction: &str,
        destination: &Path,
    ) -> Result<EditedImage, EditError> {
        info!("preparing image and prompt for the API");
        let encoded = encode_image(source)?;
        let mime_type = self
            .config
            .input_mime_type
            .as_deref()
            .or_else(|| mime_for_path(source))
            .unwrap_or(DEFAULT_INPUT_MIME_TYPE);
        let request = EditRequest::new(instruction, mime_type, encoded, &self.config);
        let payload = serde_json::to_value(&request)?;
        let endpoint = self.config.endpoint();
        let max_attempts = self.retry.max_attempts.max(1);

        let outcome = retry_with_backoff(
            &self.retry,
            self.sleeper(),
            EditError::is_retryable,
            |_, attempt, wait| {
                warn!(
                    attempt,
                    max_attempts,
                    "HTTP 429: quota exceeded, waiting {}s",
                    wait.as_secs_f64()
                );
                let mut event = EventPayload::new();
                event.insert("attempt".to_string(), json!(attempt));
                event.insert("max_attempts".to_string(), json!(max_attempts));
                event.insert("wait_s".to_string(), json!(wait.as_secs_f64()));
                event.insert(
                    "destination".to_string(),
                    json!(destination.display().to_string()),
                );
                if let Err(err) = self.events.emit(RunEventType::RetryScheduled, event) {
                    warn!("failed to record retry event: {err:#}");
                }
            },
            |attempt| {
                info!(attempt, max_attempts, "sending edit request");
                self.send_once(&endpoint, &payload)
            },
        );

        let (attempts, raw, response) = match outcome {
            RetryOutcome::Success {
                value: (raw, response),
                attempts,
            } => (attempts, raw, response),
            RetryOutcome::Exhausted { attempts, .. } => {
                return Err(EditError::RetriesExhausted { attempts })
            }
            RetryOutcome::Aborted { error, .. } => return Err(error),
        };

        let text = response.text();
        if !text.is_empty() {
            debug!("model text: {}", truncate_text(&text, 400));
        }
        let Some(inline) = response.first_inline_image() else {
            if let Some(reason) = response.block_reason() {
                warn!("response carried no image (reason: {reason})");
            }
            return Err(EditError::NoInlineImage { raw });
        };

        info!("received edited image data, decoding and saving");
        let bytes = decode_image(&inline.data)?;
        if image::guess_format(&bytes).is_err() {
            warn!(
                bytes = bytes.len(),
                "returned payload is not a recognised image format; saving it unchanged"
            );
        }
        write_artifact(destination, &bytes)?;
        info!("edited image saved to '{}'", destination.display());

        Ok(EditedImage {
            path: destination.to_path_buf(),
            bytes: bytes.len(),
            sha256: sha256_hex(&bytes),
            mime_type: inline.mime_type.clone(),
            attempts,
        })
    }

    pub fn edit_image_reported(
        &self,
        source: &Path,
        instruction: &str,
        destination: &Path,
    ) -> Option<EditedImage> {
        match self.edit_image(source, instruction, destination) {
            Ok(edited) => Some(edited),
            Err(err) => {
                log_failure(&err);
                None
            }
        }
    }

    fn send_once(
        &self,
        endpoint: &str,
        payload: &Value,
    ) -> Result<(Value, EditResponse), EditError> {
        let reply = self
            .transport
            .post_json(endpoint, self.config.api_key.expose(), payload)
            .map_err(EditError::Transport)?;
        if reply.status == 429 {
            return Err(EditError::RateLimited { body: reply.body });
        }
        if !reply.is_success() {
            return Err(EditError::Http {
                status: reply.status,
                body: reply.body,
            });
        }
        let raw: Value = serde_json::from_str(&reply.body)?;
        let response: EditResponse = serde_json::from_value(raw.clone())?;
        Ok((raw, response))
    }
}

pub fn log_failure(err: &EditError) {
    match err {
        EditError::MissingInput(path) => {
            error!("the image file '{}' was not found", path.display());
        }
        EditError::RetriesExhausted { attempts } => {
            error!(
                "failed to get a successful response after {attempts} attempts; try again later or check your quota"
            );
        }
        EditError::Http { status, body } => {
            error!(status, "HTTP error: {}", truncate_text(body, 2048));
        }
        EditError::NoInlineImage { raw } => {
            warn!("no image data found in the API response");
            let pretty = serde_json::to_string_pretty(raw).unwrap_or_else(|_| raw.to_string());
            warn!("{pretty}");
        }
        other => {
            error!("an unexpected error occurred: {other}");
        }
    }
}
