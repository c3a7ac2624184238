use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::now_utc_iso;

pub type EventPayload = Map<String, Value>;

/// Event types emitted over the lifetime of one augmentation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEventType {
    RunStarted,
    RoundTripStarted,
    RetryScheduled,
    ArtifactCreated,
    RoundTripFailed,
    RunFinished,
}

impl RunEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::RoundTripStarted => "round_trip_started",
            Self::RetryScheduled => "retry_scheduled",
            Self::ArtifactCreated => "artifact_created",
            Self::RoundTripFailed => "round_trip_failed",
            Self::RunFinished => "run_finished",
        }
    }
}

/// Append-only writer for `events.jsonl`.
///
/// - default fields are `type`, `run_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
///
/// A writer built with [`EventWriter::disabled`] still assembles events but
/// never touches the filesystem.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: Option<PathBuf>,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self::with_path(Some(path.into()), run_id.into())
    }

    pub fn disabled(run_id: impl Into<String>) -> Self {
        Self::with_path(None, run_id.into())
    }

    fn with_path(path: Option<PathBuf>, run_id: String) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path,
                run_id,
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn emit(&self, event_type: RunEventType, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert(
            "type".to_string(),
            Value::String(event_type.as_str().to_string()),
        );
        event.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        let Some(path) = self.inner.path.as_ref() else {
            return Ok(Value::Object(event));
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }
}
