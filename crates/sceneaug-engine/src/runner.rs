use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use sceneaug_contracts::events::{EventPayload, EventWriter, RunEventType};
use sceneaug_contracts::{new_run_id, now_utc_iso};
use sceneaug_contracts::runs::summary::RunSummary;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::artifact::relocate_artifact;
use crate::client::{log_failure, EditClient};
use crate::prompt::{build_edit_prompt, SceneCounts};

const SUFFIX_RANGE: std::ops::RangeInclusive<u32> = 1000..=9999;
const NAME_DRAWS: usize = 32;
const RELOCATION_FAILED: &str = "relocation_failed";
const NAME_UNAVAILABLE: &str = "name_unavailable";

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input_image: PathBuf,
    pub dest_folder: PathBuf,
    pub work_dir: PathBuf,
    pub num_images: u32,
    pub output_prefix: Option<String>,
    pub output_extension: String,
    pub inter_request_delay: Duration,
}

impl RunOptions {
    pub fn new(
        input_image: impl Into<PathBuf>,
        dest_folder: impl Into<PathBuf>,
        num_images: u32,
    ) -> Self {
        Self {
            input_image: input_image.into(),
            dest_folder: dest_folder.into(),
            work_dir: PathBuf::from("."),
            num_images,
            output_prefix: None,
            output_extension: "png".to_string(),
            inter_request_delay: Duration::from_secs(2),
        }
    }

    /// `generated_<input stem>_pedestrian_bicycle` unless overridden.
    pub fn output_prefix(&self) -> String {
        if let Some(prefix) = self
            .output_prefix
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return prefix.to_string();
        }
        let stem = self
            .input_image
            .file_stem()
            .and_then(|value| value.to_str())
            .unwrap_or("scene");
        format!("generated_{stem}_pedestrian_bicycle")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub requested: u32,
    pub artifacts: Vec<PathBuf>,
    pub failures: BTreeMap<String, u64>,
}

impl RunReport {
    pub fn produced(&self) -> u64 {
        self.artifacts.len() as u64
    }

    pub fn failed(&self) -> u64 {
        self.failures.values().sum()
    }

    pub fn to_summary(&self, options: &RunOptions) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: self.finished_at.clone(),
            input_image: options.input_image.display().to_string(),
            dest_folder: options.dest_folder.display().to_string(),
            requested: u64::from(self.requested),
            produced: self.produced(),
            failed: self.failed(),
            failures: self.failures.clone(),
            artifacts: self
                .artifacts
                .iter()
                .map(|path| path.display().to_string())
                .collect(),
        }
    }

    fn record_failure(&mut self, kind: &str) {
        *self.failures.entry(kind.to_string()).or_insert(0) += 1;
    }
}

pub struct AugmentRunner<R: Rng> {
    client: EditClient,
    options: RunOptions,
    rng: R,
    events: EventWriter,
}

impl<R: Rng> AugmentRunner<R> {
    pub fn new(client: EditClient, options: RunOptions, rng: R) -> Self {
        Self {
            client,
            options,
            rng,
            events: EventWriter::disabled(new_run_id()),
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.client = self.client.with_events(events.clone());
        self.events = events;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Runs every iteration. Only setup problems (unusable destination or
    /// work directory) are returned as errors; per-image failures are logged,
    /// counted, and skipped.
    pub fn run(&mut self) -> Result<RunReport> {
        let total = self.options.num_images;
        let mut report = RunReport {
            run_id: self.events.run_id().to_string(),
            started_at: now_utc_iso(),
            finished_at: String::new(),
            requested: total,
            artifacts: Vec::new(),
            failures: BTreeMap::new(),
        };

        fs::create_dir_all(&self.options.dest_folder).with_context(|| {
            format!(
                "failed to create destination folder {}",
                self.options.dest_folder.display()
            )
        })?;
        fs::create_dir_all(&self.options.work_dir).with_context(|| {
            format!(
                "failed to create work directory {}",
                self.options.work_dir.display()
            )
        })?;

        info!("starting to generate {total} images");
        info!("input image: {}", self.options.input_image.display());
        info!("destination folder: {}", self.options.dest_folder.display());
        self.emit(
            RunEventType::RunStarted,
            json!({
                "input_image": self.options.input_image.display().to_string(),
                "dest_folder": self.options.dest_folder.display().to_string(),
                "num_images": total,
                "model": self.client.config().model,
            }),
        );

        let prefix = self.options.output_prefix();
        for index in 0..total {
            self.run_iteration(index, &prefix, &mut report);
            if index + 1 < total {
                self.client
                    .sleeper()
                    .sleep(self.options.inter_request_delay);
            }
        }

        report.finished_at = now_utc_iso();
        self.emit(
            RunEventType::RunFinished,
            json!({
                "requested": total,
                "produced": report.produced(),
                "failed": report.failed(),
                "failures": report.failures,
            }),
        );
        info!(
            "finished generating images: {} of {} produced",
            report.produced(),
            total
        );
        Ok(report)
    }

    fn run_iteration(&mut self, index: u32, prefix: &str, report: &mut RunReport) {
        let total = self.options.num_images;
        let counts = SceneCounts::draw(&mut self.rng);
        let prompt = build_edit_prompt(&counts);
        let Some(file_name) = self.next_file_name(index, prefix) else {
            warn!(
                "no free file name for image {} after {NAME_DRAWS} draws; skipping",
                index + 1
            );
            report.record_failure(NAME_UNAVAILABLE);
            self.emit(
                RunEventType::RoundTripFailed,
                json!({
                    "index": index + 1,
                    "kind": NAME_UNAVAILABLE,
                    "error": "no free output file name",
                }),
            );
            return;
        };
        let staged = self.options.work_dir.join(&file_name);

        info!("--- generating image {}/{} ---", index + 1, total);
        debug!("using prompt: {prompt}");
        info!("output path for this image: {}", staged.display());
        self.emit(
            RunEventType::RoundTripStarted,
            json!({
                "index": index + 1,
                "bicycles": counts.bicycles,
                "pedestrians": counts.pedestrians,
                "file_name": file_name,
            }),
        );

        let edited = match self
            .client
            .edit_image(&self.options.input_image, &prompt, &staged)
        {
            Ok(edited) => edited,
            Err(err) => {
                log_failure(&err);
                report.record_failure(err.kind());
                self.emit(
                    RunEventType::RoundTripFailed,
                    json!({
                        "index": index + 1,
                        "kind": err.kind(),
                        "error": err.to_string(),
                    }),
                );
                return;
            }
        };

        match relocate_artifact(&edited.path, &self.options.dest_folder) {
            Ok(final_path) => {
                info!("moved generated image to {}", final_path.display());
                self.emit(
                    RunEventType::ArtifactCreated,
                    json!({
                        "index": index + 1,
                        "image_path": final_path.display().to_string(),
                        "bytes": edited.bytes,
                        "sha256": edited.sha256,
                        "mime_type": edited.mime_type,
                        "attempts": edited.attempts,
                    }),
                );
                report.artifacts.push(final_path);
            }
            Err(err) => {
                warn!("failed to move image: {err:#}");
                report.record_failure(RELOCATION_FAILED);
                self.emit(
                    RunEventType::RoundTripFailed,
                    json!({
                        "index": index + 1,
                        "kind": RELOCATION_FAILED,
                        "error": format!("{err:#}"),
                    }),
                );
            }
        }
    }

    /// `{prefix}_{index+1}_{suffix}.{ext}`, redrawing the suffix while the
    /// name is already taken in the work or destination folder.
    fn next_file_name(&mut self, index: u32, prefix: &str) -> Option<String> {
        let ext = self.options.output_extension.trim_start_matches('.');
        let dirs = [
            self.options.dest_folder.as_path(),
            self.options.work_dir.as_path(),
        ];
        let rng = &mut self.rng;
        free_file_name(&dirs, NAME_DRAWS, || {
            let suffix = rng.gen_range(SUFFIX_RANGE);
            format!("{prefix}_{}_{suffix}.{ext}", index + 1)
        })
    }

    fn emit(&self, event_type: RunEventType, payload: serde_json::Value) {
        let payload: EventPayload = match payload {
            serde_json::Value::Object(map) => map,
            _ => EventPayload::new(),
        };
        if let Err(err) = self.events.emit(event_type, payload) {
            warn!("failed to record {} event: {err:#}", event_type.as_str());
        }
    }
}

fn free_file_name<F>(dirs: &[&Path], draws: usize, mut candidate: F) -> Option<String>
where
    F: FnMut() -> String,
{
    (0..draws)
        .map(|_| candidate())
        .find(|name| dirs.iter().all(|dir| !dir.join(name).exists()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use sceneaug_contracts::events::EventWriter;
    use serde_json::{json, Value};

    use super::{AugmentRunner, RunOptions};
    use crate::client::EditClient;
    use crate::config::{ApiKey, ClientConfig};
    use crate::testing::{
        image_reply, rate_limited, reply, RecordingSleeper, Scripted, ScriptedTransport, PNG_BYTES,
    };

    struct Fixture {
        temp: tempfile::TempDir,
        options: RunOptions,
    }

    fn fixture(num_images: u32) -> anyhow::Result<Fixture> {
        let temp = tempfile::tempdir()?;
        let input = temp.path().join("background_images").join("CAM3.png");
        fs::create_dir_all(input.parent().unwrap_or(temp.path()))?;
        fs::write(&input, PNG_BYTES)?;
        let mut options = RunOptions::new(&input, temp.path().join("output").join("images"), num_images);
        options.work_dir = temp.path().join("work");
        Ok(Fixture { temp, options })
    }

    fn runner(
        transport: ScriptedTransport,
        sleeper: Arc<RecordingSleeper>,
        options: RunOptions,
    ) -> AugmentRunner<StdRng> {
        let client = EditClient::new(ClientConfig::new(ApiKey::new("k").unwrap()))
            .with_transport(transport)
            .with_sleeper(sleeper);
        AugmentRunner::new(client, options, StdRng::seed_from_u64(42))
    }

    #[test]
    fn three_requested_images_land_in_destination_with_distinct_names() -> anyhow::Result<()> {
        let fx = fixture(3)?;
        let sleeper = Arc::new(RecordingSleeper::default());
        let mut runner = runner(
            ScriptedTransport::always(image_reply(PNG_BYTES)),
            sleeper.clone(),
            fx.options.clone(),
        );

        let report = runner.run()?;

        let files: Vec<_> = fs::read_dir(&fx.options.dest_folder)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        assert_eq!(files.len(), 3);
        let names: HashSet<String> = files
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 3);
        for (idx, path) in report.artifacts.iter().enumerate() {
            assert_eq!(fs::read(path)?, PNG_BYTES);
            let name = path.file_name().unwrap_or_default().to_string_lossy().into_owned();
            let expected_start = format!("generated_CAM3_pedestrian_bicycle_{}_", idx + 1);
            assert!(name.starts_with(&expected_start), "{name}");
            assert!(name.ends_with(".png"));
        }
        assert_eq!(report.produced(), 3);
        assert_eq!(report.failed(), 0);
        assert_eq!(fs::read_dir(&fx.options.work_dir)?.count(), 0);
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_secs(2), Duration::from_secs(2)]
        );
        Ok(())
    }

    #[test]
    fn failures_are_counted_and_do_not_stop_the_loop() -> anyhow::Result<()> {
        let fx = fixture(4)?;
        let sleeper = Arc::new(RecordingSleeper::default());
        let transport = ScriptedTransport::new(vec![
            Scripted::Reply(reply(500, json!({ "error": "boom" }))),
            Scripted::Reply(reply(200, json!({ "candidates": [] }))),
            Scripted::Fail("tls handshake eof".to_string()),
            Scripted::Reply(image_reply(PNG_BYTES)),
        ]);
        let mut runner = runner(transport, sleeper.clone(), fx.options.clone());

        let report = runner.run()?;

        assert_eq!(report.requested, 4);
        assert_eq!(report.produced(), 1);
        assert_eq!(report.failed(), 3);
        assert_eq!(report.failures.get("http_error"), Some(&1));
        assert_eq!(report.failures.get("no_inline_image"), Some(&1));
        assert_eq!(report.failures.get("unexpected"), Some(&1));
        assert_eq!(fs::read_dir(&fx.options.dest_folder)?.count(), 1);
        assert_eq!(sleeper.recorded().len(), 3);

        let summary = report.to_summary(&fx.options);
        assert_eq!(summary.produced, 1);
        assert_eq!(summary.failed, 3);
        Ok(())
    }

    #[test]
    fn missing_input_produces_nothing_and_never_calls_the_service() -> anyhow::Result<()> {
        let fx = fixture(2)?;
        let mut options = fx.options.clone();
        options.input_image = fx.temp.path().join("missing.png");
        let transport = Arc::new(ScriptedTransport::always(image_reply(PNG_BYTES)));
        let client = EditClient::new(ClientConfig::new(ApiKey::new("k")?))
            .with_transport(transport.clone())
            .with_sleeper(Arc::new(RecordingSleeper::default()));
        let mut runner = AugmentRunner::new(client, options.clone(), StdRng::seed_from_u64(1));

        let report = runner.run()?;

        assert_eq!(transport.calls(), 0);
        assert_eq!(report.failures.get("missing_input"), Some(&2));
        assert!(options.dest_folder.is_dir());
        assert_eq!(fs::read_dir(&options.dest_folder)?.count(), 0);
        Ok(())
    }

    #[test]
    fn events_trace_each_round_trip() -> anyhow::Result<()> {
        let fx = fixture(2)?;
        let events_path = fx.temp.path().join("events.jsonl");
        let transport = ScriptedTransport::new(vec![
            Scripted::Reply(rate_limited()),
            Scripted::Reply(image_reply(PNG_BYTES)),
            Scripted::Reply(reply(403, json!({ "error": "API key not valid" }))),
        ]);
        let mut runner = runner(transport, Arc::new(RecordingSleeper::default()), fx.options.clone())
            .with_events(EventWriter::new(&events_path, "run-test"));

        let report = runner.run()?;
        assert_eq!(report.run_id, "run-test");

        let raw = fs::read_to_string(&events_path)?;
        let rows: Vec<Value> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .collect();
        let types: Vec<&str> = rows
            .iter()
            .filter_map(|row| row.get("type").and_then(Value::as_str))
            .collect();
        assert_eq!(
            types,
            vec![
                "run_started",
                "round_trip_started",
                "retry_scheduled",
                "artifact_created",
                "round_trip_started",
                "round_trip_failed",
                "run_finished",
            ]
        );
        assert_eq!(rows[2]["wait_s"], json!(10.0));
        assert_eq!(rows[5]["kind"], json!("http_error"));
        assert_eq!(rows[6]["produced"], json!(1));
        Ok(())
    }

    #[test]
    fn existing_destination_names_are_not_reused() -> anyhow::Result<()> {
        let fx = fixture(1)?;
        fs::create_dir_all(&fx.options.dest_folder)?;
        let prefix = fx.options.output_prefix();

        let mut probe = StdRng::seed_from_u64(42);
        let _ = super::SceneCounts::draw(&mut probe);
        let first_suffix: u32 = probe.gen_range(super::SUFFIX_RANGE);
        let taken = fx
            .options
            .dest_folder
            .join(format!("{prefix}_1_{first_suffix}.png"));
        fs::write(&taken, b"keep me")?;

        let mut runner = runner(
            ScriptedTransport::always(image_reply(PNG_BYTES)),
            Arc::new(RecordingSleeper::default()),
            fx.options.clone(),
        );
        let report = runner.run()?;

        assert_eq!(fs::read(&taken)?, b"keep me");
        assert_eq!(report.artifacts.len(), 1);
        assert_ne!(report.artifacts[0], taken);
        assert_eq!(fs::read_dir(&fx.options.dest_folder)?.count(), 2);
        Ok(())
    }

    #[test]
    fn exhausted_name_draws_yield_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("img_1_1000.png"), b"taken")?;
        let dirs = [temp.path()];
        let mut draws = 0;

        let picked = super::free_file_name(&dirs, 4, || {
            draws += 1;
            "img_1_1000.png".to_string()
        });
        assert_eq!(picked, None);
        assert_eq!(draws, 4);

        let mut names = ["img_1_1000.png", "img_1_2000.png"].into_iter();
        let picked = super::free_file_name(&dirs, 4, || {
            names.next().unwrap_or_default().to_string()
        });
        assert_eq!(picked.as_deref(), Some("img_1_2000.png"));
        Ok(())
    }

    #[test]
    fn output_prefix_defaults_to_input_stem() {
        let mut options = RunOptions::new("background_images/CAM7.jpg", "out", 1);
        assert_eq!(
            options.output_prefix(),
            "generated_CAM7_pedestrian_bicycle"
        );
        options.output_prefix = Some("custom".to_string());
        assert_eq!(options.output_prefix(), "custom");
    }
}
