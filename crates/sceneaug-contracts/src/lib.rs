//! Shared run records for SceneAug: the append-only event log and the
//! end-of-run summary document.

pub mod events;
pub mod runs;

/// Fresh identifier for one augmentation run.
pub fn new_run_id() -> String {
    format!("run-{}", uuid::Uuid::new_v4().simple())
}

pub fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}
