//! Event-log files: export, auto-save under the platform data dir, and load for replay.

use crate::errors::StorageError;
use crate::model::{decode_log, Event};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Serialize)]
struct LogFileOut<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<&'a str>,
    exported_at: String,
    events: &'a [Event],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LogFileIn {
    Wrapped { events: Vec<Value> },
    Bare(Vec<Value>),
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

fn io_err(path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Io(format!("{}: {e}", path.display()))
}

/// Write `events` as `{"run_id", "exported_at", "events": [...]}`.
pub fn export_log(path: &Path, run_id: Option<&str>, events: &[Event]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let file = LogFileOut {
        run_id,
        exported_at: now_rfc3339(),
        events,
    };
    let data =
        serde_json::to_vec_pretty(&file).map_err(|e| StorageError::Parse(e.to_string()))?;
    std::fs::write(path, data).map_err(|e| io_err(path, e))
}

/// Read a log written by [`export_log`], a server replay body, or a bare array.
/// Unknown and malformed entries are skipped.
pub fn load_log(path: &Path) -> Result<Vec<Event>, StorageError> {
    let data = std::fs::read(path).map_err(|e| io_err(path, e))?;
    let file: LogFileIn =
        serde_json::from_slice(&data).map_err(|e| StorageError::Parse(e.to_string()))?;
    let values = match file {
        LogFileIn::Wrapped { events } => events,
        LogFileIn::Bare(events) => events,
    };
    let (events, rejected) = decode_log(values);
    for e in &rejected {
        warn!(path = %path.display(), error = %e, "skipping malformed log entry");
    }
    Ok(events)
}

/// Directory for auto-saved logs.
pub fn runs_dir() -> Result<PathBuf, StorageError> {
    dirs::data_dir()
        .map(|d| d.join("arena-watch").join("runs"))
        .ok_or(StorageError::NoDataDir)
}

/// Save under [`runs_dir`], named by time and run id. Returns the written path.
pub fn save_log(run_id: Option<&str>, events: &[Event]) -> Result<PathBuf, StorageError> {
    save_log_in(&runs_dir()?, run_id, events)
}

pub fn save_log_in(
    dir: &Path,
    run_id: Option<&str>,
    events: &[Event],
) -> Result<PathBuf, StorageError> {
    let stamp = time::OffsetDateTime::now_utc()
        .format(time::macros::format_description!(
            "[year][month][day]-[hour][minute][second]"
        ))
        .unwrap_or_else(|_| "now".into());
    let name = format!("run-{stamp}-{}.json", sanitize(run_id.unwrap_or("local")));
    let path = dir.join(name);
    export_log(&path, run_id, events)?;
    Ok(path)
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ErrorPayload, RunEvent, VariantStartPayload};

    fn sample() -> Vec<Event> {
        vec![
            Event::new(
                1,
                RunEvent::VariantStart(VariantStartPayload {
                    variant_id: "v1".into(),
                    prompt_spec: "terse".into(),
                }),
            ),
            Event::new(
                9,
                RunEvent::Error(ErrorPayload {
                    error: Some("quota".into()),
                }),
            ),
        ]
    }

    #[test]
    fn exported_log_loads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("run.json");
        export_log(&path, Some("r1"), &sample()).expect("export");

        let raw: Value = serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("json");
        assert_eq!(raw["run_id"], "r1");
        assert_eq!(raw["events"].as_array().map(Vec::len), Some(2));

        assert_eq!(load_log(&path).expect("load"), sample());
    }

    #[test]
    fn loads_bare_arrays_and_skips_unknown_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bare.json");
        std::fs::write(
            &path,
            r#"[{"type":"Ping","payload":{},"ts":0},{"type":"VariantStart","payload":{"variant_id":"v1","prompt_spec":"terse"},"ts":1}]"#,
        )
        .expect("write");
        let events = load_log(&path).expect("load");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind.variant_id(), Some("v1"));
    }

    #[test]
    fn rejects_non_log_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("other.json");
        std::fs::write(&path, r#"{"hello":"world"}"#).expect("write");
        assert!(matches!(load_log(&path), Err(StorageError::Parse(_))));
        assert!(matches!(
            load_log(&dir.path().join("missing.json")),
            Err(StorageError::Io(_))
        ));
    }

    #[test]
    fn saved_file_name_carries_sanitized_run_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = save_log_in(dir.path(), Some("a/b c"), &sample()).expect("save");
        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("run-"));
        assert!(name.ends_with("-a_b_c.json"));
        assert!(path.exists());
    }
}
