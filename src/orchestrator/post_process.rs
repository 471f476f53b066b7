//! Post-run processing: log export and auto-save once a session ends.

use crate::orchestrator::SessionRecord;
use crate::storage;
use std::path::PathBuf;

/// Where a finished session's event log should be written.
#[derive(Debug, Clone, Default)]
pub struct OutputTargets {
    pub export_log: Option<PathBuf>,
    pub save: bool,
}

/// Result of post-run processing, ready for presentation layers.
#[derive(Debug, Default)]
pub struct ProcessedSession {
    pub messages: Vec<String>,
    pub exported_path: Option<PathBuf>,
    pub saved_path: Option<PathBuf>,
    /// At least one requested write failed.
    pub failed: bool,
}

/// Write the session's log to every requested target. Sessions that applied no
/// events are not written.
pub fn process_session(targets: &OutputTargets, record: &SessionRecord) -> ProcessedSession {
    let mut out = ProcessedSession::default();
    if targets.export_log.is_none() && !targets.save {
        return out;
    }
    if record.events.is_empty() {
        out.messages.push("No events captured; nothing written".into());
        return out;
    }

    let run_id = record.run_id.as_deref();
    if let Some(path) = targets.export_log.as_deref() {
        match storage::export_log(path, run_id, &record.events) {
            Ok(()) => {
                out.messages
                    .push(format!("Exported event log: {}", path.display()));
                out.exported_path = Some(path.to_path_buf());
            }
            Err(e) => {
                out.messages.push(format!("Export failed: {e}"));
                out.failed = true;
            }
        }
    }
    if targets.save {
        match storage::save_log(run_id, &record.events) {
            Ok(path) => {
                out.messages.push(format!("Saved: {}", path.display()));
                out.saved_path = Some(path);
            }
            Err(e) => {
                out.messages.push(format!("Save failed: {e}"));
                out.failed = true;
            }
        }
    }
    out
}
