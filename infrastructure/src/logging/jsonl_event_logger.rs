//! JSONL file writer for orchestration events.
//!
//! Each [`OrchestrationEvent`] becomes one JSON line carrying its `type` and
//! the event's own `timestamp`, appended through a buffered writer. The file
//! is opened in append mode so one log can span many runs.

use civic_application::ports::event_logger::{EventLogger, OrchestrationEvent};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Event logger that writes one JSON object per line.
///
/// Thread-safe via `Mutex<BufWriter<File>>`. Flushes after every event and on `Drop`.
pub struct JsonlEventLogger {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl JsonlEventLogger {
    /// Open (or create) the log at `path`, creating parent directories.
    ///
    /// Returns `None` if the file cannot be opened.
    pub fn new(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(
                    "Could not create event log directory {}: {}",
                    parent.display(),
                    e
                );
                return None;
            }
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Could not open event log {}: {}", path.display(), e);
                return None;
            }
        };

        Some(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn to_record(event: OrchestrationEvent) -> Value {
    let timestamp = event
        .at
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

    // Merge payload with type + timestamp
    match event.payload {
        Value::Object(mut map) => {
            map.insert("type".to_string(), Value::String(event.event_type.to_string()));
            map.insert("timestamp".to_string(), Value::String(timestamp));
            Value::Object(map)
        }
        other => serde_json::json!({
            "type": event.event_type,
            "timestamp": timestamp,
            "data": other,
        }),
    }
}

impl EventLogger for JsonlEventLogger {
    fn log(&self, event: OrchestrationEvent) {
        let Ok(line) = serde_json::to_string(&to_record(event)) else {
            return;
        };

        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", line);
            let _ = writer.flush();
        }
    }
}

impl Drop for JsonlEventLogger {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_writes_transition_with_timestamp_and_reason() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("events.jsonl");
        let logger = JsonlEventLogger::new(&path).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 10, 30, 0).unwrap();

        logger.log(OrchestrationEvent::new(
            "circuit_transition",
            at,
            json!({ "domain": "parking", "from": "closed", "to": "open", "reason": "failure_threshold" }),
        ));
        logger.log(OrchestrationEvent::new(
            "step_status",
            at,
            json!({ "instance_id": "wf-1", "step_id": "license", "to": "succeeded" }),
        ));
        drop(logger);

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "circuit_transition");
        assert_eq!(lines[0]["timestamp"], "2025-06-01T10:30:00.000Z");
        assert_eq!(lines[0]["reason"], "failure_threshold");
        assert_eq!(lines[1]["step_id"], "license");
    }

    #[test]
    fn test_appends_across_loggers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let at = Utc::now();

        for i in 0..2 {
            let logger = JsonlEventLogger::new(&path).unwrap();
            logger.log(OrchestrationEvent::new("workflow_status", at, json!({ "run": i })));
        }

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["run"], 1);
    }

    #[test]
    fn test_non_object_payload_is_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let logger = JsonlEventLogger::new(&path).unwrap();
        logger.log(OrchestrationEvent::new("note", Utc::now(), json!("just a string")));
        drop(logger);

        let lines = read_lines(&path);
        assert_eq!(lines[0]["type"], "note");
        assert_eq!(lines[0]["data"], "just a string");
    }
}
