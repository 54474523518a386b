//! Append-only JSON lines activity log.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use dirops_core::Error;
use dirops_engine::{AuditEvent, AuditSink};

/// Writes one JSON object per audit event.
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Opens (creating if needed) the log file and its parent directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open activity log {}", path.display()))?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonLinesSink {
    fn accept(&self, event: &AuditEvent) -> dirops_core::Result<()> {
        let line = serde_json::to_string(event)
            .map_err(|err| Error::SinkUnavailable(format!("cannot encode event: {err}")))?;

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(file, "{line}")
            .and_then(|()| file.flush())
            .map_err(|err| {
                Error::SinkUnavailable(format!("cannot write {}: {err}", self.path.display()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirops_engine::{AuditAction, OperationStatus};

    #[test]
    fn appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("activity.log");

        let sink = JsonLinesSink::open(&path).unwrap();
        for status in [OperationStatus::Success, OperationStatus::Cancelled] {
            let event = AuditEvent::new(
                "operator",
                AuditAction::AddToGroup,
                "CN=Staff,DC=example",
                status,
                "done",
            );
            sink.accept(&event).unwrap();
        }
        drop(sink);

        let reopened = JsonLinesSink::open(&path).unwrap();
        reopened
            .accept(&AuditEvent::new(
                "operator",
                AuditAction::Connect,
                "dc1",
                OperationStatus::Success,
                "connected",
            ))
            .unwrap();

        let contents = fs::read_to_string(reopened.path()).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["status"], "success");
        assert_eq!(lines[1]["status"], "cancelled");
        assert_eq!(lines[2]["action"], "connect");
        assert_eq!(lines[2]["user"], "operator");
        assert_eq!(lines[2]["object"], "dc1");
    }
}
