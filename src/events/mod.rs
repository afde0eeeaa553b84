//! DH-020: Run events, rendered as console lines and an append-only JSONL log.
//!
//! There is no global logger. The CLI builds one `EventLog` and hands it
//! `&mut` to the dispatcher and handlers.

pub mod clock;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        recipe: String,
        steps: usize,
        dockhand_version: String,
    },
    StepStarted {
        index: usize,
        kind: String,
        container: String,
    },
    ContainerStarted {
        container: String,
    },
    ContainerStopped {
        container: String,
    },
    StderrOutput {
        container: String,
        text: String,
    },
    BackupCompleted {
        container: String,
        archive: String,
        bytes_written: u64,
        compressed_bytes: u64,
        digest: String,
        duration_seconds: f64,
    },
    StepFailed {
        index: usize,
        kind: String,
        error: String,
    },
    RunCompleted {
        run_id: String,
        steps_completed: usize,
        total_seconds: f64,
    },
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunStarted {
                run_id,
                recipe,
                steps,
                ..
            } => write!(f, "Running {} ({} steps, {})", recipe, steps, run_id),
            Self::StepStarted {
                index,
                kind,
                container,
            } => write!(f, "[{}] {} on {}", index, kind, container),
            Self::ContainerStarted { container } => write!(f, "Started container {}", container),
            Self::ContainerStopped { container } => write!(f, "Stopped container {}", container),
            Self::StderrOutput { container, text } => {
                write!(f, "{} stderr: {}", container, text.trim_end())
            }
            Self::BackupCompleted {
                bytes_written,
                archive,
                ..
            } => write!(f, "Wrote {} bytes to {}", bytes_written, archive),
            Self::StepFailed { index, error, .. } => write!(f, "[{}] FAILED: {}", index, error),
            Self::RunCompleted {
                steps_completed,
                total_seconds,
                ..
            } => write!(
                f,
                "Completed {} steps in {:.1}s",
                steps_completed, total_seconds
            ),
        }
    }
}

/// Timestamped event wrapper, one JSONL line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

/// Where run events go.
#[derive(Debug, Default)]
pub struct EventLog {
    console: bool,
    jsonl: Option<PathBuf>,
    events: Vec<TimestampedEvent>,
}

impl EventLog {
    /// Log to stderr (if `console`) and append to `jsonl` (if set).
    pub fn new(console: bool, jsonl: Option<PathBuf>) -> Self {
        Self {
            console,
            jsonl,
            events: Vec::new(),
        }
    }

    /// Keep events in memory only.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Record an event. Sink failures are reported on stderr, never raised.
    pub fn emit(&mut self, event: RunEvent) {
        let te = TimestampedEvent {
            ts: clock::now_iso8601(),
            event,
        };
        if self.console {
            eprintln!("{}", te.event);
        }
        if let Some(ref path) = self.jsonl {
            if let Err(e) = append_event(path, &te) {
                eprintln!("warning: {}", e);
            }
        }
        self.events.push(te);
    }

    /// Events emitted so far, oldest first.
    pub fn events(&self) -> &[TimestampedEvent] {
        &self.events
    }
}

/// Append one event as a JSON line.
pub fn append_event(path: &Path, event: &TimestampedEvent) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
        }
    }

    let json = serde_json::to_string(event).map_err(|e| format!("JSON serialize error: {}", e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dh020_silent_retains() {
        let mut log = EventLog::silent();
        log.emit(RunEvent::ContainerStarted {
            container: "db1".to_string(),
        });
        assert_eq!(log.events().len(), 1);
        assert!(log.events()[0].ts.ends_with('Z'));
    }

    #[test]
    fn test_dh020_jsonl_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/events.jsonl");
        let mut log = EventLog::new(false, Some(path.clone()));
        log.emit(RunEvent::ContainerStopped {
            container: "db1".to_string(),
        });
        log.emit(RunEvent::BackupCompleted {
            container: "db1".to_string(),
            archive: "/out/db1.sql.gz".to_string(),
            bytes_written: 16,
            compressed_bytes: 36,
            digest: "blake3:abc".to_string(),
            duration_seconds: 0.5,
        });

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#""event":"container_stopped""#));
        let parsed: TimestampedEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.event, log.events()[1].event);
    }

    #[test]
    fn test_dh020_unwritable_sink_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the log file should be
        let mut log = EventLog::new(false, Some(dir.path().to_path_buf()));
        log.emit(RunEvent::ContainerStarted {
            container: "db1".to_string(),
        });
        assert_eq!(log.events().len(), 1);
    }

    #[test]
    fn test_dh020_display_lines() {
        let done = RunEvent::BackupCompleted {
            container: "db1".to_string(),
            archive: "/out/db1.sql.gz".to_string(),
            bytes_written: 16,
            compressed_bytes: 36,
            digest: "blake3:abc".to_string(),
            duration_seconds: 0.1,
        };
        assert_eq!(done.to_string(), "Wrote 16 bytes to /out/db1.sql.gz");
        let stopped = RunEvent::ContainerStopped {
            container: "db1".to_string(),
        };
        assert_eq!(stopped.to_string(), "Stopped container db1");
    }
}
