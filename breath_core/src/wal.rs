//! Write-Ahead Log (WAL) for session history and event-log export.
//!
//! Finished sessions are appended to a JSONL (JSON Lines) file with file
//! locking. Kernel event logs use the same line format so they can be
//! audited or replayed later.

use crate::events::KernelEvent;
use crate::registry::SessionOutcome;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// One completed (or abandoned) breathing session
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub id: Uuid,
    pub pattern_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub cycles: u32,
    pub final_prediction_error: f64,
    pub outcome: SessionOutcome,
}

impl SessionRecord {
    /// Sessions long enough to count toward tier unlocks
    pub fn is_quality(&self, min_duration_secs: f64) -> bool {
        self.duration_secs > min_duration_secs
    }
}

/// Destination for finished sessions
pub trait HistorySink {
    fn append(&mut self, record: &SessionRecord) -> Result<()>;
}

/// JSONL-based history sink with file locking
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl HistorySink for JsonlSink {
    fn append(&mut self, record: &SessionRecord) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(record)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        file.unlock()?;

        tracing::debug!("Appended session {} to WAL", record.id);
        Ok(())
    }
}

/// Parse every line of a JSONL file, skipping lines that do not parse
fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut items = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<T>(&line) {
            Ok(item) => items.push(item),
            Err(e) => {
                tracing::warn!("Failed to parse {} at line {}: {}", what, line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} {}s from {:?}", items.len(), what, path);
    Ok(items)
}

/// Read all session records from a WAL file
pub fn read_records(path: &Path) -> Result<Vec<SessionRecord>> {
    read_jsonl(path, "session")
}

/// Write a kernel event log as JSONL, replacing any existing file
pub fn export_event_log(path: &Path, events: &[KernelEvent]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        for event in events {
            serde_json::to_writer(&mut writer, event)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;

    tracing::info!("Exported {} events to {:?}", events.len(), path);
    Ok(())
}

/// Read an exported event log in order
pub fn read_event_log(path: &Path) -> Result<Vec<KernelEvent>> {
    if !path.exists() {
        return Err(Error::Other(format!("event log {:?} does not exist", path)));
    }
    read_jsonl(path, "event")
}
