//! CSV rollup for archiving the session WAL.
//!
//! The CSV is synced before the WAL is renamed, so a crash in between can at
//! worst duplicate rows; history loading dedupes them by id.

use crate::registry::SessionOutcome;
use crate::wal::SessionRecord;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::Path;

/// A row of `sessions.csv`
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CsvRow {
    pub id: String,
    pub pattern_id: String,
    pub started_at: String,
    pub completed_at: String,
    pub duration_secs: f64,
    pub cycles: u32,
    pub final_prediction_error: f64,
    pub outcome: SessionOutcome,
}

impl From<&SessionRecord> for CsvRow {
    fn from(record: &SessionRecord) -> Self {
        CsvRow {
            id: record.id.to_string(),
            pattern_id: record.pattern_id.clone(),
            started_at: record.started_at.to_rfc3339(),
            completed_at: record.completed_at.to_rfc3339(),
            duration_secs: record.duration_secs,
            cycles: record.cycles,
            final_prediction_error: record.final_prediction_error,
            outcome: record.outcome,
        }
    }
}

/// Roll WAL records into the CSV and archive the WAL
///
/// Appends every record to the CSV (writing headers for a new file), syncs
/// it, then renames the WAL to `.wal.processed`. Returns the number of
/// records moved.
pub fn wal_to_csv_and_archive(wal_path: &Path, csv_path: &Path) -> Result<usize> {
    let records = crate::wal::read_records(wal_path)?;

    if records.is_empty() {
        tracing::info!("No sessions in WAL to roll up");
        return Ok(0);
    }

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)?;

    let needs_headers = file.metadata()?.len() == 0;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);

    for record in &records {
        writer.serialize(CsvRow::from(record))?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    file.sync_all()?;

    tracing::info!("Wrote {} sessions to {:?}", records.len(), csv_path);

    let processed_path = wal_path.with_extension("wal.processed");
    std::fs::rename(wal_path, &processed_path)?;
    tracing::info!("Archived WAL to {:?}", processed_path);

    Ok(records.len())
}

/// Remove `*.processed` WAL archives from a directory
pub fn cleanup_processed_wals(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "processed") {
            std::fs::remove_file(&path)?;
            tracing::debug!("Removed processed WAL: {:?}", path);
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Cleaned up {} processed WAL files", count);
    }
    Ok(count)
}
