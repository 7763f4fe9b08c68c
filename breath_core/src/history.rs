//! Session history loading.
//!
//! History lives in two places: the live WAL and the archived CSV. Loading
//! merges both, dedupes by id and sorts newest first.

use crate::csv_rollup::CsvRow;
use crate::registry::PracticeStats;
use crate::wal::SessionRecord;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use csv::ReaderBuilder;
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("Invalid date '{}': {}", value, e)))
}

impl TryFrom<CsvRow> for SessionRecord {
    type Error = Error;

    fn try_from(row: CsvRow) -> Result<Self> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| Error::Other(format!("Invalid UUID: {}", e)))?;

        Ok(SessionRecord {
            id,
            pattern_id: row.pattern_id,
            started_at: parse_time(&row.started_at)?,
            completed_at: parse_time(&row.completed_at)?,
            duration_secs: row.duration_secs,
            cycles: row.cycles,
            final_prediction_error: row.final_prediction_error,
            outcome: row.outcome,
        })
    }
}

/// Load every recorded session from the WAL and the CSV archive
///
/// Records are sorted by completion time, newest first. A record present in
/// both files is returned once.
pub fn load_session_history(wal_path: &Path, csv_path: &Path) -> Result<Vec<SessionRecord>> {
    let mut records = Vec::new();
    let mut seen_ids = HashSet::new();

    if wal_path.exists() {
        for record in crate::wal::read_records(wal_path)? {
            if seen_ids.insert(record.id) {
                records.push(record);
            }
        }
        tracing::debug!("Loaded {} sessions from WAL", records.len());
    }

    if csv_path.exists() {
        let mut csv_count = 0;
        for record in load_records_from_csv(csv_path)? {
            if seen_ids.insert(record.id) {
                records.push(record);
                csv_count += 1;
            }
        }
        tracing::debug!("Loaded {} sessions from CSV", csv_count);
    }

    records.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
    tracing::debug!("Loaded {} sessions of history", records.len());
    Ok(records)
}

fn load_records_from_csv(path: &Path) -> Result<Vec<SessionRecord>> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;

    let mut records = Vec::new();
    for result in reader.deserialize::<CsvRow>() {
        match result {
            Ok(row) => match SessionRecord::try_from(row) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Failed to parse CSV row: {}", e),
            },
            Err(e) => tracing::warn!("Failed to deserialize CSV row: {}", e),
        }
    }
    Ok(records)
}

impl PracticeStats {
    /// Count sessions longer than `min_duration_secs`
    pub fn from_records(records: &[SessionRecord], min_duration_secs: f64) -> Self {
        PracticeStats {
            quality_sessions: records
                .iter()
                .filter(|r| r.is_quality(min_duration_secs))
                .count(),
        }
    }
}

/// Most recent session on a given pattern
pub fn last_session_for<'a>(
    records: &'a [SessionRecord],
    pattern_id: &str,
) -> Option<&'a SessionRecord> {
    records.iter().find(|r| r.pattern_id == pattern_id)
}
