//! Lock ledger records.
//!
//! A `LockRecord` is one row of the shared ledger. Every column is what the
//! holder wrote; in particular `locked_at` is kept as text because another
//! machine (or an operator editing the sheet by hand) may have left a value
//! that does not parse.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::JobId;

/// Separator used when appending to `notes`.
pub const NOTES_SEPARATOR: &str = " | ";

/// Lock status.
///
/// State transitions:
/// - (absent) -> Processing
/// - Processing -> Completed | Failed
/// - Processing -> Processing (re-acquire after timeout)
/// - Failed -> Processing (retry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStatus {
    Processing,
    Completed,
    Failed,
}

impl LockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LockStatus::Processing => "processing",
            LockStatus::Completed => "completed",
            LockStatus::Failed => "failed",
        }
    }

    /// Statuses the retention sweep may delete.
    pub fn is_settled(self) -> bool {
        matches!(self, LockStatus::Completed | LockStatus::Failed)
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the lock ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub job_id: JobId,
    pub locked_by: String,
    pub locked_at: String,
    pub status: LockStatus,
    pub machine_id: String,
    #[serde(default)]
    pub notes: String,
}

impl LockRecord {
    /// A fresh PROCESSING record held by `holder`.
    pub fn processing(
        job_id: JobId,
        holder: &str,
        now: DateTime<Utc>,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            locked_by: holder.to_string(),
            locked_at: format_timestamp(now),
            status: LockStatus::Processing,
            machine_id: holder.to_string(),
            notes: notes.into(),
        }
    }

    /// `locked_at` as a timestamp, or `None` if the cell does not parse.
    pub fn locked_at_time(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.locked_at)
    }

    /// Time since the lock was taken, or `None` if `locked_at` is unparsable.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.locked_at_time().map(|at| now - at)
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, update: &LockUpdate) {
        if let Some(locked_by) = &update.locked_by {
            self.locked_by = locked_by.clone();
        }
        if let Some(locked_at) = &update.locked_at {
            self.locked_at = locked_at.clone();
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(machine_id) = &update.machine_id {
            self.machine_id = machine_id.clone();
        }
        if let Some(notes) = &update.notes {
            self.notes = notes.clone();
        }
    }
}

/// Column-wise partial update (`None` leaves the column untouched).
///
/// The ledger has no compare-and-swap, so an update is a blind write of the
/// given columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockUpdate {
    pub locked_by: Option<String>,
    pub locked_at: Option<String>,
    pub status: Option<LockStatus>,
    pub machine_id: Option<String>,
    pub notes: Option<String>,
}

impl LockUpdate {
    /// Overwrite the holder columns and restart the lock clock.
    pub fn take_over(holder: &str, now: DateTime<Utc>) -> Self {
        Self {
            locked_by: Some(holder.to_string()),
            locked_at: Some(format_timestamp(now)),
            status: Some(LockStatus::Processing),
            machine_id: Some(holder.to_string()),
            notes: None,
        }
    }

    pub fn status(status: LockStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Join `existing` and `addition` with [`NOTES_SEPARATOR`].
pub fn append_notes(existing: &str, addition: &str) -> String {
    match (existing.is_empty(), addition.is_empty()) {
        (_, true) => existing.to_string(),
        (true, false) => addition.to_string(),
        (false, false) => format!("{existing}{NOTES_SEPARATOR}{addition}"),
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Accepts RFC 3339 and naive ISO-8601 (`2026-01-15T08:33:21.978436`, read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
