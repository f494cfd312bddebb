//! Run-record model persisted once per invocation.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::error::Result;

/// Log message recorded for a run in which every stage succeeded.
pub const SUCCESS_MESSAGE: &str = "Data pulled and uploaded successfully";

/// Timestamp layout used in the persisted log document.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f %z";

/// Outcome of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Success,
    Failed,
}

/// Severity attached to the run-record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Error,
}

/// Structured outcome of one invocation.
///
/// Built only through [`RunRecord::succeeded`] and [`RunRecord::failed`], so
/// `status` and `log_level` always agree.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    file_name: Option<String>,
    #[serde(serialize_with = "serialize_timestamp")]
    start_time: DateTime<Utc>,
    #[serde(serialize_with = "serialize_timestamp")]
    end_time: DateTime<Utc>,
    duration: f64,
    status: RunStatus,
    records_pulled: usize,
    log_level: LogLevel,
    log_message: String,
}

impl RunRecord {
    pub fn succeeded(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        records_pulled: usize,
        file_name: Option<String>,
    ) -> Self {
        Self {
            file_name,
            start_time,
            end_time,
            duration: seconds_between(start_time, end_time),
            status: RunStatus::Success,
            records_pulled,
            log_level: LogLevel::Info,
            log_message: SUCCESS_MESSAGE.to_string(),
        }
    }

    pub fn failed(
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        records_pulled: usize,
        file_name: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file_name,
            start_time,
            end_time,
            duration: seconds_between(start_time, end_time),
            status: RunStatus::Failed,
            records_pulled,
            log_level: LogLevel::Error,
            log_message: message.into(),
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn records_pulled(&self) -> usize {
        self.records_pulled
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn log_message(&self) -> &str {
        &self.log_message
    }

    /// Serialize the record as the JSON log document.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Number of records in a fetched payload.
///
/// Only a JSON array counts; objects, scalars and null count as zero even
/// when they carry data.
pub fn records_in(payload: &serde_json::Value) -> usize {
    payload.as_array().map_or(0, Vec::len)
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let elapsed = end - start;
    match elapsed.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => elapsed.num_milliseconds() as f64 / 1_000.0,
    }
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_str(&ts.format(TIMESTAMP_FORMAT))
}
