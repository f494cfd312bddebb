//! Deterministic object keys.
//!
//! Keys carry second-resolution timestamps, so two writes in the same
//! second map to the same key; the store reports that as a conflict.

use std::fmt::Display;

use chrono::{DateTime, TimeZone};

/// Namespace holding run-log documents.
pub const LOG_NAMESPACE: &str = "api-observability-logs";

const KEY_TIMESTAMP: &str = "%Y%m%d_%H%M%S";

/// Parts of a payload key: `{prefix}{build}_{entity}_{timestamp}_{suffix}.{extension}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputKeyFormat {
    pub prefix: String,
    pub build: String,
    pub entity: String,
    pub suffix: String,
    pub extension: String,
}

impl Default for OutputKeyFormat {
    fn default() -> Self {
        Self {
            prefix: "JUVARE".into(),
            build: "001".into(),
            entity: "PATIENT".into(),
            suffix: "D".into(),
            extension: "JSON".into(),
        }
    }
}

impl OutputKeyFormat {
    /// Payload key for a write at `at`, rendered in `at`'s own timezone.
    pub fn payload_key<Tz>(&self, at: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        format!(
            "{}{}_{}_{}_{}.{}",
            self.prefix,
            self.build,
            self.entity,
            at.format(KEY_TIMESTAMP),
            self.suffix,
            self.extension
        )
    }
}

/// Run-log key for a write at `at`.
pub fn log_key<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!("{}/log_{}.json", LOG_NAMESPACE, at.format(KEY_TIMESTAMP))
}
