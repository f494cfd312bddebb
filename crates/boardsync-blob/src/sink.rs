//! BlobSink: names and writes payloads and run logs.

use std::sync::Arc;

use boardsync_core::{Error, Result, RunRecord};
use bytes::Bytes;
use chrono::{FixedOffset, Utc};
use serde_json::Value;
use tracing::{error, info};

use crate::key::{log_key, OutputKeyFormat};
use crate::store::ObjectStore;

/// Writes fetched payloads and run-log documents to one container.
#[derive(Clone)]
pub struct BlobSink {
    store: Arc<dyn ObjectStore>,
    container: String,
    format: OutputKeyFormat,
    timezone: FixedOffset,
}

impl BlobSink {
    pub fn new(store: Arc<dyn ObjectStore>, container: impl Into<String>, timezone: FixedOffset) -> Self {
        Self {
            store,
            container: container.into(),
            format: OutputKeyFormat::default(),
            timezone,
        }
    }

    pub fn with_format(mut self, format: OutputKeyFormat) -> Self {
        self.format = format;
        self
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Payload key for the current second in the configured timezone.
    pub fn generate_output_key(&self) -> String {
        let now = Utc::now().with_timezone(&self.timezone);
        let key = self.format.payload_key(&now);
        info!("Generated output filename: {}", key);
        key
    }

    /// Upload a fetched payload and return the key it was written under.
    ///
    /// Text payloads are written as-is, anything else as JSON. An absent or
    /// empty payload is rejected before any storage call.
    pub async fn ingest(&self, payload: Option<&Value>) -> Result<String> {
        let payload = match payload {
            Some(p) if !is_empty_payload(p) => p,
            _ => {
                error!("No data provided for upload");
                return Err(Error::Validation("no data to upload".into()));
            }
        };
        let body = match payload {
            Value::String(text) => Bytes::from(text.clone()),
            other => Bytes::from(serde_json::to_vec(other)?),
        };

        let key = self.generate_output_key();
        info!("Starting upload of data to {}/{}", self.container, key);
        match self.store.put_object(&self.container, &key, body).await {
            Ok(()) => {
                info!("Data successfully uploaded to {}/{}", self.container, key);
                Ok(key)
            }
            Err(e) => {
                match &e {
                    Error::StorageConflict(_) => {
                        error!("Blob already exists and overwrite is disabled {}: {}", key, e)
                    }
                    Error::StorageNotFound(_) => {
                        error!("Specified container/blob does not exist {}: {}", key, e)
                    }
                    _ => error!(kind = e.kind(), "Storage error during upload of {}: {}", key, e),
                }
                Err(e)
            }
        }
    }

    /// Persist the run-log document under the log namespace.
    ///
    /// Keyed by write time, independent of the payload key. Failures are
    /// returned, never dropped.
    pub async fn write_logs(&self, record: &RunRecord) -> Result<String> {
        let key = log_key(&Utc::now().with_timezone(&self.timezone));
        let body = Bytes::from(record.to_json()?);

        match self.store.put_object(&self.container, &key, body).await {
            Ok(()) => {
                info!(
                    status = ?record.status(),
                    records_pulled = record.records_pulled(),
                    "Run log written to {}/{}",
                    self.container,
                    key
                );
                Ok(key)
            }
            Err(e) => {
                error!(kind = e.kind(), "Error uploading run log {}: {}", key, e);
                Err(e)
            }
        }
    }
}

/// Null, `false`, zero and empty strings, arrays or objects carry no data.
fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}
