//! Job configuration, read once from the process environment.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;
use tracing::warn;

use crate::error::{Error, Result};

pub const DEFAULT_ENV: &str = "uat";
pub const DEFAULT_CONTAINER: &str = "blob-container";
/// Australia/Perth, which observes no daylight saving.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 8 * 60;
pub const DEFAULT_SCHEDULE_SECS: u64 = 60;

/// Well-known account and key of the local storage emulator.
const DEV_ACCOUNT: &str = "devstoreaccount1";
const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEV_BLOB_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";

/// Deployment environment name, e.g. `uat` or `prod`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment(String);

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_uat(&self) -> bool {
        self.0 == "uat"
    }

    /// Environment-qualified secret name, e.g. `uat-pwd-secret`.
    pub fn secret_name(&self, stem: &str) -> String {
        format!("{}-{}-secret", self.0, stem)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where payloads and run logs are persisted.
#[derive(Clone, PartialEq, Eq)]
pub enum StorageDescriptor {
    /// Blob service authorised with the account key (SharedKey signing).
    SharedKey {
        blob_endpoint: String,
        account: String,
        account_key: String,
    },
    /// Blob service authorised with a shared access signature query string.
    Sas { blob_endpoint: String, sas: String },
    /// Local directory, one subdirectory per container.
    Local { root: PathBuf },
}

impl fmt::Debug for StorageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageDescriptor::SharedKey {
                blob_endpoint,
                account,
                ..
            } => f
                .debug_struct("SharedKey")
                .field("blob_endpoint", blob_endpoint)
                .field("account", account)
                .finish_non_exhaustive(),
            StorageDescriptor::Sas { blob_endpoint, .. } => f
                .debug_struct("Sas")
                .field("blob_endpoint", blob_endpoint)
                .finish_non_exhaustive(),
            StorageDescriptor::Local { root } => {
                f.debug_struct("Local").field("root", root).finish()
            }
        }
    }
}

impl StorageDescriptor {
    /// Parse a connection string or a `file://` directory URL.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if let Some(dir) = raw.strip_prefix("file://") {
            if dir.is_empty() {
                return Err(Error::Config("file:// storage needs a directory".into()));
            }
            return Ok(StorageDescriptor::Local {
                root: PathBuf::from(dir),
            });
        }

        // Values may contain '=' (base64 keys, SAS signatures), so split once.
        let parts: HashMap<&str, &str> = raw
            .split(';')
            .filter(|p| !p.trim().is_empty())
            .filter_map(|p| p.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();

        if parts
            .get("UseDevelopmentStorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Ok(StorageDescriptor::SharedKey {
                blob_endpoint: DEV_BLOB_ENDPOINT.into(),
                account: DEV_ACCOUNT.into(),
                account_key: DEV_ACCOUNT_KEY.into(),
            });
        }

        let explicit_endpoint = parts
            .get("BlobEndpoint")
            .map(|e| e.trim_end_matches('/').to_string());

        if let Some(sas) = parts.get("SharedAccessSignature") {
            let blob_endpoint = explicit_endpoint.ok_or_else(|| {
                Error::Config("SharedAccessSignature requires BlobEndpoint".into())
            })?;
            return Ok(StorageDescriptor::Sas {
                blob_endpoint,
                sas: sas.trim_start_matches('?').to_string(),
            });
        }

        match (parts.get("AccountName"), parts.get("AccountKey")) {
            (Some(account), Some(key)) => {
                let blob_endpoint = explicit_endpoint.unwrap_or_else(|| {
                    let protocol = parts.get("DefaultEndpointsProtocol").unwrap_or(&"https");
                    let suffix = parts.get("EndpointSuffix").unwrap_or(&"core.windows.net");
                    format!("{protocol}://{account}.blob.{suffix}")
                });
                Ok(StorageDescriptor::SharedKey {
                    blob_endpoint,
                    account: account.to_string(),
                    account_key: key.to_string(),
                })
            }
            _ => Err(Error::Config(
                "storage connection string needs AccountName/AccountKey, \
                 BlobEndpoint/SharedAccessSignature, or UseDevelopmentStorage"
                    .into(),
            )),
        }
    }
}

/// Top-level job configuration.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub environment: Environment,
    pub storage: StorageDescriptor,
    pub keyvault_url: String,
    pub container: String,
    /// Fixed offset used for output key timestamps.
    pub timezone: FixedOffset,
    /// Trigger period for the scheduled mode.
    pub schedule_interval: Duration,
}

impl JobConfig {
    /// Create configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("missing environment variable {key}")))
        };

        let environment = match lookup("DEPLOYMENT_ENV") {
            Some(env) => Environment::new(env),
            None => {
                warn!("DEPLOYMENT_ENV not set, defaulting to '{}'", DEFAULT_ENV);
                Environment::new(DEFAULT_ENV)
            }
        };
        let storage = StorageDescriptor::parse(&required("AzureWebJobsStorage")?)?;
        let keyvault_url = required("AZURE_KEYVAULT_URL")?
            .trim_end_matches('/')
            .to_string();
        let container =
            lookup("BOARDSYNC_CONTAINER").unwrap_or_else(|| DEFAULT_CONTAINER.into());

        let offset_minutes = match lookup("BOARDSYNC_UTC_OFFSET_MINUTES") {
            Some(v) => v.trim().parse::<i32>().map_err(|_| {
                Error::Config(format!("BOARDSYNC_UTC_OFFSET_MINUTES is not an integer: {v}"))
            })?,
            None => DEFAULT_UTC_OFFSET_MINUTES,
        };
        let timezone = FixedOffset::east_opt(offset_minutes * 60).ok_or_else(|| {
            Error::Config(format!("UTC offset out of range: {offset_minutes} minutes"))
        })?;

        let schedule_secs = match lookup("BOARDSYNC_SCHEDULE_SECS") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| {
                    Error::Config(format!("BOARDSYNC_SCHEDULE_SECS must be a positive integer: {v}"))
                })?,
            None => DEFAULT_SCHEDULE_SECS,
        };

        Ok(Self {
            environment,
            storage,
            keyvault_url,
            container,
            timezone,
            schedule_interval: Duration::from_secs(schedule_secs),
        })
    }
}
