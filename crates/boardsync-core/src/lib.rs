//! Boardsync core: error taxonomy, job configuration and the run-record model.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Environment, JobConfig, StorageDescriptor};
pub use error::{Error, Result};
pub use types::{records_in, LogLevel, RunRecord, RunStatus, SUCCESS_MESSAGE};
