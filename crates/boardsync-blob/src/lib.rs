//! Durable object storage for fetched payloads and run logs.
//!
//! [`BlobSink`] names and writes objects; [`ObjectStore`] backends
//! (blob service, local directory, memory) do the actual puts with
//! create-only semantics.

pub mod azure;
pub mod key;
pub mod local;
pub mod sink;
pub mod store;

pub use azure::AzureBlobStore;
pub use key::{log_key, OutputKeyFormat, LOG_NAMESPACE};
pub use local::LocalStore;
pub use sink::BlobSink;
pub use store::{store_from_descriptor, MemoryStore, ObjectStore, PutOp, StoreFailure};
