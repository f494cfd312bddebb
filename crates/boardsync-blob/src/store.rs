//! Object store contract and the in-memory backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use boardsync_core::{Error, Result, StorageDescriptor};
use bytes::Bytes;
use parking_lot::Mutex;

use crate::azure::AzureBlobStore;
use crate::local::LocalStore;

/// Durable object storage.
///
/// `put_object` creates a new object and never overwrites:
/// - existing key → `Error::StorageConflict`
/// - missing container → `Error::StorageNotFound`
/// - any other backend failure → `Error::Storage`
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, container: &str, key: &str, body: Bytes) -> Result<()>;
}

/// Build the backend a storage descriptor points at.
pub fn store_from_descriptor(descriptor: &StorageDescriptor) -> Result<Arc<dyn ObjectStore>> {
    Ok(match descriptor {
        StorageDescriptor::Local { root } => Arc::new(LocalStore::new(root)),
        other => Arc::new(AzureBlobStore::from_descriptor(other)?),
    })
}

/// Media type for an object key.
pub(crate) fn content_type_for(key: &str) -> &'static str {
    let is_json = key
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case("json"));
    if is_json {
        "application/json"
    } else {
        "application/octet-stream"
    }
}

/// Failure a [`MemoryStore`] can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFailure {
    Conflict,
    NotFound,
    Backend,
}

/// Record of an attempted put.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOp {
    pub container: String,
    pub key: String,
    pub size: usize,
}

/// In-memory store that records every put attempt.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<HashMap<(String, String), Bytes>>>,
    operations: Arc<Mutex<Vec<PutOp>>>,
    failures: Arc<Mutex<Vec<(String, StoreFailure)>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail puts whose key starts with `prefix`.
    pub fn inject_failure(&self, prefix: impl Into<String>, failure: StoreFailure) {
        self.failures.lock().push((prefix.into(), failure));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// All put attempts, successful or not, in order.
    pub fn operations(&self) -> Vec<PutOp> {
        self.operations.lock().clone()
    }

    pub fn get(&self, container: &str, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .get(&(container.to_string(), key.to_string()))
            .cloned()
    }

    /// Stored keys in `container`, sorted.
    pub fn keys(&self, container: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(&self, container: &str, key: &str, body: Bytes) -> Result<()> {
        self.operations.lock().push(PutOp {
            container: container.to_string(),
            key: key.to_string(),
            size: body.len(),
        });

        let injected = self
            .failures
            .lock()
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map(|(_, failure)| *failure);
        match injected {
            Some(StoreFailure::Conflict) => {
                return Err(Error::StorageConflict(format!("{container}/{key} already exists")))
            }
            Some(StoreFailure::NotFound) => {
                return Err(Error::StorageNotFound(format!("container {container} does not exist")))
            }
            Some(StoreFailure::Backend) => {
                return Err(Error::Storage(format!("injected failure for {container}/{key}")))
            }
            None => {}
        }

        let mut objects = self.objects.lock();
        let slot = (container.to_string(), key.to_string());
        if objects.contains_key(&slot) {
            return Err(Error::StorageConflict(format!("{container}/{key} already exists")));
        }
        objects.insert(slot, body);
        Ok(())
    }
}
