//! Local directory backend, one subdirectory per container.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use boardsync_core::{Error, Result};
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::store::ObjectStore;

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn object_path(&self, container: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || container.is_empty() || container.contains(['/', '\\']) {
            return Err(Error::Storage(format!(
                "refusing to write outside the store: {container}/{key}"
            )));
        }
        Ok(self.root.join(container).join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put_object(&self, container: &str, key: &str, body: Bytes) -> Result<()> {
        let path = self.object_path(container, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("creating {}: {}", parent.display(), e)))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    Error::StorageConflict(format!("{} already exists", path.display()))
                }
                ErrorKind::NotFound => {
                    Error::StorageNotFound(format!("{} does not exist", path.display()))
                }
                _ => Error::Storage(format!("opening {}: {}", path.display(), e)),
            })?;
        file.write_all(&body)
            .await
            .map_err(|e| Error::Storage(format!("writing {}: {}", path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| Error::Storage(format!("flushing {}: {}", path.display(), e)))?;

        debug!("Wrote {} bytes to {}", body.len(), path.display());
        Ok(())
    }
}
