// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Key-addressed blob store backends.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Body bytes as they arrive from a backend.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid blob key {0:?}")]
    InvalidKey(String),
    #[error("reading blob {key:?}: {source}")]
    Io {
        key: String,
        source: std::io::Error,
    },
}

/// An object fetched from a [`BlobStore`].
pub struct BlobObject {
    pub key: String,
    pub size: u64,
    pub body: ByteStream,
}

impl std::fmt::Debug for BlobObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobObject")
            .field("key", &self.key)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetches the object at `key`, or `None` if there isn't one.
    async fn get(&self, key: &str) -> Result<Option<BlobObject>, StoreError>;
}

/// Blob store kept as files under a root directory; keys are relative paths.
#[derive(Debug, Clone)]
pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !is_plain {
            return Err(StoreError::InvalidKey(key.to_owned()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for DirBlobStore {
    async fn get(&self, key: &str) -> Result<Option<BlobObject>, StoreError> {
        let path = self.path_of(key)?;
        let io_err = |source| StoreError::Io {
            key: key.to_owned(),
            source,
        };

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {key:?} not found at {}", path.display());
                return Ok(None);
            }
            Err(err) => return Err(io_err(err)),
        };
        let metadata = file.metadata().await.map_err(io_err)?;
        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(BlobObject {
            key: key.to_owned(),
            size: metadata.len(),
            body: ReaderStream::new(file).boxed(),
        }))
    }
}

/// Blob store held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    objects: HashMap<String, Bytes>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bytes>) {
        self.objects.insert(key.into(), value.into());
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Option<BlobObject>, StoreError> {
        let object = self.objects.get(key).map(|value| BlobObject {
            key: key.to_owned(),
            size: value.len() as u64,
            body: futures::stream::iter([Ok(value.clone())]).boxed(),
        });
        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn read_all(object: BlobObject) -> Vec<u8> {
        let chunks: Vec<Bytes> = object.body.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn dir_store_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("androidapp")).unwrap();
        std::fs::write(dir.path().join("androidapp/41.apk"), b"apk bytes").unwrap();

        let store = DirBlobStore::new(dir.path());
        let object = store.get("androidapp/41.apk").await.unwrap().unwrap();
        assert_eq!(object.size, 9);
        assert_eq!(read_all(object).await, b"apk bytes");

        assert!(store.get("androidapp/42.apk").await.unwrap().is_none());
        // directories are not objects
        assert!(store.get("androidapp").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dir_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirBlobStore::new(dir.path());
        for key in ["../etc/passwd", "/etc/passwd", "a/../../b", "", "./a"] {
            assert!(
                matches!(store.get(key).await, Err(StoreError::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn memory_store() {
        let mut store = MemoryBlobStore::new();
        store.insert("geoip/2022/1/dbip.v4", "v4");
        let object = store.get("geoip/2022/1/dbip.v4").await.unwrap().unwrap();
        assert_eq!(object.size, 2);
        assert_eq!(read_all(object).await, b"v4");
        assert!(store.get("geoip/2022/1/dbip.v6").await.unwrap().is_none());
    }
}
