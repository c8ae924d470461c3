use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

/// Attachment bytes with the content type the store knows for them.
#[derive(Debug, Clone)]
pub struct BlobObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Read-only attachment storage. The worker never writes; uploads happen at
/// the out-of-scope front door.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, blob_key: &str) -> Result<BlobObject>;
}

/// Filesystem-rooted blob store. Keys are relative paths below the root;
/// anything that would escape the root is rejected.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, blob_key: &str) -> Result<PathBuf> {
        let relative = Path::new(blob_key);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if blob_key.is_empty() || escapes {
            return Err(EngineError::InvalidInput(format!(
                "Invalid blob key: {blob_key}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, blob_key: &str) -> Result<BlobObject> {
        let path = self.resolve(blob_key)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::BlobMissing(blob_key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let content_type = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string();

        Ok(BlobObject {
            bytes,
            content_type,
        })
    }
}

/// In-memory blob store for tests and local runs.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, BlobObject>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, blob_key: impl Into<String>, bytes: Vec<u8>, content_type: &str) {
        self.blobs.write().expect("blob lock poisoned").insert(
            blob_key.into(),
            BlobObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, blob_key: &str) -> Result<BlobObject> {
        self.blobs
            .read()
            .expect("blob lock poisoned")
            .get(blob_key)
            .cloned()
            .ok_or_else(|| EngineError::BlobMissing(blob_key.to_string()))
    }
}
