//! Blob storage for landed source files and canonical artifacts.
//!
//! A [`BlobStore`] is bound to one bucket and addressed by key. The
//! pipeline needs exactly three operations: a server-side copy (so
//! pass-through files never transit the process), a full read, and a write
//! with a declared content type.
//!
//! Backends:
//! - [`FsBlobStore`]: the bucket is a directory on the local filesystem
//! - [`MemoryBlobStore`]: in-process map, for tests
//! - `S3BlobStore` (`s3` feature): S3-compatible object storage

#[cfg(feature = "s3")]
pub mod s3;

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use legora_shared::{LegoraError, Result};
use tracing::debug;
use uuid::Uuid;

/// Suffix of the sidecar file holding an object's content type.
const CONTENT_TYPE_SUFFIX: &str = ".content-type";

/// Object storage bound to a single bucket.
#[async_trait]
pub trait BlobStore: Debug + Send + Sync {
    /// Bucket this store reads and writes.
    fn bucket(&self) -> &str;

    /// Copy `src_key` to `dst_key` inside the store, overwriting `dst_key`.
    async fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<()>;

    /// Fetch the full contents of `key`.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    /// Write `bytes` to `key` with the given content type, overwriting.
    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Filesystem backend
// ---------------------------------------------------------------------------

/// Blob store whose bucket is the directory `<root>/<bucket>`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never observes a partially written object.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    bucket: String,
    base_path: PathBuf,
}

impl FsBlobStore {
    /// Create a store for `bucket` under `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        let base_path = root.into().join(&bucket);
        Self { bucket, base_path }
    }

    /// Directory backing the bucket.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Content type recorded for `key`, if any.
    pub async fn content_type(&self, key: &str) -> Result<Option<String>> {
        let path = sidecar_path(&self.resolve_path(key)?);
        match tokio::fs::read_to_string(&path).await {
            Ok(ct) => Ok(Some(ct)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LegoraError::blob(key, format!("failed to read content type: {e}"))),
        }
    }

    /// Map a key to a path inside the bucket, rejecting escapes.
    fn resolve_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        let valid = !key.trim_matches('/').is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(LegoraError::blob(key, "invalid object key"));
        }
        Ok(self.base_path.join(relative))
    }

    async fn ensure_parent(&self, key: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LegoraError::blob(key, format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        Ok(())
    }

    async fn write_atomic(&self, key: &str, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = temp_path(path);
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| LegoraError::blob(key, format!("failed to write: {e}")))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| LegoraError::blob(key, format!("failed to rename into place: {e}")))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<()> {
        let src = self.resolve_path(src_key)?;
        let dst = self.resolve_path(dst_key)?;
        self.ensure_parent(dst_key, &dst).await?;

        let tmp = temp_path(&dst);
        tokio::fs::copy(&src, &tmp).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LegoraError::BlobNotFound {
                    key: src_key.to_string(),
                }
            } else {
                LegoraError::blob(dst_key, format!("failed to copy from {src_key}: {e}"))
            }
        })?;
        tokio::fs::rename(&tmp, &dst)
            .await
            .map_err(|e| LegoraError::blob(dst_key, format!("failed to rename into place: {e}")))?;

        // Object metadata travels with the copy.
        let src_meta = sidecar_path(&src);
        let dst_meta = sidecar_path(&dst);
        match tokio::fs::read(&src_meta).await {
            Ok(ct) => self.write_atomic(dst_key, &dst_meta, &ct).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let _ = tokio::fs::remove_file(&dst_meta).await;
            }
            Err(e) => {
                return Err(LegoraError::blob(src_key, format!("failed to read content type: {e}")));
            }
        }

        debug!(bucket = %self.bucket, src_key, dst_key, "copied object");
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve_path(key)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LegoraError::BlobNotFound {
                    key: key.to_string(),
                }
            } else {
                LegoraError::blob(key, format!("failed to read: {e}"))
            }
        })
    }

    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let path = self.resolve_path(key)?;
        self.ensure_parent(key, &path).await?;
        self.write_atomic(key, &path, &bytes).await?;
        self.write_atomic(key, &sidecar_path(&path), content_type.as_bytes())
            .await?;
        debug!(bucket = %self.bucket, key, len = bytes.len(), content_type, "put object");
        Ok(())
    }
}

/// `dir/.name.content-type` next to `dir/name`.
fn sidecar_path(path: &Path) -> PathBuf {
    hidden_sibling(path, CONTENT_TYPE_SUFFIX)
}

/// `dir/.name.tmp-<uuid>` next to `dir/name`, unique per write.
fn temp_path(path: &Path) -> PathBuf {
    hidden_sibling(path, &format!(".tmp-{}", Uuid::now_v7()))
}

fn hidden_sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}{suffix}"))
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// A stored object: bytes plus content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryObject {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// In-process blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    bucket: String,
    objects: RwLock<HashMap<String, MemoryObject>>,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Seed an object without a content type (as the crawler would land it).
    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.write_lock().insert(
            key.into(),
            MemoryObject {
                bytes: bytes.into(),
                content_type: None,
            },
        );
    }

    /// Snapshot of a stored object.
    pub fn object(&self, key: &str) -> Option<MemoryObject> {
        self.read_lock().get(key).cloned()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read_lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, MemoryObject>> {
        self.objects.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, MemoryObject>> {
        self.objects.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn copy_object(&self, src_key: &str, dst_key: &str) -> Result<()> {
        let mut objects = self.write_lock();
        let object = objects
            .get(src_key)
            .cloned()
            .ok_or_else(|| LegoraError::BlobNotFound {
                key: src_key.to_string(),
            })?;
        objects.insert(dst_key.to_string(), object);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        self.read_lock()
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| LegoraError::BlobNotFound {
                key: key.to_string(),
            })
    }

    async fn put_object(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.write_lock().insert(
            key.to_string(),
            MemoryObject {
                bytes,
                content_type: Some(content_type.to_string()),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Store rooted in a temp dir; the dir is removed when the guard drops.
    fn temp_store() -> (FsBlobStore, TempDir) {
        let dir = tempfile::tempdir().expect("temp dir");
        (FsBlobStore::new(dir.path(), "legora"), dir)
    }

    #[tokio::test]
    async fn fs_put_get_roundtrip() {
        let (store, _dir) = temp_store();
        store
            .put_object("processed/ADJ-1.html", b"<div>x</div>".to_vec(), "text/html")
            .await
            .expect("put");

        let bytes = store.get_object("processed/ADJ-1.html").await.expect("get");
        assert_eq!(bytes, b"<div>x</div>");
        assert!(store.base_path().join("processed/ADJ-1.html").is_file());
        assert_eq!(
            store.content_type("processed/ADJ-1.html").await.unwrap().as_deref(),
            Some("text/html")
        );
    }

    #[tokio::test]
    async fn fs_copy_is_byte_exact() {
        let (store, _dir) = temp_store();
        let landing = store.base_path().join("landing");
        std::fs::create_dir_all(&landing).unwrap();
        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        std::fs::write(landing.join("ADJ-1.pdf"), &payload).unwrap();

        store
            .copy_object("landing/ADJ-1.pdf", "processed/ADJ-1.pdf")
            .await
            .expect("copy");
        assert_eq!(store.get_object("processed/ADJ-1.pdf").await.unwrap(), payload);
        assert_eq!(store.content_type("processed/ADJ-1.pdf").await.unwrap(), None);

        // Overwriting copy is fine
        store
            .copy_object("landing/ADJ-1.pdf", "processed/ADJ-1.pdf")
            .await
            .expect("copy again");
    }

    #[tokio::test]
    async fn fs_missing_source_is_not_found() {
        let (store, _dir) = temp_store();
        let err = store
            .copy_object("landing/nope.pdf", "processed/nope.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, LegoraError::BlobNotFound { ref key } if key == "landing/nope.pdf"));

        let err = store.get_object("landing/nope.html").await.unwrap_err();
        assert!(matches!(err, LegoraError::BlobNotFound { .. }));
        assert!(!store.base_path().join("processed/nope.pdf").exists());
    }

    #[tokio::test]
    async fn fs_rejects_escaping_keys() {
        let (store, _dir) = temp_store();
        for key in ["../etc/passwd", "a/../../b", "", "/"] {
            let err = store.get_object(key).await.unwrap_err();
            assert!(err.to_string().contains("invalid object key"), "{key}");
        }
    }

    #[test]
    fn temp_paths_are_unique_per_write() {
        let path = Path::new("/bucket/processed/ADJ-1.pdf");
        let a = temp_path(path);
        let b = temp_path(path);
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        assert!(
            a.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(".ADJ-1.pdf.tmp-")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fs_concurrent_writes_to_one_key_all_succeed() {
        let (store, _dir) = temp_store();
        let store = Arc::new(store);
        let copied = vec![b'c'; 1 << 20];
        let written = vec![b'w'; 1 << 20];
        std::fs::create_dir_all(store.base_path().join("landing")).unwrap();
        std::fs::write(store.base_path().join("landing/ADJ-1.pdf"), &copied).unwrap();

        for _ in 0..20 {
            let copier = {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .copy_object("landing/ADJ-1.pdf", "processed/ADJ-1.pdf")
                        .await
                })
            };
            let writer = {
                let store = Arc::clone(&store);
                let bytes = written.clone();
                tokio::spawn(async move {
                    store
                        .put_object("processed/ADJ-1.pdf", bytes, "application/pdf")
                        .await
                })
            };
            copier.await.unwrap().expect("concurrent copy");
            writer.await.unwrap().expect("concurrent put");

            let stored = store.get_object("processed/ADJ-1.pdf").await.unwrap();
            assert!(stored == copied || stored == written, "torn object");
        }

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(store.base_path().join("processed"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn memory_copy_and_put() {
        let store = MemoryBlobStore::new("legora");
        store.insert("landing/a.pdf", b"%PDF".to_vec());

        store.copy_object("landing/a.pdf", "processed/a.pdf").await.unwrap();
        store
            .put_object("processed/b.html", b"<p/>".to_vec(), "text/html")
            .await
            .unwrap();

        assert_eq!(store.get_object("processed/a.pdf").await.unwrap(), b"%PDF");
        assert_eq!(
            store.object("processed/b.html").unwrap().content_type.as_deref(),
            Some("text/html")
        );
        assert_eq!(
            store.keys(),
            vec!["landing/a.pdf", "processed/a.pdf", "processed/b.html"]
        );
        assert!(store.copy_object("landing/missing", "x").await.is_err());
    }
}
