//! Object store seam and two backends.
//!
//! - [`FsObjectStore`] maps keys onto files under a root directory, which is
//!   how a mounted environment bucket is addressed.
//! - [`MemoryObjectStore`] keeps objects in memory and can be told to fail
//!   specific keys; it backs the reconciliation tests.
//!
//! Both expose a precomputed SHA-256 content digest, so drift checks never
//! need to download an object.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::{store_io_err, StoreError};

/// Narrow object-store interface consumed by the reconciler.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Copy a local file to `key`, replacing any existing object.
    async fn upload(&self, key: &str, local_path: &Path) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All object keys under `prefix`, sorted. Directory markers are omitted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn download(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Hex SHA-256 of the object's bytes, as maintained by the store.
    async fn content_digest(&self, key: &str) -> Result<String, StoreError>;
}

/// Hex SHA-256 of an in-memory buffer.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hex SHA-256 of a file, streamed in 64 KiB chunks.
pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Filesystem backend
// ---------------------------------------------------------------------------

/// Object store backed by a directory (e.g. a `gcsfuse` mount of the bucket).
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key);
        let valid = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StoreError::InvalidKey {
                key: key.to_owned(),
            });
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload(&self, key: &str, local_path: &Path) -> Result<(), StoreError> {
        let dest = self.path_for(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| store_io_err(parent, e))?;
        }
        // Staged beside the destination; the rename replaces it in one step.
        let tmp = PathBuf::from(format!("{}.dagger.tmp", dest.display()));
        tokio::fs::copy(local_path, &tmp)
            .await
            .map_err(|e| store_io_err(local_path, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &dest).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(store_io_err(&dest, e));
        }
        tracing::debug!(key, "uploaded object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_owned(),
            }),
            Err(e) => Err(store_io_err(&path, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && dir == self.root => {
                    return Ok(keys);
                }
                Err(e) => return Err(store_io_err(&dir, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| store_io_err(&dir, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| store_io_err(&path, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.ends_with(".dagger.tmp") {
                    continue;
                }
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_owned(),
            }),
            Err(e) => Err(store_io_err(&path, e)),
        }
    }

    async fn content_digest(&self, key: &str) -> Result<String, StoreError> {
        let path = self.path_for(key)?;
        match sha256_file(&path).await {
            Ok(digest) => Ok(digest),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_owned(),
            }),
            Err(e) => Err(store_io_err(&path, e)),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, Vec<u8>>,
    failing: BTreeSet<String>,
}

/// In-memory object store. Cloning shares the underlying objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly.
    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.lock().objects.insert(key.into(), bytes.into());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    /// Make every operation touching `key` fail with a backend error.
    pub fn fail_key(&self, key: impl Into<String>) {
        self.lock().failing.insert(key.into());
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn check(state: &MemoryState, key: &str) -> Result<(), StoreError> {
    if state.failing.contains(key) {
        return Err(StoreError::Backend {
            key: key.to_owned(),
            message: "injected failure".to_owned(),
        });
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, key: &str, local_path: &Path) -> Result<(), StoreError> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|e| store_io_err(local_path, e))?;
        let mut state = self.lock();
        check(&state, key)?;
        state.objects.insert(key.to_owned(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        check(&state, key)?;
        state
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_owned(),
            })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let state = self.lock();
        Ok(state
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix) && !k.ends_with('/'))
            .cloned()
            .collect())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let state = self.lock();
        check(&state, key)?;
        state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_owned(),
            })
    }

    async fn content_digest(&self, key: &str) -> Result<String, StoreError> {
        let state = self.lock();
        check(&state, key)?;
        state
            .objects
            .get(key)
            .map(|bytes| sha256_hex(bytes))
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_owned(),
            })
    }
}
