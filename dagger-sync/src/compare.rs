//! Content comparison between a working-tree file and its deployed object.
//!
//! The local side is hashed by streaming the file; the remote side is the
//! digest the store already keeps, so nothing is downloaded.

use std::path::Path;

use dagger_core::store::sha256_file;
use dagger_core::ObjectStore;

use crate::error::CompareError;

/// SHA-256 hex digest of a local file.
pub async fn local_digest(path: &Path) -> Result<String, CompareError> {
    sha256_file(path).await.map_err(|source| CompareError::Local {
        path: path.to_path_buf(),
        source,
    })
}

/// Whether `local_path` and the object at `key` hold identical bytes.
pub async fn content_equals(
    local_path: &Path,
    store: &dyn ObjectStore,
    key: &str,
) -> Result<bool, CompareError> {
    let local = local_digest(local_path).await?;
    let remote = store
        .content_digest(key)
        .await
        .map_err(|source| CompareError::Remote {
            key: key.to_owned(),
            source,
        })?;
    Ok(local.eq_ignore_ascii_case(&remote))
}
