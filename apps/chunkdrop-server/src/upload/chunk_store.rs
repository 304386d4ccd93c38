//! Chunk Store
//!
//! Temporary storage for received chunks before assembly. Each chunk lives in
//! the chunk root as `{storage_key}.chunk{index}` and is owned by its session
//! until the assembly engine consumes it.

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::types::UploadError;
use crate::storage::{PathSafetyError, StorageRoot};

/// Separator between storage key and chunk index in artifact names
const CHUNK_MARKER: &str = ".chunk";

/// Local filesystem chunk storage
#[derive(Clone)]
pub struct ChunkStore {
    inner: Arc<ChunkStoreInner>,
}

struct ChunkStoreInner {
    root: StorageRoot,
}

impl ChunkStore {
    pub fn new(root: StorageRoot) -> Self {
        Self {
            inner: Arc::new(ChunkStoreInner { root }),
        }
    }

    pub fn root(&self) -> &StorageRoot {
        &self.inner.root
    }

    /// On-disk name of one chunk artifact
    pub fn artifact_name(storage_key: &str, index: u32) -> String {
        format!("{}{}{}", storage_key, CHUNK_MARKER, index)
    }

    /// Verified path of one chunk artifact
    pub async fn artifact_path(
        &self,
        storage_key: &str,
        index: u32,
    ) -> Result<PathBuf, PathSafetyError> {
        self.inner
            .root
            .resolve(&Self::artifact_name(storage_key, index))
            .await
    }

    /// Store a chunk; replaces an earlier copy of the same index
    pub async fn write(
        &self,
        storage_key: &str,
        index: u32,
        data: &[u8],
    ) -> Result<PathBuf, UploadError> {
        let path = self.artifact_path(storage_key, index).await?;
        self.inner.root.write_atomic(&path, data).await?;

        tracing::debug!(
            storage_key = %storage_key,
            chunk_index = index,
            size = data.len(),
            "Stored chunk"
        );

        Ok(path)
    }

    /// Delete one artifact; `Ok(false)` if it was already gone
    pub async fn remove(&self, storage_key: &str, index: u32) -> Result<bool, UploadError> {
        let path = self.artifact_path(storage_key, index).await?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every artifact of a session, returning how many existed
    pub async fn discard_session(&self, storage_key: &str, total_chunks: u32) -> usize {
        let mut count = 0;
        for index in 0..total_chunks {
            match self.remove(storage_key, index).await {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    storage_key = %storage_key,
                    chunk_index = index,
                    error = %e,
                    "Failed to delete chunk"
                ),
            }
        }
        count
    }

    /// Delete artifacts older than `max_age` that belong to no live session.
    ///
    /// Catches chunks orphaned by a restart, which loses the in-memory
    /// sessions but not the files.
    pub async fn prune_stale(
        &self,
        max_age: Duration,
        live_keys: &HashSet<String>,
    ) -> io::Result<usize> {
        let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
            return Ok(0);
        };

        let mut pruned = 0;
        let mut entries = tokio::fs::read_dir(self.inner.root.path()).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();

            if let Some((key, _)) = parse_artifact_name(&name) {
                if live_keys.contains(key) {
                    continue;
                }
            }

            if !entry.file_type().await?.is_file() {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            if modified > cutoff {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => pruned += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        if pruned > 0 {
            tracing::info!(count = pruned, "Pruned stale chunk artifacts");
        }
        Ok(pruned)
    }
}

/// Split `{storage_key}.chunk{index}` into its parts
fn parse_artifact_name(name: &str) -> Option<(&str, u32)> {
    let (key, index) = name.rsplit_once(CHUNK_MARKER)?;
    if key.is_empty() {
        return None;
    }
    Some((key, index.parse().ok()?))
}

// ============================================================================
// Tests
// ============================================================================
