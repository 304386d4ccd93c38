//! Assembly Engine
//!
//! Merges the chunk artifacts of a completed session into the final stored
//! file. The destination is written as a partial file and renamed into place,
//! so an interrupted merge never leaves a truncated file under the real name.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::chunk_store::ChunkStore;
use super::session::SessionRegistry;
use super::types::{StoredFile, UploadError, UploadSession};
use crate::storage::StorageRoot;

/// Concatenates chunk artifacts in index order
#[derive(Clone)]
pub struct AssemblyEngine {
    inner: Arc<AssemblyEngineInner>,
}

struct AssemblyEngineInner {
    registry: SessionRegistry,
    chunks: ChunkStore,
    uploads: StorageRoot,
    assembled: AtomicU64,
}

impl AssemblyEngine {
    pub fn new(registry: SessionRegistry, chunks: ChunkStore, uploads: StorageRoot) -> Self {
        Self {
            inner: Arc::new(AssemblyEngineInner {
                registry,
                chunks,
                uploads,
                assembled: AtomicU64::new(0),
            }),
        }
    }

    /// Number of files assembled since startup
    pub fn assembled_count(&self) -> u64 {
        self.inner.assembled.load(Ordering::Relaxed)
    }

    /// Merge a completed session into `{upload_root}/{storage_key}`.
    ///
    /// The session must already have been taken out of the registry (see
    /// [`SessionRegistry::settle`]). On failure it is handed back with the
    /// unusable indices cleared, so re-sent chunks can complete it again.
    pub async fn assemble(&self, session: UploadSession) -> Result<StoredFile, UploadError> {
        let dest = match self.inner.uploads.resolve(&session.storage_key).await {
            Ok(dest) => dest,
            Err(e) => {
                self.inner.registry.restore(session, &[]);
                return Err(e.into());
            }
        };

        // Every artifact must be present before the destination is touched
        let mut artifacts = Vec::with_capacity(session.total_chunks as usize);
        let mut missing = Vec::new();
        for index in 0..session.total_chunks {
            let path = match self.inner.chunks.artifact_path(&session.storage_key, index).await {
                Ok(path) => path,
                Err(e) => {
                    self.inner.registry.restore(session, &[]);
                    return Err(e.into());
                }
            };
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => artifacts.push(path),
                _ => missing.push(index),
            }
        }

        if !missing.is_empty() {
            tracing::warn!(
                storage_key = %session.storage_key,
                missing = ?missing,
                "Chunk artifacts missing at assembly"
            );
            let name = session.storage_key.clone();
            self.inner.registry.restore(session, &missing);
            return Err(UploadError::AssemblyIncomplete { name, missing });
        }

        let mut partial = match self.inner.uploads.create_partial().await {
            Ok(partial) => partial,
            Err(source) => {
                let name = session.storage_key.clone();
                self.inner.registry.restore(session, &[]);
                return Err(UploadError::AssemblyFailed { name, source });
            }
        };

        let mut size = 0u64;
        for (index, path) in artifacts.iter().enumerate() {
            let copied = async {
                let mut chunk = tokio::fs::File::open(path).await?;
                let n = tokio::io::copy(&mut chunk, &mut partial.file).await?;
                tokio::fs::remove_file(path).await?;
                Ok::<_, std::io::Error>(n)
            }
            .await;

            match copied {
                Ok(n) => size += n,
                Err(source) => {
                    partial.discard().await;
                    // Artifacts up to and including this one may be gone
                    let consumed: Vec<u32> = (0..=index as u32).collect();
                    let name = session.storage_key.clone();
                    self.inner.registry.restore(session, &consumed);
                    return Err(UploadError::AssemblyFailed { name, source });
                }
            }
        }

        if let Err(source) = partial.commit(&dest).await {
            let consumed: Vec<u32> = (0..session.total_chunks).collect();
            let name = session.storage_key.clone();
            self.inner.registry.restore(session, &consumed);
            return Err(UploadError::AssemblyFailed { name, source });
        }

        self.inner.assembled.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            storage_key = %session.storage_key,
            total_chunks = session.total_chunks,
            size = size,
            "Assembled upload"
        );

        Ok(StoredFile {
            name: session.storage_key,
            path: dest,
            size,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
