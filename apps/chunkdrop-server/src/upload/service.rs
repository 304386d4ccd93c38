//! Upload Service
//!
//! Runs a validated upload request through the pipeline:
//! 1. Derive the storage key and report rewritten names
//! 2. Enforce the payload limit
//! 3. Decode the payload with the obfuscation codec
//! 4. Store it directly, or as a chunk of a session that is assembled once
//!    the last chunk has been written

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use super::assembly::AssemblyEngine;
use super::chunk_store::ChunkStore;
use super::session::SessionRegistry;
use super::types::{
    ChunkProgress, ChunkSpec, UploadError, UploadLimits, UploadReceipt, UploadRequest,
};
use crate::codec::ObfuscationCodec;
use crate::security::{SecurityEventKind, SecurityLog};
use crate::storage::{sanitize, StorageRoot};

/// Result of one abandoned-session sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: usize,
    pub artifacts: usize,
}

/// Upload pipeline shared by all request handlers
#[derive(Clone)]
pub struct UploadService {
    inner: Arc<UploadServiceInner>,
}

struct UploadServiceInner {
    codec: ObfuscationCodec,
    uploads: StorageRoot,
    chunks: ChunkStore,
    registry: SessionRegistry,
    assembly: AssemblyEngine,
    security: SecurityLog,
    limits: UploadLimits,
}

impl UploadService {
    pub fn new(
        codec: ObfuscationCodec,
        uploads: StorageRoot,
        chunks: StorageRoot,
        security: SecurityLog,
        limits: UploadLimits,
    ) -> Self {
        let registry = SessionRegistry::new();
        let chunks = ChunkStore::new(chunks);
        let assembly = AssemblyEngine::new(registry.clone(), chunks.clone(), uploads.clone());

        Self {
            inner: Arc::new(UploadServiceInner {
                codec,
                uploads,
                chunks,
                registry,
                assembly,
                security,
                limits,
            }),
        }
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.inner.limits
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn assembly(&self) -> &AssemblyEngine {
        &self.inner.assembly
    }

    pub fn security(&self) -> &SecurityLog {
        &self.inner.security
    }

    /// Accept one upload request from `client`
    pub async fn accept(
        &self,
        request: UploadRequest,
        client: IpAddr,
    ) -> Result<UploadReceipt, UploadError> {
        let UploadRequest {
            original_name,
            payload,
            chunk,
        } = request;

        let storage_key = sanitize(&original_name);
        if storage_key != original_name {
            self.inner
                .security
                .record(
                    SecurityEventKind::FilenameSanitized,
                    &format!("Filename sanitized: '{}' -> '{}'", original_name, storage_key),
                    Some(client),
                )
                .await;
        }

        let max = self.inner.limits.max_artifact_size;
        if payload.len() > max {
            self.inner
                .security
                .record(
                    SecurityEventKind::FileSizeExceeded,
                    &format!(
                        "File size exceeded limit: {} bytes for {}",
                        payload.len(),
                        storage_key
                    ),
                    Some(client),
                )
                .await;
            return Err(UploadError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        // Each payload (every chunk included) is transformed from offset zero
        let data = self.inner.codec.decode(payload);

        let result = match chunk {
            None => self.store_single(&storage_key, &data).await,
            Some(spec) => self.store_chunk(&original_name, spec, &data).await,
        };

        if let Err(UploadError::PathSafetyViolation(e)) = &result {
            self.inner
                .security
                .record(
                    SecurityEventKind::PathTraversalAttempt,
                    &format!("Attempted path traversal in upload of '{}': {}", original_name, e),
                    Some(client),
                )
                .await;
        }

        result
    }

    async fn store_single(
        &self,
        storage_key: &str,
        data: &[u8],
    ) -> Result<UploadReceipt, UploadError> {
        let dest = self.inner.uploads.resolve(storage_key).await?;
        self.inner.uploads.write_atomic(&dest, data).await?;

        tracing::info!(storage_key = %storage_key, size = data.len(), "Stored upload");

        Ok(UploadReceipt::Stored {
            name: storage_key.to_string(),
        })
    }

    async fn store_chunk(
        &self,
        original_name: &str,
        spec: ChunkSpec,
        data: &[u8],
    ) -> Result<UploadReceipt, UploadError> {
        let ticket = self
            .inner
            .registry
            .begin_or_continue(original_name, spec.index, spec.total)?;

        if ticket.duplicate {
            tracing::debug!(
                storage_key = %ticket.storage_key,
                chunk_index = ticket.index,
                "Chunk re-sent, replacing artifact"
            );
        }

        let written = self
            .inner
            .chunks
            .write(&ticket.storage_key, ticket.index, data)
            .await;
        let progress = self.inner.registry.settle(&ticket, written.is_ok());
        written?;

        match progress {
            ChunkProgress::Pending { received, total } => {
                tracing::debug!(
                    storage_key = %ticket.storage_key,
                    chunk_index = ticket.index,
                    received = received,
                    total = total,
                    "Chunk received"
                );
                Ok(UploadReceipt::ChunkAccepted {
                    name: ticket.storage_key,
                    index: ticket.index,
                    total: ticket.total,
                })
            }
            ChunkProgress::Ready(session) => {
                let stored = self.inner.assembly.assemble(session).await?;
                Ok(UploadReceipt::Assembled {
                    name: stored.name,
                    total: ticket.total,
                })
            }
            ChunkProgress::Detached => {
                // The artifact would never be claimed by a later session
                if let Err(e) = self.inner.chunks.remove(&ticket.storage_key, ticket.index).await {
                    tracing::warn!(error = %e, "Failed to delete detached chunk");
                }
                Err(UploadError::SessionRemoved {
                    name: ticket.original_name,
                })
            }
        }
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Remove sessions idle for longer than `max_idle`, their artifacts, and
    /// artifacts of the same age that no session owns.
    pub async fn sweep_idle(&self, max_idle: Duration) -> SweepReport {
        let mut report = SweepReport::default();

        for session in self.inner.registry.expire_idle(max_idle) {
            tracing::info!(
                original_name = %session.original_name,
                received = session.received_count(),
                total = session.total_chunks,
                "Expired abandoned upload session"
            );
            report.sessions += 1;
            report.artifacts += self
                .inner
                .chunks
                .discard_session(&session.storage_key, session.total_chunks)
                .await;
        }

        let live: HashSet<String> = self.inner.registry.storage_keys().into_iter().collect();
        match self.inner.chunks.prune_stale(max_idle, &live).await {
            Ok(pruned) => report.artifacts += pruned,
            Err(e) => tracing::warn!(error = %e, "Failed to prune stale chunk artifacts"),
        }

        report
    }

    /// Spawn the periodic abandoned-session sweep
    pub fn start_sweep_task(
        &self,
        interval: Duration,
        max_idle: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let report = service.sweep_idle(max_idle).await;
                if report.sessions > 0 || report.artifacts > 0 {
                    tracing::info!(
                        sessions = report.sessions,
                        artifacts = report.artifacts,
                        "Session sweep removed abandoned uploads"
                    );
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
