//! Upload Session Registry
//!
//! Tracks chunked uploads that are still being received:
//! - Sessions keyed by the client-declared original name
//! - Storage key derived once, at session creation
//! - One mutex over the whole table, never held across disk I/O
//!
//! A chunk goes through two calls. [`SessionRegistry::begin_or_continue`]
//! validates it against the session and records the index; the caller then
//! writes the artifact and reports back with [`SessionRegistry::settle`].
//! Settling is where completion is observed: the session is removed from the
//! table and handed to exactly one caller once every index is present and no
//! write is still in flight.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use super::types::{ChunkProgress, ChunkTicket, UploadError, UploadSession};
use crate::storage::sanitize;

// ============================================================================
// Session Registry
// ============================================================================

/// Shared table of in-progress chunked uploads
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<SessionRegistryInner>,
}

#[derive(Default)]
struct SessionRegistryInner {
    /// Active sessions indexed by original name
    sessions: Mutex<HashMap<String, UploadSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Chunk Lifecycle
    // ========================================================================

    /// Validate a chunk and record its index, creating the session on first use.
    ///
    /// Re-sending an index already received is accepted and flagged as a
    /// duplicate. The returned ticket must be passed to [`settle`](Self::settle)
    /// once the artifact write finished or failed.
    pub fn begin_or_continue(
        &self,
        original_name: &str,
        index: u32,
        total_chunks: u32,
    ) -> Result<ChunkTicket, UploadError> {
        let mut sessions = self.inner.sessions.lock();

        let storage_key = sanitize(original_name);
        // Chunk artifacts are named by storage key; two live sessions sharing
        // one would overwrite each other's chunks
        let key_taken = sessions
            .iter()
            .any(|(name, s)| name != original_name && s.storage_key == storage_key);

        let session = match sessions.entry(original_name.to_string()) {
            Entry::Occupied(entry) => {
                let session = entry.into_mut();
                if session.total_chunks != total_chunks {
                    return Err(UploadError::ChunkCountMismatch {
                        expected: session.total_chunks,
                        declared: total_chunks,
                    });
                }
                if index >= total_chunks {
                    return Err(UploadError::ChunkIndexOutOfRange {
                        index,
                        total: total_chunks,
                    });
                }
                session
            }
            Entry::Vacant(entry) => {
                if total_chunks == 0 || index >= total_chunks {
                    return Err(UploadError::ChunkIndexOutOfRange {
                        index,
                        total: total_chunks,
                    });
                }
                if key_taken {
                    return Err(UploadError::StorageKeyInUse { storage_key });
                }

                tracing::info!(
                    original_name = %original_name,
                    storage_key = %storage_key,
                    total_chunks = total_chunks,
                    "Created upload session"
                );

                entry.insert(UploadSession::new(original_name, storage_key, total_chunks))
            }
        };

        let fresh = session.mark_received(index);
        session.in_flight += 1;
        session.touch();

        Ok(ChunkTicket {
            session_id: session.id,
            original_name: session.original_name.clone(),
            storage_key: session.storage_key.clone(),
            index,
            total: total_chunks,
            duplicate: !fresh,
        })
    }

    /// Report the artifact write for a ticket.
    ///
    /// A failed write un-records the index, unless the ticket re-sent an
    /// index that was already recorded: the earlier write stands. Returns
    /// [`ChunkProgress::Ready`] to the single caller that completes the session.
    pub fn settle(&self, ticket: &ChunkTicket, written: bool) -> ChunkProgress {
        let mut sessions = self.inner.sessions.lock();

        let Some(session) = sessions
            .get_mut(&ticket.original_name)
            .filter(|s| s.id == ticket.session_id)
        else {
            return ChunkProgress::Detached;
        };

        session.in_flight = session.in_flight.saturating_sub(1);
        if !written && !ticket.duplicate {
            session.clear_received(ticket.index);
        }

        if !(session.is_complete() && session.in_flight == 0) {
            return ChunkProgress::Pending {
                received: session.received_count(),
                total: session.total_chunks,
            };
        }

        // Removal under the lock is the one completion transition
        sessions
            .remove(&ticket.original_name)
            .map_or(ChunkProgress::Detached, ChunkProgress::Ready)
    }

    /// Whether the named session has every chunk recorded
    pub fn is_complete(&self, original_name: &str) -> bool {
        self.inner
            .sessions
            .lock()
            .get(original_name)
            .is_some_and(UploadSession::is_complete)
    }

    /// Copy of the named session, if any
    pub fn snapshot(&self, original_name: &str) -> Option<UploadSession> {
        self.inner.sessions.lock().get(original_name).cloned()
    }

    /// Drop a session (abandonment)
    pub fn remove(&self, original_name: &str) -> Option<UploadSession> {
        let removed = self.inner.sessions.lock().remove(original_name);
        if let Some(session) = &removed {
            tracing::info!(
                original_name = %original_name,
                received = session.received_count(),
                total = session.total_chunks,
                "Upload session removed"
            );
        }
        removed
    }

    /// Give a session back after a failed assembly.
    ///
    /// `missing` indices are cleared so that re-sent chunks complete the
    /// session again. If a new session for the same name was started in the
    /// meantime, the returned session is dropped instead.
    pub fn restore(&self, mut session: UploadSession, missing: &[u32]) -> bool {
        for index in missing {
            session.clear_received(*index);
        }
        session.in_flight = 0;
        session.touch();

        let mut sessions = self.inner.sessions.lock();
        match sessions.entry(session.original_name.clone()) {
            Entry::Vacant(entry) => {
                tracing::warn!(
                    original_name = %session.original_name,
                    missing = ?missing,
                    "Upload session restored for retry"
                );
                entry.insert(session);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Remove sessions idle for longer than `max_idle` with no write in flight.
    ///
    /// Returns the removed sessions so their artifacts can be deleted.
    pub fn expire_idle(&self, max_idle: Duration) -> Vec<UploadSession> {
        let Some(cutoff) = chrono::Duration::from_std(max_idle)
            .ok()
            .and_then(|idle| Utc::now().checked_sub_signed(idle))
        else {
            return Vec::new();
        };

        let mut sessions = self.inner.sessions.lock();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.in_flight == 0 && s.last_touched <= cutoff)
            .map(|(name, _)| name.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|name| sessions.remove(&name))
            .collect()
    }

    /// Storage keys of all live sessions
    pub fn storage_keys(&self) -> Vec<String> {
        self.inner
            .sessions
            .lock()
            .values()
            .map(|s| s.storage_key.clone())
            .collect()
    }

    /// Get session count
    pub fn len(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn settle_ok(registry: &SessionRegistry, name: &str, index: u32, total: u32) -> ChunkProgress {
        let ticket = registry.begin_or_continue(name, index, total).unwrap();
        registry.settle(&ticket, true)
    }

    #[test]
    fn test_first_chunk_creates_session() {
        let registry = SessionRegistry::new();
        let ticket = registry.begin_or_continue("../secret/report.pdf", 1, 3).unwrap();

        assert_eq!(ticket.storage_key, "report.pdf");
        assert!(!ticket.duplicate);
        assert_eq!(registry.len(), 1);

        let session = registry.snapshot("../secret/report.pdf").unwrap();
        assert_eq!(session.total_chunks, 3);
        assert!(session.has_chunk(1));
    }

    #[test]
    fn test_completes_regardless_of_order() {
        let registry = SessionRegistry::new();

        assert!(matches!(
            settle_ok(&registry, "a.bin", 2, 3),
            ChunkProgress::Pending { received: 1, total: 3 }
        ));
        assert!(matches!(
            settle_ok(&registry, "a.bin", 0, 3),
            ChunkProgress::Pending { received: 2, total: 3 }
        ));
        match settle_ok(&registry, "a.bin", 1, 3) {
            ChunkProgress::Ready(session) => {
                assert!(session.is_complete());
                assert_eq!(session.storage_key, "a.bin");
            }
            other => panic!("expected ready, got {:?}", other),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_index_is_a_no_op() {
        let registry = SessionRegistry::new();
        settle_ok(&registry, "a.bin", 0, 2);

        let ticket = registry.begin_or_continue("a.bin", 0, 2).unwrap();
        assert!(ticket.duplicate);
        assert!(matches!(
            registry.settle(&ticket, true),
            ChunkProgress::Pending { received: 1, total: 2 }
        ));
        assert!(!registry.is_complete("a.bin"));
    }

    #[test]
    fn test_count_mismatch_leaves_session_untouched() {
        let registry = SessionRegistry::new();
        settle_ok(&registry, "a.bin", 0, 3);

        let err = registry.begin_or_continue("a.bin", 1, 4).unwrap_err();
        assert!(matches!(
            err,
            UploadError::ChunkCountMismatch { expected: 3, declared: 4 }
        ));

        let session = registry.snapshot("a.bin").unwrap();
        assert_eq!(session.total_chunks, 3);
        assert_eq!(session.received_count(), 1);
        assert_eq!(session.in_flight, 0);
    }

    #[test]
    fn test_index_out_of_range() {
        let registry = SessionRegistry::new();

        assert!(matches!(
            registry.begin_or_continue("a.bin", 3, 3),
            Err(UploadError::ChunkIndexOutOfRange { index: 3, total: 3 })
        ));
        assert!(registry.is_empty(), "rejected first chunk must not create a session");

        assert!(matches!(
            registry.begin_or_continue("a.bin", 0, 0),
            Err(UploadError::ChunkIndexOutOfRange { .. })
        ));

        settle_ok(&registry, "a.bin", 0, 2);
        assert!(matches!(
            registry.begin_or_continue("a.bin", 5, 2),
            Err(UploadError::ChunkIndexOutOfRange { index: 5, total: 2 })
        ));
    }

    #[test]
    fn test_storage_key_collision_is_rejected() {
        let registry = SessionRegistry::new();
        settle_ok(&registry, "dir/a.bin", 0, 2);

        let err = registry.begin_or_continue("other/a.bin", 0, 2).unwrap_err();
        assert!(matches!(err, UploadError::StorageKeyInUse { .. }));
        assert_eq!(registry.snapshot("dir/a.bin").unwrap().received_count(), 1);
    }

    #[test]
    fn test_completion_waits_for_in_flight_writes() {
        let registry = SessionRegistry::new();
        let first = registry.begin_or_continue("a.bin", 0, 2).unwrap();
        let second = registry.begin_or_continue("a.bin", 1, 2).unwrap();
        assert!(registry.is_complete("a.bin"));

        // Second write finishes first; the first is still being written
        assert!(matches!(
            registry.settle(&second, true),
            ChunkProgress::Pending { received: 2, total: 2 }
        ));
        assert!(matches!(registry.settle(&first, true), ChunkProgress::Ready(_)));
    }

    #[test]
    fn test_failed_write_unrecords_index() {
        let registry = SessionRegistry::new();
        let ticket = registry.begin_or_continue("a.bin", 0, 1).unwrap();

        assert!(matches!(
            registry.settle(&ticket, false),
            ChunkProgress::Pending { received: 0, total: 1 }
        ));
        assert!(matches!(settle_ok(&registry, "a.bin", 0, 1), ChunkProgress::Ready(_)));
    }

    #[test]
    fn test_failed_resend_keeps_earlier_write() {
        let registry = SessionRegistry::new();
        let first = registry.begin_or_continue("a.bin", 0, 2).unwrap();
        let resend = registry.begin_or_continue("a.bin", 0, 2).unwrap();
        assert!(resend.duplicate);

        registry.settle(&first, true);
        assert!(matches!(
            registry.settle(&resend, false),
            ChunkProgress::Pending { received: 1, total: 2 }
        ));
        assert!(registry.snapshot("a.bin").unwrap().has_chunk(0));

        // The session still completes without chunk 0 being sent again
        assert!(matches!(settle_ok(&registry, "a.bin", 1, 2), ChunkProgress::Ready(_)));
    }

    #[test]
    fn test_restore_clears_missing_indices() {
        let registry = SessionRegistry::new();
        settle_ok(&registry, "a.bin", 0, 2);
        let ChunkProgress::Ready(session) = settle_ok(&registry, "a.bin", 1, 2) else {
            panic!("expected ready");
        };

        assert!(registry.restore(session, &[1]));
        let restored = registry.snapshot("a.bin").unwrap();
        assert!(restored.has_chunk(0));
        assert!(!restored.has_chunk(1));

        assert!(matches!(settle_ok(&registry, "a.bin", 1, 2), ChunkProgress::Ready(_)));
    }

    #[test]
    fn test_settle_after_removal_is_detached() {
        let registry = SessionRegistry::new();
        let ticket = registry.begin_or_continue("a.bin", 0, 2).unwrap();
        registry.remove("a.bin");

        assert!(matches!(registry.settle(&ticket, true), ChunkProgress::Detached));
    }

    #[test]
    fn test_expire_idle() {
        let registry = SessionRegistry::new();
        settle_ok(&registry, "idle.bin", 0, 2);
        let _in_flight = registry.begin_or_continue("busy.bin", 0, 2).unwrap();

        assert!(registry.expire_idle(Duration::from_secs(3600)).is_empty());

        let expired = registry.expire_idle(Duration::ZERO);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].original_name, "idle.bin");
        assert!(registry.snapshot("busy.bin").is_some());
    }

    #[test]
    fn test_concurrent_chunks_complete_once() {
        let registry = SessionRegistry::new();
        let total = 64u32;

        let handles: Vec<_> = (0..total)
            .map(|index| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let ticket = registry.begin_or_continue("same.bin", index, total).unwrap();
                    matches!(registry.settle(&ticket, true), ChunkProgress::Ready(_))
                })
            })
            .collect();

        let ready = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ready| *ready)
            .count();

        assert_eq!(ready, 1);
        assert!(registry.is_empty());
    }
}
