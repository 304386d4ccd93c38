//! Upload types for the chunked drop protocol

use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::multipart::MultipartError;
use crate::storage::PathSafetyError;

// ============================================================================
// Constants
// ============================================================================

/// Maximum size of a single decoded payload: 100MB
pub const MAX_ARTIFACT_SIZE: usize = 100 * 1024 * 1024;

/// Upper bound on `total_chunks`
pub const MAX_CHUNKS: u32 = 10_000;

/// Room for multipart framing on top of the payload limit
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Idle time after which an unfinished session is reaped: 24 hours
pub const SESSION_IDLE_SECS: u64 = 24 * 60 * 60;

/// Interval between abandoned-session sweeps: 5 minutes
pub const SWEEP_INTERVAL_SECS: u64 = 300;

/// Size limits applied to every upload request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_artifact_size: usize,
    pub max_chunks: u32,
}

impl UploadLimits {
    /// Largest acceptable request body
    pub fn max_request_size(&self) -> u64 {
        self.max_artifact_size as u64 + MULTIPART_OVERHEAD
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_artifact_size: MAX_ARTIFACT_SIZE,
            max_chunks: MAX_CHUNKS,
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Chunk coordinates declared by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpec {
    pub index: u32,
    pub total: u32,
}

/// A validated upload request
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Name as declared by the client, unsanitized
    pub original_name: String,
    /// Payload as received (still obfuscated)
    pub payload: Vec<u8>,
    /// Present for chunked uploads
    pub chunk: Option<ChunkSpec>,
}

// ============================================================================
// Session Types
// ============================================================================

/// In-progress chunked upload for one original filename
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Unique session ID
    pub id: Uuid,

    /// Name the client addresses the session by
    pub original_name: String,

    /// Sanitized on-disk name, fixed at creation
    pub storage_key: String,

    /// Declared chunk count, immutable after creation
    pub total_chunks: u32,

    /// One flag per chunk index
    received: Box<[bool]>,

    /// Number of set flags in `received`
    received_count: u32,

    /// Chunk writes accepted but not yet settled
    pub(crate) in_flight: u32,

    /// Session creation time
    pub created_at: DateTime<Utc>,

    /// Last chunk activity
    pub last_touched: DateTime<Utc>,
}

impl UploadSession {
    /// Create a new upload session
    pub fn new(original_name: &str, storage_key: String, total_chunks: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            original_name: original_name.to_string(),
            storage_key,
            total_chunks,
            received: vec![false; total_chunks as usize].into_boxed_slice(),
            received_count: 0,
            in_flight: 0,
            created_at: now,
            last_touched: now,
        }
    }

    /// Check if all chunks have been received
    pub fn is_complete(&self) -> bool {
        self.received_count == self.total_chunks
    }

    pub fn received_count(&self) -> u32 {
        self.received_count
    }

    pub fn has_chunk(&self, index: u32) -> bool {
        self.received.get(index as usize).copied().unwrap_or(false)
    }

    /// Get indices of chunks that still need to be uploaded
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks).filter(|i| !self.has_chunk(*i)).collect()
    }

    /// Mark a chunk as received; returns false if it already was
    pub(crate) fn mark_received(&mut self, index: u32) -> bool {
        match self.received.get_mut(index as usize) {
            Some(flag) if !*flag => {
                *flag = true;
                self.received_count += 1;
                true
            }
            _ => false,
        }
    }

    /// Forget a chunk so it must be sent again
    pub(crate) fn clear_received(&mut self, index: u32) {
        if let Some(flag) = self.received.get_mut(index as usize) {
            if *flag {
                *flag = false;
                self.received_count -= 1;
            }
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_touched = Utc::now();
    }
}

/// Handed out by the registry for each accepted chunk; must be settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTicket {
    pub session_id: Uuid,
    pub original_name: String,
    pub storage_key: String,
    pub index: u32,
    pub total: u32,
    /// The index had already been received
    pub duplicate: bool,
}

/// Outcome of settling a chunk
#[derive(Debug)]
pub enum ChunkProgress {
    /// More chunks are needed
    Pending { received: u32, total: u32 },
    /// This caller observed completion and now owns the session
    Ready(UploadSession),
    /// The session disappeared (swept) while the chunk was being written
    Detached,
}

/// Final artifact produced by an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Successful upload outcome, rendered as the response text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadReceipt {
    Stored { name: String },
    ChunkAccepted { name: String, index: u32, total: u32 },
    Assembled { name: String, total: u32 },
}

impl std::fmt::Display for UploadReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stored { name } => write!(f, "File {} uploaded successfully", name),
            Self::ChunkAccepted { name, index, total } => {
                write!(f, "Chunk {}/{} received for {}", index + 1, total, name)
            }
            Self::Assembled { name, total } => write!(
                f,
                "File {} successfully assembled from {} chunks",
                name, total
            ),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("{0}")]
    Multipart(#[from] MultipartError),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid chunk parameters: {0}")]
    InvalidChunkParameters(String),

    #[error("Chunk index out of range: {index} (total: {total})")]
    ChunkIndexOutOfRange { index: u32, total: u32 },

    #[error("Chunk count mismatch: session declared {expected}, request declared {declared}")]
    ChunkCountMismatch { expected: u32, declared: u32 },

    #[error("Storage name {storage_key} is in use by another upload")]
    StorageKeyInUse { storage_key: String },

    #[error("Upload session for {name} was removed while the chunk was written")]
    SessionRemoved { name: String },

    #[error("Request too large: {size} bytes (max: {max})")]
    RequestTooLarge { size: u64, max: u64 },

    #[error("File size exceeds limit of {}MB", .max / (1024 * 1024))]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Too many chunks: {total} (max: {max})")]
    TooManyChunks { total: u32, max: u32 },

    #[error("Security violation: invalid upload path")]
    PathSafetyViolation(#[source] PathSafetyError),

    #[error("Failed to assemble {name}: missing chunks {missing:?}")]
    AssemblyIncomplete { name: String, missing: Vec<u32> },

    #[error("Failed to assemble {name}: {source}")]
    AssemblyFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Multipart(MultipartError::PartTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Multipart(_) => StatusCode::BAD_REQUEST,
            Self::MissingField(_) => StatusCode::BAD_REQUEST,
            Self::InvalidChunkParameters(_) => StatusCode::BAD_REQUEST,
            Self::ChunkIndexOutOfRange { .. } => StatusCode::BAD_REQUEST,
            Self::ChunkCountMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::StorageKeyInUse { .. } => StatusCode::CONFLICT,
            Self::SessionRemoved { .. } => StatusCode::CONFLICT,
            Self::RequestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::TooManyChunks { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::PathSafetyViolation(_) => StatusCode::BAD_REQUEST,
            Self::AssemblyIncomplete { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AssemblyFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PathSafetyError> for UploadError {
    fn from(err: PathSafetyError) -> Self {
        match err {
            PathSafetyError::Io { source, .. } => Self::Storage(source),
            violation => Self::PathSafetyViolation(violation),
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Upload failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Upload rejected");
        }
        (status, self.to_string()).into_response()
    }
}
