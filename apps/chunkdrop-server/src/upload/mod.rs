//! Chunked Upload Module
//!
//! Receives files as a single multipart request or as independently posted
//! chunks that are merged once every index has arrived:
//! - Streaming multipart decoding straight off the request body
//! - Per-filename sessions with exactly-once completion
//! - Chunk artifacts on disk until assembly
//!
//! Protocol Flow:
//! 1. Client obfuscates the payload (or each chunk) with the shared key
//! 2. Client posts `file` and `original_name`, plus `chunk_index` and
//!    `total_chunks` when chunking
//! 3. Server decodes, stores the file or chunk, and assembles the file when
//!    the last missing chunk arrives

pub mod assembly;
pub mod chunk_store;
pub mod form;
pub mod multipart;
pub mod service;
pub mod session;
pub mod types;

pub use assembly::AssemblyEngine;
pub use chunk_store::ChunkStore;
pub use form::UploadForm;
pub use multipart::{boundary_from_content_type, FormPart, MultipartError, StreamBodyDecoder};
pub use service::{SweepReport, UploadService};
pub use session::SessionRegistry;
pub use types::*;
