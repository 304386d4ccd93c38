//! Chunkdrop Server Library
//!
//! Chunked HTTP file drop with XOR-obfuscated transfer. The server binary is
//! in main.rs; everything it wires together lives here.
//!
//! # Modules
//!
//! - `storage`: filename sanitizing and root-contained file access
//! - `codec`: the obfuscation transform (not encryption)
//! - `upload`: multipart decoding, chunk sessions and assembly
//! - `routes`: the HTTP surface

pub mod codec;
pub mod config;
pub mod error;
pub mod routes;
pub mod security;
pub mod state;
pub mod storage;
pub mod upload;

pub use config::{Cli, Config};
pub use routes::app;
pub use state::AppState;
