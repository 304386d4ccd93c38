//! Application state management

use std::sync::Arc;

use crate::codec::{CodecError, ObfuscationCodec};
use crate::config::Config;
use crate::security::SecurityLog;
use crate::storage::StorageRoot;
use crate::upload::UploadService;

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid obfuscation key: {0}")]
    Codec(#[from] CodecError),

    #[error("Failed to prepare storage directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    codec: ObfuscationCodec,
    uploads: StorageRoot,
    security: SecurityLog,
    upload_service: UploadService,
}

impl AppState {
    /// Create a new application state
    ///
    /// Validates the key and creates the upload and chunk directories.
    pub async fn new(config: Config) -> Result<Self, StateError> {
        let codec = ObfuscationCodec::xor(config.security.key.as_bytes())?;

        let uploads = StorageRoot::new(&config.storage.upload_dir).await?;
        let chunks = StorageRoot::new(&config.storage.chunk_dir).await?;

        let security = match &config.security.log_path {
            Some(path) => SecurityLog::new(path),
            None => SecurityLog::disabled(),
        };

        let upload_service = UploadService::new(
            codec.clone(),
            uploads.clone(),
            chunks,
            security.clone(),
            config.upload_limits(),
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                codec,
                uploads,
                security,
                upload_service,
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the obfuscation codec
    pub fn codec(&self) -> &ObfuscationCodec {
        &self.inner.codec
    }

    /// Get the upload root
    pub fn uploads(&self) -> &StorageRoot {
        &self.inner.uploads
    }

    pub fn security(&self) -> &SecurityLog {
        &self.inner.security
    }

    pub fn upload_service(&self) -> &UploadService {
        &self.inner.upload_service
    }
}
