//! Local storage roots
//!
//! A [`StorageRoot`] is a directory that every derived path must stay inside.
//! Names are expected to be sanitized already (see [`sanitize`]); the root
//! re-verifies containment against the resolved filesystem path before any
//! file is created or opened, which also catches symlinks planted inside
//! the root.

pub mod sanitize;

use std::io;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub use sanitize::{sanitize, MAX_FILENAME_LENGTH, PLACEHOLDER_NAME};

/// Prefix of in-progress files; dot-files are hidden from listings
const PARTIAL_PREFIX: &str = ".partial-";

/// Errors raised when a name cannot be placed safely under a root
#[derive(Debug, Error)]
pub enum PathSafetyError {
    #[error("Unsafe path component in {name:?}")]
    UnsafeComponent { name: String },

    #[error("Resolved path {resolved:?} escapes storage root {root:?}")]
    EscapesRoot {
        name: String,
        root: PathBuf,
        resolved: PathBuf,
    },

    #[error("Failed to resolve {name:?}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl PathSafetyError {
    /// Whether this is an escape attempt rather than an I/O failure
    pub fn is_violation(&self) -> bool {
        !matches!(self, Self::Io { .. })
    }
}

/// A stored artifact as reported by [`StorageRoot::list`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFileInfo {
    pub name: String,
    pub size: u64,
}

/// Directory acting as a containment boundary for derived paths
#[derive(Debug, Clone)]
pub struct StorageRoot {
    root: PathBuf,
}

impl StorageRoot {
    /// Open a root, creating the directory if needed
    pub async fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// The configured root path
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve `name` to a path directly under the root.
    ///
    /// Runs the canonicalization on the blocking pool.
    pub async fn resolve(&self, name: &str) -> Result<PathBuf, PathSafetyError> {
        let root = self.root.clone();
        let owned = name.to_string();
        tokio::task::spawn_blocking(move || resolve_within(&root, &owned))
            .await
            .map_err(|e| PathSafetyError::Io {
                name: name.to_string(),
                source: io::Error::other(format!("spawn_blocking failed: {}", e)),
            })?
    }

    /// Start an exclusive in-progress file inside the root
    pub async fn create_partial(&self) -> io::Result<PartialFile> {
        let path = self
            .root
            .join(format!("{}{}", PARTIAL_PREFIX, Uuid::new_v4().simple()));
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        Ok(PartialFile { path, file })
    }

    /// Write `data` to `dest` so that readers never observe a partial file
    pub async fn write_atomic(&self, dest: &Path, data: &[u8]) -> io::Result<()> {
        let mut partial = self.create_partial().await?;
        if let Err(e) = partial.file.write_all(data).await {
            partial.discard().await;
            return Err(e);
        }
        partial.commit(dest).await
    }

    /// List regular, non-hidden files directly under the root, sorted by name
    pub async fn list(&self) -> io::Result<Vec<StoredFileInfo>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            // file_type() does not follow symlinks
            let file_type = entry.file_type().await?;
            if !file_type.is_file() {
                continue;
            }
            let metadata = entry.metadata().await?;
            files.push(StoredFileInfo {
                name,
                size: metadata.len(),
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}

/// An exclusively created file that becomes visible only on [`commit`](Self::commit)
pub struct PartialFile {
    path: PathBuf,
    pub file: tokio::fs::File,
}

impl PartialFile {
    /// Flush to disk and atomically move into place
    pub async fn commit(mut self, dest: &Path) -> io::Result<()> {
        let synced = async {
            self.file.flush().await?;
            self.file.sync_all().await
        }
        .await;

        if let Err(e) = synced {
            self.discard().await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&self.path, dest).await {
            self.discard().await;
            return Err(e);
        }
        Ok(())
    }

    /// Remove the in-progress file
    pub async fn discard(self) {
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to discard partial file");
        }
    }
}

/// Resolve `name` under `root`, refusing anything that lands outside it.
///
/// The returned path is `root.join(name)` (not canonicalized) so its parent is
/// exactly the configured root.
pub fn resolve_within(root: &Path, name: &str) -> Result<PathBuf, PathSafetyError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => {
            return Err(PathSafetyError::UnsafeComponent {
                name: name.to_string(),
            })
        }
    }

    let io_err = |source: io::Error| PathSafetyError::Io {
        name: name.to_string(),
        source,
    };

    let root_canonical = root.canonicalize().map_err(io_err)?;
    let path = root.join(name);

    match std::fs::symlink_metadata(&path) {
        Ok(meta) => {
            let resolved = match path.canonicalize() {
                Ok(resolved) => resolved,
                // Dangling symlink: writing through it would create its target
                Err(_) if meta.file_type().is_symlink() => {
                    let target = std::fs::read_link(&path).map_err(io_err)?;
                    return Err(PathSafetyError::EscapesRoot {
                        name: name.to_string(),
                        root: root.to_path_buf(),
                        resolved: target,
                    });
                }
                Err(e) => return Err(io_err(e)),
            };

            if !resolved.starts_with(&root_canonical) {
                return Err(PathSafetyError::EscapesRoot {
                    name: name.to_string(),
                    root: root.to_path_buf(),
                    resolved,
                });
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let parent = path
                .parent()
                .ok_or_else(|| PathSafetyError::UnsafeComponent {
                    name: name.to_string(),
                })?
                .canonicalize()
                .map_err(io_err)?;

            if parent != root_canonical {
                return Err(PathSafetyError::EscapesRoot {
                    name: name.to_string(),
                    root: root.to_path_buf(),
                    resolved: parent.join(name),
                });
            }
        }
        Err(e) => return Err(io_err(e)),
    }

    Ok(path)
}
