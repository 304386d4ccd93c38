//! Security event record
//!
//! Append-only text log of events an operator should review: path escape
//! attempts, rewritten filenames and oversize uploads. Each event is also
//! emitted through `tracing` under the `security` target. A failing sink
//! never fails the request that triggered the event.

use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Kinds of security-relevant events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEventKind {
    /// A derived path resolved outside its storage root
    PathTraversalAttempt,
    /// The client-supplied filename was rewritten by the sanitizer
    FilenameSanitized,
    /// The payload exceeded the configured size limit
    FileSizeExceeded,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PathTraversalAttempt => "PATH_TRAVERSAL_ATTEMPT",
            Self::FilenameSanitized => "FILENAME_SANITIZED",
            Self::FileSizeExceeded => "FILE_SIZE_EXCEEDED",
        }
    }
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle to the security event file
#[derive(Clone)]
pub struct SecurityLog {
    inner: Arc<SecurityLogInner>,
}

struct SecurityLogInner {
    path: Option<PathBuf>,
    /// Keeps concurrent appends from interleaving
    write_lock: Mutex<()>,
}

impl SecurityLog {
    /// Log to `path`, created on first event
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_path(Some(path.into()))
    }

    /// Emit events through `tracing` only
    pub fn disabled() -> Self {
        Self::with_path(None)
    }

    fn with_path(path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(SecurityLogInner {
                path,
                write_lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Record one event
    pub async fn record(&self, kind: SecurityEventKind, detail: &str, client: Option<IpAddr>) {
        let client = client.map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
        let detail = escape_controls(detail);

        tracing::warn!(
            target: "security",
            kind = %kind,
            client = %client,
            detail = %detail,
            "Security event"
        );

        let Some(path) = &self.inner.path else {
            return;
        };

        let line = format_event(kind, &detail, &client);
        let _guard = self.inner.write_lock.lock().await;
        if let Err(e) = append_line(path, &line).await {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to write security event"
            );
        }
    }
}

/// One event per line: control characters in client input are written escaped
fn escape_controls(detail: &str) -> String {
    let mut escaped = String::with_capacity(detail.len());
    for c in detail.chars() {
        if c.is_control() {
            escaped.extend(c.escape_default());
        } else {
            escaped.push(c);
        }
    }
    escaped
}

fn format_event(kind: SecurityEventKind, detail: &str, client: &str) -> String {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    format!(
        "[{}] SECURITY EVENT - {}: {} (Client: {})\n",
        timestamp, kind, detail, client
    )
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
