//! Configuration management for Chunkdrop Server

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::upload::{UploadLimits, MAX_ARTIFACT_SIZE, MAX_CHUNKS, SESSION_IDLE_SECS, SWEEP_INTERVAL_SECS};

/// Chunkdrop - chunked file drop server with obfuscated transfer
#[derive(Parser, Debug)]
#[command(name = "chunkdrop-server")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Shared obfuscation key (must not be empty)
    #[arg(long, env = "CHUNKDROP_KEY", hide_env_values = true)]
    pub key: String,

    /// Address to bind
    #[arg(long, env = "CHUNKDROP_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "CHUNKDROP_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Directory for stored files
    #[arg(long, env = "CHUNKDROP_UPLOAD_DIR", default_value = "./uploads")]
    pub upload_dir: PathBuf,

    /// Directory for chunk artifacts awaiting assembly
    #[arg(long, env = "CHUNKDROP_CHUNK_DIR", default_value = "./chunks")]
    pub chunk_dir: PathBuf,

    /// Append-only security event log
    #[arg(long, env = "CHUNKDROP_SECURITY_LOG", default_value = "security.log")]
    pub security_log: PathBuf,

    /// Largest accepted payload in bytes
    #[arg(long, env = "CHUNKDROP_MAX_ARTIFACT_SIZE", default_value_t = MAX_ARTIFACT_SIZE)]
    pub max_artifact_size: usize,

    /// Largest accepted `total_chunks`, at most 10000
    #[arg(
        long,
        env = "CHUNKDROP_MAX_CHUNKS",
        default_value_t = MAX_CHUNKS,
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_CHUNKS))
    )]
    pub max_chunks: u32,

    /// Seconds of inactivity before an unfinished upload is discarded
    #[arg(long, env = "CHUNKDROP_SESSION_IDLE_SECS", default_value_t = SESSION_IDLE_SECS)]
    pub session_idle_secs: u64,

    /// Seconds between abandoned-upload sweeps
    #[arg(long, env = "CHUNKDROP_SWEEP_INTERVAL_SECS", default_value_t = SWEEP_INTERVAL_SECS)]
    pub sweep_interval_secs: u64,

    /// List stored files under their real names instead of transformed ones
    #[arg(long, env = "CHUNKDROP_PLAIN_NAMES")]
    pub plain_names: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub chunk_dir: PathBuf,
    pub max_artifact_size: usize,
    pub max_chunks: u32,
}

#[derive(Clone, Deserialize)]
pub struct SecurityConfig {
    pub key: String,
    pub log_path: Option<PathBuf>,
    /// Hex-transform names in listings and download links
    pub obfuscate_names: bool,
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("key", &"<redacted>")
            .field("log_path", &self.log_path)
            .field("obfuscate_names", &self.obfuscate_names)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub idle_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                port: 8000,
            },
            storage: StorageConfig {
                upload_dir: PathBuf::from("./uploads"),
                chunk_dir: PathBuf::from("./chunks"),
                max_artifact_size: MAX_ARTIFACT_SIZE,
                max_chunks: MAX_CHUNKS,
            },
            security: SecurityConfig {
                key: String::new(),
                log_path: Some(PathBuf::from("security.log")),
                obfuscate_names: true,
            },
            sessions: SessionConfig {
                idle_secs: SESSION_IDLE_SECS,
                sweep_interval_secs: SWEEP_INTERVAL_SECS,
            },
        }
    }
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Config {
            server: ServerConfig {
                host: cli.host,
                port: cli.port,
            },
            storage: StorageConfig {
                upload_dir: cli.upload_dir,
                chunk_dir: cli.chunk_dir,
                max_artifact_size: cli.max_artifact_size,
                max_chunks: cli.max_chunks,
            },
            security: SecurityConfig {
                key: cli.key,
                log_path: Some(cli.security_log),
                obfuscate_names: !cli.plain_names,
            },
            sessions: SessionConfig {
                idle_secs: cli.session_idle_secs,
                sweep_interval_secs: cli.sweep_interval_secs,
            },
        }
    }
}

impl Config {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_artifact_size: self.storage.max_artifact_size,
            // Chunk artifact names are only sized for indices below MAX_CHUNKS
            max_chunks: self.storage.max_chunks.min(MAX_CHUNKS),
        }
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.sessions.idle_secs)
    }

    /// `None` disables the sweep
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sessions.sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.sessions.sweep_interval_secs))
    }
}
