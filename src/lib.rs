//! Remote filesystem adapter over persistent SSH/SFTP sessions.
//!
//! [`sftp::SftpFileSystem`] exposes load/copy/move/delete/create-folder over
//! one remote root and bridges transfers to the local filesystem.

pub mod config;
pub mod sftp;
pub mod ssh;

pub use config::FsConfig;
pub use sftp::{FileOperation, Location, SftpError, SftpFileSystem};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber (`RUST_LOG`, default `info`).
/// Later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
