//! SFTP-backed Session Handle
//!
//! One SSH connection, one `sftp` subsystem channel. The filesystem opens two
//! of these against the same host: one for browsing, one for mutations.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use russh::client::Handle;
use russh::Disconnect;
use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::client::SftpSession as RusshSftpSession;
use russh_sftp::protocol::StatusCode;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::error::{HandleError, SftpError};
use super::handle::{ConnectionErrorCode, LastError, ProgressFn, RawEntry, SessionHandle};
use super::path_utils::{is_below, join_remote_path};
use super::types::AdaptiveChunkSizer;
use crate::ssh::{ClientHandler, SshClient, SshConfig};

/// SFTP I/O timeout to prevent zombie transfers on SSH disconnect (5 minutes)
const SFTP_IO_TIMEOUT: Duration = Duration::from_secs(300);

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub struct RusshSftpHandle {
    label: String,
    ssh: Handle<ClientHandler>,
    sftp: RusshSftpSession,
    last: Mutex<LastError>,
    chunk_size: usize,
}

impl RusshSftpHandle {
    /// Connect, authenticate and open the SFTP subsystem
    pub async fn open(
        config: &SshConfig,
        label: impl Into<String>,
        chunk_size: usize,
    ) -> Result<Self, SftpError> {
        let label = label.into();
        let ssh = SshClient::new(config.clone()).connect().await?;

        info!("Opening SFTP subsystem for {} session", label);

        let channel = ssh
            .channel_open_session()
            .await
            .map_err(|e| SftpError::ChannelInit(e.to_string()))?;

        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            SftpError::ChannelInit(format!("Failed to request SFTP subsystem: {}", e))
        })?;

        let sftp = RusshSftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SftpError::ChannelInit(e.to_string()))?;

        info!("SFTP subsystem opened for {} session", label);

        Ok(Self {
            label,
            ssh,
            sftp,
            last: Mutex::new(LastError::default()),
            chunk_size,
        })
    }

    fn track<T>(&self, result: Result<T, SftpErrorInner>) -> Result<T, HandleError> {
        result.map_err(|e| self.record(HandleError::from(e)))
    }

    fn record(&self, error: HandleError) -> HandleError {
        *self.last.lock() = LastError::from_handle_error(&error);
        error
    }

    /// Copy bytes from `reader` to `writer` in adaptive chunks, consulting
    /// `progress` after each chunk.
    async fn pump<R, W>(
        &self,
        reader: &mut R,
        writer: &mut W,
        progress: ProgressFn<'_>,
    ) -> Result<u64, HandleError>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut sizer = AdaptiveChunkSizer::new(self.chunk_size);
        let mut buffer = vec![0u8; AdaptiveChunkSizer::MAX_CHUNK];
        let mut moved = 0u64;

        loop {
            let size = sizer.chunk_size();
            let read = tokio::time::timeout(SFTP_IO_TIMEOUT, reader.read(&mut buffer[..size]))
                .await
                .map_err(|_| self.record(HandleError::Timeout))?
                .map_err(|e| self.record(e.into()))?;
            if read == 0 {
                break;
            }

            tokio::time::timeout(SFTP_IO_TIMEOUT, writer.write_all(&buffer[..read]))
                .await
                .map_err(|_| self.record(HandleError::Timeout))?
                .map_err(|e| self.record(e.into()))?;

            moved += read as u64;
            sizer.record(read);

            if !progress(moved) {
                debug!("Transfer cancelled after {} bytes", moved);
                return Err(self.record(HandleError::Cancelled));
            }
        }

        tokio::time::timeout(SFTP_IO_TIMEOUT, writer.flush())
            .await
            .map_err(|_| self.record(HandleError::Timeout))?
            .map_err(|e| self.record(e.into()))?;
        Ok(moved)
    }

    async fn copy_file(
        &self,
        from: &str,
        to: &str,
        progress: ProgressFn<'_>,
    ) -> Result<u64, HandleError> {
        let mut source = self.track(self.sftp.open(from).await)?;
        let mut target = self.track(self.sftp.create(to).await)?;

        let result = self.pump(&mut source, &mut target, progress).await;
        let closed = target.shutdown().await;
        match result {
            Ok(bytes) => {
                closed.map_err(|e| self.record(e.into()))?;
                Ok(bytes)
            }
            Err(e) => {
                if let Err(cleanup) = self.sftp.remove_file(to).await {
                    debug!("No partial copy to discard at {}: {}", to, cleanup);
                }
                Err(e)
            }
        }
    }

    /// SFTP has no server-side copy: directories are recreated, files streamed
    fn copy_tree<'a>(
        &'a self,
        from: &'a str,
        to: &'a str,
        progress: ProgressFn<'a>,
    ) -> BoxFuture<'a, Result<u64, HandleError>> {
        Box::pin(async move {
            let metadata = self.track(self.sftp.metadata(from).await)?;
            if !metadata.is_dir() {
                return self.copy_file(from, to, progress).await;
            }

            self.track(self.sftp.create_dir(to).await)?;
            let mut total = 0;
            for entry in self.track(self.sftp.read_dir(from).await)? {
                let name = entry.file_name();
                if name.is_empty() || name == "." || name == ".." {
                    continue;
                }
                let child_from = join_remote_path(from, &name);
                let child_to = join_remote_path(to, &name);
                total += self.copy_tree(&child_from, &child_to, progress).await?;
            }
            Ok(total)
        })
    }
}

#[async_trait]
impl SessionHandle for RusshSftpHandle {
    async fn list_directory(&self, path: &str) -> Result<Vec<RawEntry>, HandleError> {
        debug!("[{}] Listing directory: {}", self.label, path);
        let read_dir = self.track(self.sftp.read_dir(path).await)?;

        let entries = read_dir
            .map(|entry| {
                let name = entry.file_name();
                let metadata = entry.metadata();
                RawEntry {
                    name: (!name.is_empty()).then_some(name),
                    is_dir: metadata.is_dir(),
                    is_symlink: metadata.is_symlink(),
                    permissions: metadata.permissions,
                    size: metadata.size,
                    modified: metadata.mtime,
                }
            })
            .collect();
        Ok(entries)
    }

    async fn file_exists(&self, path: &str) -> bool {
        // lstat: a dangling symlink still occupies the name
        match self.sftp.symlink_metadata(path).await {
            Ok(metadata) => !metadata.is_dir(),
            Err(_) => false,
        }
    }

    async fn directory_exists(&self, path: &str) -> bool {
        match self.sftp.metadata(path).await {
            Ok(metadata) => metadata.is_dir(),
            Err(_) => false,
        }
    }

    async fn remove_file(&self, path: &str) -> Result<(), HandleError> {
        self.track(self.sftp.remove_file(path).await)
    }

    async fn remove_directory(&self, path: &str) -> Result<(), HandleError> {
        self.track(self.sftp.remove_dir(path).await)
    }

    async fn create_directory(&self, path: &str) -> Result<(), HandleError> {
        self.track(self.sftp.create_dir(path).await)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), HandleError> {
        self.track(self.sftp.rename(from, to).await)
    }

    async fn copy_remote(
        &self,
        from: &str,
        to: &str,
        progress: ProgressFn<'_>,
    ) -> Result<u64, HandleError> {
        debug!("[{}] Copying {} to {}", self.label, from, to);
        if is_below(from, to) {
            return Err(self.record(HandleError::status(
                StatusCode::Failure,
                format!("Cannot copy {} into itself", from),
            )));
        }
        self.copy_tree(from, to, progress).await
    }

    async fn read_file(
        &self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        progress: ProgressFn<'_>,
    ) -> Result<u64, HandleError> {
        let mut remote_file = self.track(self.sftp.open(path).await)?;
        let bytes = self.pump(&mut remote_file, sink, progress).await?;
        debug!("[{}] Read {} ({} bytes)", self.label, path, bytes);
        Ok(bytes)
    }

    async fn write_file(
        &self,
        source: &mut (dyn AsyncRead + Unpin + Send),
        path: &str,
        progress: ProgressFn<'_>,
    ) -> Result<u64, HandleError> {
        let mut remote_file = self.track(self.sftp.create(path).await)?;
        let result = self.pump(source, &mut remote_file, progress).await;
        let closed = remote_file.shutdown().await;
        let bytes = result?;
        closed.map_err(|e| self.record(e.into()))?;
        debug!("[{}] Wrote {} ({} bytes)", self.label, path, bytes);
        Ok(bytes)
    }

    async fn free_space(&self, path: &str) -> Option<u64> {
        match self.sftp.fs_info(path).await {
            Ok(Some(stats)) => Some(stats.blocks_avail.saturating_mul(stats.fragment_size)),
            Ok(None) => None,
            Err(e) => {
                debug!("[{}] statvfs failed for {}: {}", self.label, path, e);
                None
            }
        }
    }

    fn last_connection_error(&self) -> Option<ConnectionErrorCode> {
        self.last.lock().connection
    }

    fn last_protocol_error(&self) -> Option<StatusCode> {
        self.last.lock().protocol
    }

    async fn close(&self) -> Result<(), HandleError> {
        info!("Closing {} session", self.label);
        if let Err(e) = self.sftp.close().await {
            warn!("[{}] Failed to close SFTP channel: {}", self.label, e);
        }
        self.ssh
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| HandleError::Unexpected(e.to_string()))
    }
}
