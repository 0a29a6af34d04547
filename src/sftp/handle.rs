//! Session Handle capability set
//!
//! One authenticated connection able to list, stream, rename, remove and
//! create remote items. The filesystem owns two of them (browse and file
//! operations), each touched only from its own queue worker.

use async_trait::async_trait;
use russh_sftp::protocol::StatusCode;
use tokio::io::{AsyncRead, AsyncWrite};

use super::error::HandleError;

/// Progress callback for streaming calls: receives the bytes moved so far,
/// returns `false` to abort the call.
pub type ProgressFn<'a> = &'a (dyn Fn(u64) -> bool + Send + Sync);

/// Connection-level classification of the last failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorCode {
    /// The server replied with an SFTP status; see the protocol code
    SftpProtocol,
    Timeout,
    Io,
    ChannelClosed,
    Unexpected,
}

/// Last failure recorded by a handle
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LastError {
    pub connection: Option<ConnectionErrorCode>,
    pub protocol: Option<StatusCode>,
}

impl LastError {
    pub fn from_handle_error(error: &HandleError) -> Self {
        match error {
            HandleError::Status { code, .. } => Self {
                connection: Some(ConnectionErrorCode::SftpProtocol),
                protocol: Some(*code),
            },
            HandleError::Timeout => Self {
                connection: Some(ConnectionErrorCode::Timeout),
                protocol: None,
            },
            HandleError::Io(_) => Self {
                connection: Some(ConnectionErrorCode::Io),
                protocol: None,
            },
            HandleError::Closed => Self {
                connection: Some(ConnectionErrorCode::ChannelClosed),
                protocol: None,
            },
            HandleError::Cancelled | HandleError::Unexpected(_) => Self {
                connection: Some(ConnectionErrorCode::Unexpected),
                protocol: None,
            },
        }
    }
}

/// One raw item of a directory listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    /// `None` when the server sent a name that cannot be decoded
    pub name: Option<String>,
    pub is_dir: bool,
    pub is_symlink: bool,
    pub permissions: Option<u32>,
    pub size: Option<u64>,
    pub modified: Option<u32>,
}

#[async_trait]
pub trait SessionHandle: Send + Sync {
    async fn list_directory(&self, path: &str) -> Result<Vec<RawEntry>, HandleError>;

    /// A non-directory item exists at `path`. Symlinks are not followed, so a
    /// dangling link counts.
    async fn file_exists(&self, path: &str) -> bool;

    async fn directory_exists(&self, path: &str) -> bool;

    async fn remove_file(&self, path: &str) -> Result<(), HandleError>;

    /// Single-call directory removal; servers refuse non-empty directories
    async fn remove_directory(&self, path: &str) -> Result<(), HandleError>;

    async fn create_directory(&self, path: &str) -> Result<(), HandleError>;

    async fn rename(&self, from: &str, to: &str) -> Result<(), HandleError>;

    /// Copy an item (file or tree) to another path on the same server
    async fn copy_remote(
        &self,
        from: &str,
        to: &str,
        progress: ProgressFn<'_>,
    ) -> Result<u64, HandleError>;

    /// Stream the remote file at `path` into `sink`
    async fn read_file(
        &self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        progress: ProgressFn<'_>,
    ) -> Result<u64, HandleError>;

    /// Stream `source` into a new remote file at `path`
    async fn write_file(
        &self,
        source: &mut (dyn AsyncRead + Unpin + Send),
        path: &str,
        progress: ProgressFn<'_>,
    ) -> Result<u64, HandleError>;

    /// Bytes available to the user at `path`, when the server reports it
    async fn free_space(&self, _path: &str) -> Option<u64> {
        None
    }

    fn last_connection_error(&self) -> Option<ConnectionErrorCode>;

    fn last_protocol_error(&self) -> Option<StatusCode>;

    async fn close(&self) -> Result<(), HandleError>;
}
