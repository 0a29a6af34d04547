//! SFTP error types

use russh_sftp::protocol::StatusCode;
use thiserror::Error;

use crate::ssh::SshError;

/// Failure of a single session call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandleError {
    /// The server answered with an SFTP status packet
    #[error("{code}: {message}")]
    Status { code: StatusCode, message: String },

    #[error("I/O: {0}")]
    Io(String),

    #[error("Timeout")]
    Timeout,

    /// A progress callback asked for the call to stop
    #[error("Cancelled")]
    Cancelled,

    #[error("Session closed")]
    Closed,

    #[error("{0}")]
    Unexpected(String),
}

impl HandleError {
    pub fn status(code: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for HandleError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<russh_sftp::client::error::Error> for HandleError {
    fn from(error: russh_sftp::client::error::Error) -> Self {
        use russh_sftp::client::error::Error as Inner;
        match error {
            Inner::Status(status) => Self::Status {
                code: status.status_code,
                message: status.error_message,
            },
            Inner::IO(msg) => Self::Io(msg),
            Inner::Timeout => Self::Timeout,
            other => Self::Unexpected(other.to_string()),
        }
    }
}

/// Errors surfaced by the remote filesystem
#[derive(Error, Debug)]
pub enum SftpError {
    /// Connection or authentication failure
    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error("Failed to initialize SFTP channel: {0}")]
    ChannelInit(String),

    #[error("Failed to initialize root {root}: {reason}")]
    RootInit { root: String, reason: String },

    #[error("Invalid directory listing for {path}: {source}")]
    InvalidListing {
        path: String,
        #[source]
        source: HandleError,
    },

    #[error("Failed to delete {path}: {source}")]
    Delete {
        path: String,
        #[source]
        source: HandleError,
    },

    #[error("Failed to copy {from} to {to}: {source}")]
    Copy {
        from: String,
        to: String,
        #[source]
        source: HandleError,
    },

    #[error("Failed to move {from} to {to}: {source}")]
    Move {
        from: String,
        to: String,
        #[source]
        source: HandleError,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: HandleError,
    },

    #[error("Expected a directory but found a regular file: {0}")]
    NotADirectory(String),

    #[error("Failed to open input stream for {path}: {source}")]
    InputStream {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open output stream for {path}: {source}")]
    OutputStream {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Operation cannot be requested: {0}")]
    Precondition(String),

    #[error("Transfer cancelled")]
    TransferCancelled,

    #[error("Filesystem closed")]
    Closed,
}

impl SftpError {
    /// Wrap a failed copy call; a cancelled stream stays a cancellation
    pub fn copy(from: impl ToString, to: impl ToString, source: HandleError) -> Self {
        if source.is_cancelled() {
            return Self::TransferCancelled;
        }
        Self::Copy {
            from: from.to_string(),
            to: to.to_string(),
            source,
        }
    }

    pub fn delete(path: impl ToString, source: HandleError) -> Self {
        Self::Delete {
            path: path.to_string(),
            source,
        }
    }

    pub fn create_directory(path: impl ToString, source: HandleError) -> Self {
        Self::CreateDirectory {
            path: path.to_string(),
            source,
        }
    }
}

// Errors travel to observers as plain strings
impl serde::Serialize for SftpError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
