//! SFTP remote filesystem
//!
//! Browse, copy, move, delete and create folders in a remote tree over two
//! persistent SFTP sessions, bridging transfers to and from the local
//! filesystem.

pub mod delete;
pub mod error;
pub mod filesystem;
pub mod handle;
pub mod location;
pub mod observer;
pub mod operation;
pub mod path_utils;
pub mod queue;
pub mod resolver;
pub mod session;
pub mod transfer;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use delete::{is_directory_not_empty, DeletionEngine};
pub use error::{HandleError, SftpError};
pub use filesystem::SftpFileSystem;
pub use handle::{ConnectionErrorCode, ProgressFn, RawEntry, SessionHandle};
pub use location::{Location, RemoteRoot, Scheme};
pub use observer::FileSystemObserver;
pub use operation::{FileOperation, OperationKind, OperationSnapshot, SideState};
pub use resolver::PathResolver;
pub use session::RusshSftpHandle;
pub use transfer::{check_transfer_control, TransferControl, TransferDirection, TransferEngine};
pub use types::*;
