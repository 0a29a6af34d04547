//! Deletion Engine
//!
//! Files go with a single remove call. Directories first try a single
//! `rmdir`; when the server refuses because the directory is not empty, the
//! children are deleted one by one and the `rmdir` is retried exactly once.

use std::future::Future;
use std::pin::Pin;

use russh_sftp::protocol::StatusCode;
use tracing::{debug, info, warn};

use super::error::SftpError;
use super::handle::{ConnectionErrorCode, SessionHandle};
use super::location::Location;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The "directory not empty" signature: the server answered the removal with
/// a plain SFTP status (connection-level) whose code is the generic
/// `SSH_FX_FAILURE` (protocol-level). SFTP v3 has no dedicated code for it.
pub fn is_directory_not_empty(
    connection: Option<ConnectionErrorCode>,
    protocol: Option<StatusCode>,
) -> bool {
    matches!(
        (connection, protocol),
        (
            Some(ConnectionErrorCode::SftpProtocol),
            Some(StatusCode::Failure)
        )
    )
}

pub struct DeletionEngine<'a> {
    session: &'a dyn SessionHandle,
}

impl<'a> DeletionEngine<'a> {
    pub fn new(session: &'a dyn SessionHandle) -> Self {
        Self { session }
    }

    /// Remove `location`, recursing into directories when the server needs it
    pub fn delete<'b>(&'b self, location: &'b Location) -> BoxFuture<'b, Result<(), SftpError>> {
        Box::pin(async move {
            if !location.is_dir() {
                debug!("Removing file {}", location);
                return self
                    .session
                    .remove_file(location.path())
                    .await
                    .map_err(|e| SftpError::delete(location, e));
            }

            let first = match self.session.remove_directory(location.path()).await {
                Ok(()) => {
                    debug!("Removed directory {}", location);
                    return Ok(());
                }
                Err(e) => e,
            };

            let connection = self.session.last_connection_error();
            let protocol = self.session.last_protocol_error();
            if !is_directory_not_empty(connection, protocol) {
                return Err(SftpError::delete(location, first));
            }

            warn!(
                "Server refused to remove {} in one call, deleting its contents first",
                location
            );
            self.delete_children(location).await?;

            self.session
                .remove_directory(location.path())
                .await
                .map_err(|e| SftpError::delete(location, e))?;
            info!("Removed directory {} after clearing its contents", location);
            Ok(())
        })
    }

    async fn delete_children(&self, location: &Location) -> Result<(), SftpError> {
        let entries = self
            .session
            .list_directory(location.path())
            .await
            .map_err(|e| SftpError::delete(location, e))?;

        for raw in entries {
            let Some(name) = raw
                .name
                .as_deref()
                .filter(|n| !n.is_empty() && *n != "." && *n != "..")
            else {
                continue;
            };
            // Symlinks to directories are removed as links, never followed
            let is_dir = raw.is_dir && !raw.is_symlink;
            self.delete(&location.join(name, is_dir)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sftp::error::HandleError;
    use crate::sftp::testing::MemorySession;

    fn remote(path: &str, is_dir: bool) -> Location {
        Location::remote("h", None, None, path, is_dir)
    }

    #[test]
    fn test_not_empty_signature() {
        assert!(is_directory_not_empty(
            Some(ConnectionErrorCode::SftpProtocol),
            Some(StatusCode::Failure)
        ));
        assert!(!is_directory_not_empty(
            Some(ConnectionErrorCode::SftpProtocol),
            Some(StatusCode::PermissionDenied)
        ));
        assert!(!is_directory_not_empty(Some(ConnectionErrorCode::Io), None));
        assert!(!is_directory_not_empty(
            Some(ConnectionErrorCode::Timeout),
            Some(StatusCode::Failure)
        ));
        assert!(!is_directory_not_empty(None, None));
    }

    #[tokio::test]
    async fn test_delete_file() {
        let session = MemorySession::new();
        session.add_file("/a.txt", b"x");
        let engine = DeletionEngine::new(session.as_ref());

        engine.delete(&remote("/a.txt", false)).await.unwrap();
        assert!(!session.exists("/a.txt"));
        assert_eq!(session.calls(), ["remove_file /a.txt"]);
    }

    #[tokio::test]
    async fn test_delete_missing_file_fails() {
        let session = MemorySession::new();
        let engine = DeletionEngine::new(session.as_ref());

        let err = engine.delete(&remote("/gone.txt", false)).await.unwrap_err();
        assert!(matches!(err, SftpError::Delete { .. }));
    }

    #[tokio::test]
    async fn test_delete_empty_directory_single_call() {
        let session = MemorySession::new();
        session.add_dir("/tmp/empty");
        let engine = DeletionEngine::new(session.as_ref());

        engine.delete(&remote("/tmp/empty", true)).await.unwrap();
        assert_eq!(session.calls(), ["remove_directory /tmp/empty"]);
    }

    #[tokio::test]
    async fn test_delete_non_empty_directory_falls_back() {
        let session = MemorySession::new();
        session.add_file("/tmp/old/file.txt", b"x");
        let engine = DeletionEngine::new(session.as_ref());

        engine.delete(&remote("/tmp/old", true)).await.unwrap();

        assert!(!session.exists("/tmp/old"));
        assert!(session.is_dir("/tmp"));
        assert_eq!(
            session.calls(),
            [
                "remove_directory /tmp/old",
                "list /tmp/old",
                "remove_file /tmp/old/file.txt",
                "remove_directory /tmp/old",
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_nested_tree() {
        let session = MemorySession::new();
        session.add_file("/t/a.txt", b"a");
        session.add_file("/t/sub/b.txt", b"b");
        session.add_file("/t/sub/deeper/c.txt", b"c");
        let engine = DeletionEngine::new(session.as_ref());

        engine.delete(&remote("/t", true)).await.unwrap();
        assert!(!session.exists("/t"));
        assert!(session.children("/").is_empty());
    }

    #[tokio::test]
    async fn test_other_error_skips_enumeration() {
        let session = MemorySession::new();
        session.add_file("/locked/file.txt", b"x");
        session.fail_once(
            "remove_directory",
            "/locked",
            HandleError::status(StatusCode::PermissionDenied, "denied"),
        );
        let engine = DeletionEngine::new(session.as_ref());

        let err = engine.delete(&remote("/locked", true)).await.unwrap_err();

        assert!(matches!(
            err,
            SftpError::Delete {
                source: HandleError::Status {
                    code: StatusCode::PermissionDenied,
                    ..
                },
                ..
            }
        ));
        assert_eq!(session.calls(), ["remove_directory /locked"]);
        assert!(session.exists("/locked/file.txt"));
    }

    #[tokio::test]
    async fn test_first_child_failure_propagates() {
        let session = MemorySession::new();
        session.add_file("/d/a.txt", b"a");
        session.add_file("/d/b.txt", b"b");
        session.add_file("/d/c.txt", b"c");
        session.fail_once(
            "remove_file",
            "/d/b.txt",
            HandleError::status(StatusCode::PermissionDenied, "denied"),
        );
        let engine = DeletionEngine::new(session.as_ref());

        let err = engine.delete(&remote("/d", true)).await.unwrap_err();

        match err {
            SftpError::Delete { path, .. } => assert!(path.ends_with("/d/b.txt")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!session.exists("/d/a.txt"));
        assert!(session.exists("/d/b.txt"));
        assert!(session.exists("/d/c.txt"));
        assert!(!session.calls().contains(&"remove_file /d/c.txt".to_string()));
    }
}
