//! Path Resolver: picks non-colliding destination names and makes sure
//! destination directories exist, on either side of the boundary.
//!
//! The existence checks race with external writers. Operations of one
//! filesystem never race each other because they run on a single serial queue.

use tracing::{debug, trace};

use super::error::{HandleError, SftpError};
use super::handle::SessionHandle;
use super::location::{Location, RemoteRoot};
use super::path_utils::numbered_name;
use super::types::constants::MAX_NAME_ATTEMPTS;

pub struct PathResolver<'a> {
    root: &'a RemoteRoot,
    session: &'a dyn SessionHandle,
}

impl<'a> PathResolver<'a> {
    pub fn new(root: &'a RemoteRoot, session: &'a dyn SessionHandle) -> Self {
        Self { root, session }
    }

    /// Return `candidate`, or the first `name (n)` variant of it, such that
    /// neither a file nor a directory currently exists there.
    pub async fn resolve(&self, candidate: &Location) -> Result<Location, SftpError> {
        if !self.root.contains(candidate) && !candidate.is_local() {
            return Err(SftpError::InvalidLocation(candidate.to_string()));
        }

        if !self.exists(candidate).await {
            return Ok(candidate.clone());
        }

        let name = candidate
            .file_name()
            .ok_or_else(|| SftpError::InvalidLocation(candidate.to_string()))?;

        for n in 2..=MAX_NAME_ATTEMPTS {
            let next = candidate.with_file_name(&numbered_name(&name, n, candidate.is_dir()));
            if !self.exists(&next).await {
                debug!("Resolved {} to {}", candidate, next);
                return Ok(next);
            }
            if n == 4 {
                trace!(
                    "Multiple collisions for {}, continuing to search a free name",
                    candidate
                );
            }
        }

        Err(SftpError::InvalidLocation(format!(
            "{}: no free name after {} attempts",
            candidate, MAX_NAME_ATTEMPTS
        )))
    }

    /// Make sure a directory exists at `location`.
    ///
    /// An existing directory is reused as is. Otherwise a non-colliding name
    /// is resolved and the directory is created there (parents included on the
    /// local side). Returns where the directory actually lives.
    pub async fn ensure_directory(&self, location: &Location) -> Result<Location, SftpError> {
        let location = location.clone().with_dir(true);
        if self.directory_exists(&location).await {
            return Ok(location);
        }

        let target = self.resolve(&location).await?;
        if let Some(path) = target.local_path() {
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| SftpError::create_directory(&target, HandleError::from(e)))?;
        } else {
            self.session
                .create_directory(target.path())
                .await
                .map_err(|e| SftpError::create_directory(&target, e))?;
        }
        debug!("Created directory {}", target);
        Ok(target)
    }

    async fn exists(&self, location: &Location) -> bool {
        match location.local_path() {
            Some(path) => tokio::fs::symlink_metadata(&path).await.is_ok(),
            None => {
                self.session.file_exists(location.path()).await
                    || self.session.directory_exists(location.path()).await
            }
        }
    }

    async fn directory_exists(&self, location: &Location) -> bool {
        match location.local_path() {
            Some(path) => tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            None => self.session.directory_exists(location.path()).await,
        }
    }
}
