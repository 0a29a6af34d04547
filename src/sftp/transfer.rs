//! Transfer Engine
//!
//! Recursive, directory-aware copy across the local/remote boundary:
//! remote→remote (one server-side copy call), remote→local (download) and
//! local→remote (upload). Names are resolved independently at every level of
//! recursion, so a directory copy may rename the top-level folder and any
//! colliding file inside it.
//!
//! Cancellation is cooperative. The [`TransferControl`] is polled on every
//! progress tick and before each item of a directory; files finished before
//! the cancellation stay where they are.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::error::{HandleError, SftpError};
use super::handle::SessionHandle;
use super::location::{Location, RemoteRoot};
use super::resolver::PathResolver;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Cancellation signal shared between an operation and its transfer
#[derive(Debug)]
pub struct TransferControl {
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl TransferControl {
    pub fn new() -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            cancel_tx,
            cancel_rx,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Fail fast when the transfer has been cancelled
pub fn check_transfer_control(control: &TransferControl) -> Result<(), SftpError> {
    if control.is_cancelled() {
        return Err(SftpError::TransferCancelled);
    }
    Ok(())
}

/// Which side of the boundary a location lies on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Under this filesystem's root
    Remote,
    /// Plain local filesystem location
    Local,
    /// Remote, but outside the root (another host or tree)
    Foreign,
}

impl Boundary {
    pub fn of(root: &RemoteRoot, location: &Location) -> Self {
        if root.contains(location) {
            Boundary::Remote
        } else if location.is_local() {
            Boundary::Local
        } else {
            Boundary::Foreign
        }
    }
}

/// Transfer direction, decided once per call from both boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    RemoteToRemote,
    Download,
    Upload,
}

impl TransferDirection {
    pub fn classify(source: Boundary, destination: Boundary) -> Option<Self> {
        match (source, destination) {
            (Boundary::Remote, Boundary::Remote) => Some(Self::RemoteToRemote),
            (Boundary::Remote, Boundary::Local) => Some(Self::Download),
            (Boundary::Local, Boundary::Remote) => Some(Self::Upload),
            _ => None,
        }
    }
}

pub struct TransferEngine<'a> {
    root: &'a RemoteRoot,
    session: &'a dyn SessionHandle,
    control: &'a TransferControl,
}

impl<'a> TransferEngine<'a> {
    pub fn new(
        root: &'a RemoteRoot,
        session: &'a dyn SessionHandle,
        control: &'a TransferControl,
    ) -> Self {
        Self {
            root,
            session,
            control,
        }
    }

    fn resolver(&self) -> PathResolver<'a> {
        PathResolver::new(self.root, self.session)
    }

    fn keep_going(&self) -> impl Fn(u64) -> bool + Send + Sync + 'a {
        let control = self.control;
        move |_| !control.is_cancelled()
    }

    /// Copy `source` to `destination`, returning where the copy landed
    pub async fn copy(
        &self,
        source: &Location,
        destination: &Location,
    ) -> Result<Location, SftpError> {
        let direction = TransferDirection::classify(
            Boundary::of(self.root, source),
            Boundary::of(self.root, destination),
        )
        .ok_or_else(|| {
            SftpError::Unsupported(format!("copy from {} to {}", source, destination))
        })?;

        info!("Copying {} to {} ({:?})", source, destination, direction);

        match direction {
            TransferDirection::RemoteToRemote => {
                check_transfer_control(self.control)?;
                let target = self.resolver().resolve(destination).await?;
                let progress = self.keep_going();
                self.session
                    .copy_remote(source.path(), target.path(), &progress)
                    .await
                    .map_err(|e| SftpError::copy(source, &target, e))?;
                Ok(target)
            }
            TransferDirection::Download => self.download(source, destination).await,
            TransferDirection::Upload => self.upload(source, destination).await,
        }
    }

    /// Remote → local
    pub fn download<'b>(
        &'b self,
        source: &'b Location,
        destination: &'b Location,
    ) -> BoxFuture<'b, Result<Location, SftpError>> {
        Box::pin(async move {
            check_transfer_control(self.control)?;

            if !source.is_dir() {
                return self.download_file(source, destination).await;
            }

            let entries = match self.session.list_directory(source.path()).await {
                Ok(entries) => entries,
                Err(e) => return Err(self.listing_error(source, destination, e).await),
            };
            let target = self.resolver().ensure_directory(destination).await?;
            debug!("Downloading {} entries from {} into {}", entries.len(), source, target);

            for raw in entries {
                let Some(name) = raw.name.as_deref().filter(|n| is_child_name(n)) else {
                    continue;
                };
                self.download(&source.join(name, raw.is_dir), &target.join(name, raw.is_dir))
                    .await?;
            }
            Ok(target)
        })
    }

    async fn download_file(
        &self,
        source: &Location,
        destination: &Location,
    ) -> Result<Location, SftpError> {
        let target = self.resolver().resolve(destination).await?;
        let path = target
            .local_path()
            .ok_or_else(|| SftpError::InvalidLocation(target.to_string()))?;

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| SftpError::OutputStream {
                path: target.to_string(),
                source: e,
            })?;

        let progress = self.keep_going();
        let result = self
            .session
            .read_file(source.path(), &mut file, &progress)
            .await;
        let result = match result {
            Ok(bytes) => file.flush().await.map(|_| bytes).map_err(HandleError::from),
            Err(e) => Err(e),
        };
        drop(file);

        match result {
            Ok(bytes) => {
                debug!("Downloaded {} ({} bytes) to {}", source, bytes, target);
                Ok(target)
            }
            Err(e) => {
                discard_partial_local(&path).await;
                Err(SftpError::copy(source, &target, e))
            }
        }
    }

    /// Local → remote
    pub fn upload<'b>(
        &'b self,
        source: &'b Location,
        destination: &'b Location,
    ) -> BoxFuture<'b, Result<Location, SftpError>> {
        Box::pin(async move {
            check_transfer_control(self.control)?;

            let path = source
                .local_path()
                .ok_or_else(|| SftpError::InvalidLocation(source.to_string()))?;
            let metadata = tokio::fs::metadata(&path)
                .await
                .map_err(|e| SftpError::InputStream {
                    path: source.to_string(),
                    source: e,
                })?;

            if !source.is_dir() {
                return self.upload_file(source, &path, destination).await;
            }
            if !metadata.is_dir() {
                return Err(SftpError::NotADirectory(source.to_string()));
            }

            let children = list_local_children(&path)
                .await
                .map_err(|e| SftpError::copy(source, destination, HandleError::from(e)))?;
            let target = self.resolver().ensure_directory(destination).await?;
            debug!("Uploading {} entries from {} into {}", children.len(), source, target);

            for (name, is_dir) in children {
                self.upload(&source.join(&name, is_dir), &target.join(&name, is_dir))
                    .await?;
            }
            Ok(target)
        })
    }

    async fn upload_file(
        &self,
        source: &Location,
        path: &Path,
        destination: &Location,
    ) -> Result<Location, SftpError> {
        let target = self.resolver().resolve(destination).await?;

        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| SftpError::InputStream {
                path: source.to_string(),
                source: e,
            })?;

        let progress = self.keep_going();
        match self
            .session
            .write_file(&mut file, target.path(), &progress)
            .await
        {
            Ok(bytes) => {
                debug!("Uploaded {} ({} bytes) to {}", source, bytes, target);
                Ok(target)
            }
            Err(e) => {
                if let Err(cleanup) = self.session.remove_file(target.path()).await {
                    debug!("No partial upload to discard at {}: {}", target, cleanup);
                }
                Err(SftpError::copy(source, &target, e))
            }
        }
    }

    /// Rename within the remote tree; any other combination must be a copy
    /// followed by a delete.
    pub async fn move_remote(
        &self,
        source: &Location,
        destination: &Location,
    ) -> Result<Location, SftpError> {
        if !(self.root.contains(source) && self.root.contains(destination)) {
            return Err(SftpError::Unsupported(format!(
                "move from {} to {} (only within the remote tree)",
                source, destination
            )));
        }

        let target = self.resolver().resolve(destination).await?;
        info!("Moving {} to {}", source, target);
        self.session
            .rename(source.path(), target.path())
            .await
            .map_err(|e| SftpError::Move {
                from: source.to_string(),
                to: target.to_string(),
                source: e,
            })?;
        Ok(target)
    }

    async fn listing_error(
        &self,
        source: &Location,
        destination: &Location,
        error: HandleError,
    ) -> SftpError {
        if self.session.file_exists(source.path()).await {
            return SftpError::NotADirectory(source.to_string());
        }
        SftpError::copy(source, destination, error)
    }
}

fn is_child_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".."
}

/// Direct children of a local directory as `(name, is_dir)`, without
/// descending into anything.
///
/// Symlinks are never treated as directories: a link to a file is uploaded by
/// content, links to directories and dangling links are skipped.
async fn list_local_children(path: &Path) -> std::io::Result<Vec<(String, bool)>> {
    let mut children = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let file_type = entry.file_type().await?;
        let is_dir = if file_type.is_symlink() {
            match tokio::fs::metadata(entry.path()).await {
                Ok(metadata) if metadata.is_file() => false,
                Ok(_) => {
                    warn!("Skipping directory symlink {}", entry.path().display());
                    continue;
                }
                Err(e) => {
                    warn!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            }
        } else {
            file_type.is_dir()
        };
        children.push((name, is_dir));
    }
    children.sort();
    Ok(children)
}

async fn discard_partial_local(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!("No partial download to discard at {}: {}", path.display(), e);
    }
}
