//! Filesystem Facade
//!
//! The public browse/copy/move/delete/create-folder contract over one remote
//! root. Listings run on the browse queue, every mutation on the
//! file-operations queue; each queue owns its own session handle.
//!
//! Mutations return a [`FileOperation`] immediately. The work itself runs
//! later on the queue and reports through the operation's state.

use std::sync::{Arc, Weak};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::delete::DeletionEngine;
use super::error::SftpError;
use super::handle::SessionHandle;
use super::location::{Location, RemoteRoot};
use super::observer::{FileSystemObserver, ObserverDispatcher};
use super::operation::{FileOperation, OperationKind};
use super::path_utils::is_below;
use super::queue::SerialQueue;
use super::resolver::PathResolver;
use super::session::RusshSftpHandle;
use super::transfer::{check_transfer_control, Boundary, TransferDirection, TransferEngine};
use super::types::{sort_entries, DirectoryListing, FileEntry};
use crate::config::FsConfig;

struct Inner {
    root: RemoteRoot,
    browse: Arc<dyn SessionHandle>,
    ops: Arc<dyn SessionHandle>,
    browse_queue: SerialQueue,
    ops_queue: SerialQueue,
    observer: ObserverDispatcher,
}

pub struct SftpFileSystem {
    inner: Arc<Inner>,
}

impl SftpFileSystem {
    /// Open the browse and file-operations connections and validate the root
    pub async fn connect(config: &FsConfig) -> Result<Self, SftpError> {
        let root = RemoteRoot::new(config.name.clone(), config.root_location()?)?;
        info!("Mounting {} at {}", root.name(), root.location());

        let (browse, ops) = tokio::try_join!(
            RusshSftpHandle::open(&config.connection, "browse", config.chunk_size()),
            RusshSftpHandle::open(&config.connection, "file-operations", config.chunk_size()),
        )?;

        if !browse.directory_exists(root.location().path()).await {
            let _ = browse.close().await;
            let _ = ops.close().await;
            return Err(SftpError::RootInit {
                root: root.location().to_string(),
                reason: "not an existing directory".to_string(),
            });
        }

        Ok(Self::with_sessions(root, Arc::new(browse), Arc::new(ops)))
    }

    /// Build a filesystem over already opened handles. Must be called from
    /// within a tokio runtime.
    pub fn with_sessions(
        root: RemoteRoot,
        browse: Arc<dyn SessionHandle>,
        ops: Arc<dyn SessionHandle>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                root,
                browse,
                ops,
                browse_queue: SerialQueue::new("browse"),
                ops_queue: SerialQueue::new("file-operations"),
                observer: ObserverDispatcher::new(),
            }),
        }
    }

    pub fn root(&self) -> &RemoteRoot {
        &self.inner.root
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn FileSystemObserver>>) {
        self.inner.observer.set_observer(observer);
    }

    /// List a directory under the root
    pub async fn load(&self, location: &Location) -> Result<DirectoryListing, SftpError> {
        if !self.inner.root.contains(location) {
            return Err(SftpError::InvalidLocation(location.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let weak = Arc::downgrade(&self.inner);
        let location = location.clone().with_dir(true);
        self.inner.browse_queue.enqueue(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let _ = tx.send(inner.list(&location).await);
        })?;

        rx.await.map_err(|_| SftpError::Closed)?
    }

    pub fn delete(&self, location: &Location) -> Arc<FileOperation> {
        let op = FileOperation::new(OperationKind::Delete, Some(location.clone()), None);
        let check = self.inner.check_delete(location);
        self.submit(op, check)
    }

    pub fn copy(&self, source: &Location, destination: &Location) -> Arc<FileOperation> {
        let op = FileOperation::new(
            OperationKind::Copy,
            Some(source.clone()),
            Some(destination.clone()),
        );
        let check = self.inner.check_copy(source, destination);
        self.submit(op, check)
    }

    /// Rename within the remote tree
    pub fn move_item(&self, source: &Location, destination: &Location) -> Arc<FileOperation> {
        let op = FileOperation::new(
            OperationKind::Move,
            Some(source.clone()),
            Some(destination.clone()),
        );
        let check = self.inner.check_move(source, destination);
        self.submit(op, check)
    }

    pub fn create_folder(&self, location: &Location) -> Arc<FileOperation> {
        let op = FileOperation::new(OperationKind::CreateFolder, None, Some(location.clone()));
        let check = self.inner.check_create_folder(location);
        self.submit(op, check)
    }

    /// Run everything already queued, then close both connections
    pub async fn close(&self) {
        info!("Closing filesystem {}", self.inner.root.name());
        self.inner.browse_queue.shutdown().await;
        self.inner.ops_queue.shutdown().await;

        let (browse, ops) = tokio::join!(self.inner.browse.close(), self.inner.ops.close());
        if let Err(e) = browse {
            warn!("Failed to close browse session: {}", e);
        }
        if let Err(e) = ops {
            warn!("Failed to close file-operations session: {}", e);
        }
    }

    fn submit(
        &self,
        op: Arc<FileOperation>,
        check: Result<(), SftpError>,
    ) -> Arc<FileOperation> {
        op.submitted();

        if let Err(e) = check {
            warn!("Rejected {:?} operation {}: {}", op.kind(), op.id(), e);
            op.finish(Err(e));
            return op;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let job_op = op.clone();
        let queued = self.inner.ops_queue.enqueue(async move {
            let Some(inner) = weak.upgrade() else {
                debug!("Filesystem gone, abandoning operation {}", job_op.id());
                job_op.finish(Err(SftpError::Closed));
                return;
            };

            let result = inner.execute(&job_op).await;
            match &result {
                Ok(()) => info!("{:?} operation {} completed", job_op.kind(), job_op.id()),
                Err(e) => warn!("{:?} operation {} failed: {}", job_op.kind(), job_op.id(), e),
            }
            job_op.finish(result);
        });

        if let Err(e) = queued {
            op.finish(Err(e));
        }
        op
    }
}

impl Inner {
    async fn list(&self, location: &Location) -> Result<DirectoryListing, SftpError> {
        let raw = self
            .browse
            .list_directory(location.path())
            .await
            .map_err(|e| SftpError::InvalidListing {
                path: location.to_string(),
                source: e,
            })?;

        let mut entries: Vec<FileEntry> = raw
            .iter()
            .filter_map(|entry| FileEntry::from_raw(location, entry))
            .collect();
        sort_entries(&mut entries);

        let free_space = self.browse.free_space(location.path()).await;
        debug!("Loaded {} entries from {}", entries.len(), location);
        Ok(DirectoryListing {
            entries,
            free_space,
        })
    }

    /// Strictly below the root
    fn is_descendant(&self, location: &Location) -> bool {
        self.root.contains(location) && location.path() != self.root.location().path()
    }

    fn check_delete(&self, location: &Location) -> Result<(), SftpError> {
        if !self.is_descendant(location) {
            return Err(SftpError::Precondition(format!(
                "cannot delete {}: not inside {}",
                location,
                self.root.location()
            )));
        }
        Ok(())
    }

    fn check_copy(&self, source: &Location, destination: &Location) -> Result<(), SftpError> {
        let direction = TransferDirection::classify(
            Boundary::of(&self.root, source),
            Boundary::of(&self.root, destination),
        );
        let Some(direction) = direction else {
            return Err(SftpError::Precondition(format!(
                "cannot copy {} to {}: one side must be inside {} and the other inside it or local",
                source,
                destination,
                self.root.location()
            )));
        };
        if direction == TransferDirection::RemoteToRemote
            && is_below(source.path(), destination.path())
        {
            return Err(SftpError::Precondition(format!(
                "cannot copy {} into itself ({})",
                source, destination
            )));
        }
        if self.root.contains(destination) && !self.is_descendant(destination) {
            return Err(SftpError::Precondition(format!(
                "cannot copy onto the root {}",
                destination
            )));
        }
        Ok(())
    }

    fn check_move(&self, source: &Location, destination: &Location) -> Result<(), SftpError> {
        if !(self.is_descendant(source) && self.is_descendant(destination)) {
            return Err(SftpError::Precondition(format!(
                "cannot move {} to {}: both must be inside {}",
                source,
                destination,
                self.root.location()
            )));
        }
        if is_below(source.path(), destination.path()) {
            return Err(SftpError::Precondition(format!(
                "cannot move {} into itself ({})",
                source, destination
            )));
        }
        Ok(())
    }

    fn check_create_folder(&self, location: &Location) -> Result<(), SftpError> {
        if !location.is_dir() {
            return Err(SftpError::Precondition(format!(
                "cannot create folder {}: location is not a directory",
                location
            )));
        }
        if !self.is_descendant(location) {
            return Err(SftpError::Precondition(format!(
                "cannot create folder {}: not inside {}",
                location,
                self.root.location()
            )));
        }
        Ok(())
    }

    async fn execute(&self, op: &Arc<FileOperation>) -> Result<(), SftpError> {
        check_transfer_control(op.control())?;

        let session = self.ops.as_ref();
        let resolver = PathResolver::new(&self.root, session);
        let source = op.source();
        let requested = op.destination();

        match op.kind() {
            OperationKind::Delete => {
                let source = required(source, "source")?;
                DeletionEngine::new(session).delete(source).await
            }
            OperationKind::CreateFolder => {
                let requested = required(requested.as_ref(), "destination")?;
                let target = resolver.resolve(requested).await?;
                self.announce(op, &target).await;
                session
                    .create_directory(target.path())
                    .await
                    .map_err(|e| SftpError::create_directory(&target, e))
            }
            OperationKind::Copy => {
                let source = required(source, "source")?;
                let requested = required(requested.as_ref(), "destination")?;
                let target = resolver.resolve(requested).await?;
                self.announce(op, &target).await;

                let engine = TransferEngine::new(&self.root, session, op.control());
                let landed = engine.copy(source, &target).await?;
                op.set_destination(landed);
                Ok(())
            }
            OperationKind::Move => {
                let source = required(source, "source")?;
                let requested = required(requested.as_ref(), "destination")?;
                let target = resolver.resolve(requested).await?;
                self.announce(op, &target).await;

                let engine = TransferEngine::new(&self.root, session, op.control());
                let landed = engine.move_remote(source, &target).await?;
                op.set_destination(landed);
                Ok(())
            }
        }
    }

    /// Record the resolved destination and let the observer render it
    /// before anything is written there.
    async fn announce(&self, op: &Arc<FileOperation>, target: &Location) {
        op.set_destination(target.clone());
        if self.root.contains(target) {
            self.observer.will_add_file(target, op).await;
        }
    }
}

fn required<'a>(location: Option<&'a Location>, side: &str) -> Result<&'a Location, SftpError> {
    location.ok_or_else(|| SftpError::Precondition(format!("operation has no {}", side)))
}
