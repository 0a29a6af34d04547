//! File Operation
//!
//! A cancellable, observable handle to one enqueued mutation. Each side
//! (source, destination) moves `Present → InProgress → {Present, Deleted}`
//! exactly once; the state lives in a watch channel so observers on any
//! thread read a consistent snapshot while only the executing queue writes.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use super::error::SftpError;
use super::location::Location;
use super::transfer::TransferControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Delete,
    Copy,
    Move,
    CreateFolder,
}

impl OperationKind {
    fn affects_source(self) -> bool {
        matches!(self, Self::Delete | Self::Move)
    }

    fn affects_destination(self) -> bool {
        matches!(self, Self::Copy | Self::Move | Self::CreateFolder)
    }
}

/// Lifecycle state of one side of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SideState {
    Present,
    InProgress,
    Deleted,
}

/// Point-in-time view of an operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSnapshot {
    pub source_state: SideState,
    pub destination_state: SideState,
    /// Conflict-resolved destination, once known
    pub destination: Option<Location>,
    pub error: Option<String>,
    pub finished: bool,
}

#[derive(Debug)]
pub struct FileOperation {
    id: Uuid,
    kind: OperationKind,
    source: Option<Location>,
    control: TransferControl,
    state: watch::Sender<OperationSnapshot>,
    error: Mutex<Option<Arc<SftpError>>>,
}

impl FileOperation {
    pub(crate) fn new(
        kind: OperationKind,
        source: Option<Location>,
        destination: Option<Location>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(OperationSnapshot {
            source_state: SideState::Present,
            destination_state: SideState::Present,
            destination,
            error: None,
            finished: false,
        });
        Arc::new(Self {
            id: Uuid::new_v4(),
            kind,
            source,
            control: TransferControl::new(),
            state,
            error: Mutex::new(None),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn source(&self) -> Option<&Location> {
        self.source.as_ref()
    }

    pub fn destination(&self) -> Option<Location> {
        self.state.borrow().destination.clone()
    }

    pub fn source_state(&self) -> SideState {
        self.state.borrow().source_state
    }

    pub fn destination_state(&self) -> SideState {
        self.state.borrow().destination_state
    }

    /// The error that ended the operation, if it failed
    pub fn error(&self) -> Option<Arc<SftpError>> {
        self.error.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state.borrow().finished
    }

    pub fn snapshot(&self) -> OperationSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OperationSnapshot> {
        self.state.subscribe()
    }

    /// Wait until the operation reaches its terminal state
    pub async fn wait(&self) -> OperationSnapshot {
        let mut rx = self.subscribe();
        loop {
            if rx.borrow_and_update().finished {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        let snapshot = rx.borrow().clone();
        snapshot
    }

    /// Request cancellation. Transfers notice it on their next progress
    /// tick or before their next file; completed files are kept.
    pub fn cancel(&self) {
        debug!("Cancelling operation {}", self.id);
        self.control.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    pub(crate) fn control(&self) -> &TransferControl {
        &self.control
    }

    /// Mark the affected sides in progress
    pub(crate) fn submitted(&self) {
        let kind = self.kind;
        self.state.send_modify(|s| {
            if kind.affects_source() {
                s.source_state = SideState::InProgress;
            }
            if kind.affects_destination() {
                s.destination_state = SideState::InProgress;
            }
        });
    }

    pub(crate) fn set_destination(&self, destination: Location) {
        self.state
            .send_modify(|s| s.destination = Some(destination));
    }

    /// Move every affected side to its terminal state. On failure the
    /// destination rolls back to `Deleted`, the source to `Present`.
    /// Only the first call has an effect.
    pub(crate) fn finish(&self, result: Result<(), SftpError>) -> bool {
        let kind = self.kind;
        let failed = result.is_err();
        let message = result.as_ref().err().map(ToString::to_string);

        let transitioned = self.state.send_if_modified(|s| {
            if s.finished {
                return false;
            }
            if kind.affects_source() {
                s.source_state = if failed {
                    SideState::Present
                } else {
                    SideState::Deleted
                };
            }
            if kind.affects_destination() {
                s.destination_state = if failed {
                    SideState::Deleted
                } else {
                    SideState::Present
                };
            }
            s.error = message;
            s.finished = true;
            true
        });

        if transitioned {
            if let Err(e) = result {
                *self.error.lock() = Some(Arc::new(e));
            }
        }
        transitioned
    }
}
