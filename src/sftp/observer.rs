//! Observer notifications
//!
//! Observers are always called from one presentation task, never from a
//! queue worker. The worker waits for the observer to return before it writes
//! the new item, so a placeholder can be rendered ahead of time.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::location::Location;
use super::operation::FileOperation;

/// Receives notice of items about to appear in the tree
pub trait FileSystemObserver: Send + Sync {
    /// Called before a new item becomes visible at `location`
    fn on_will_add_file(&self, location: &Location, operation: &Arc<FileOperation>);
}

struct Notification {
    observer: Arc<dyn FileSystemObserver>,
    location: Location,
    operation: Arc<FileOperation>,
    ack: oneshot::Sender<()>,
}

pub struct ObserverDispatcher {
    tx: mpsc::UnboundedSender<Notification>,
    observer: RwLock<Option<Arc<dyn FileSystemObserver>>>,
}

impl ObserverDispatcher {
    /// Start the presentation task. Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                trace!("Delivering will-add for {}", notification.location);
                notification
                    .observer
                    .on_will_add_file(&notification.location, &notification.operation);
                let _ = notification.ack.send(());
            }
            debug!("Observer presentation task stopped");
        });

        Self {
            tx,
            observer: RwLock::new(None),
        }
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn FileSystemObserver>>) {
        *self.observer.write() = observer;
    }

    pub fn has_observer(&self) -> bool {
        self.observer.read().is_some()
    }

    /// Notify the registered observer and wait until it has run
    pub async fn will_add_file(&self, location: &Location, operation: &Arc<FileOperation>) {
        let Some(observer) = self.observer.read().clone() else {
            return;
        };

        let (ack, done) = oneshot::channel();
        let notification = Notification {
            observer,
            location: location.clone(),
            operation: operation.clone(),
            ack,
        };
        if self.tx.send(notification).is_err() {
            debug!("Presentation task gone, dropping will-add for {}", location);
            return;
        }
        // An observer that panicked drops the ack; proceed either way
        let _ = done.await;
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::sftp::operation::OperationKind;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl FileSystemObserver for Recorder {
        fn on_will_add_file(&self, location: &Location, _operation: &Arc<FileOperation>) {
            self.seen.lock().push(location.path().to_string());
        }
    }

    fn op() -> Arc<FileOperation> {
        FileOperation::new(OperationKind::CreateFolder, None, None)
    }

    #[tokio::test]
    async fn test_delivers_before_returning() {
        let dispatcher = ObserverDispatcher::new();
        let recorder = Arc::new(Recorder::default());
        dispatcher.set_observer(Some(recorder.clone()));

        let location = Location::remote("h", None, None, "/new", true);
        dispatcher.will_add_file(&location, &op()).await;
        assert_eq!(recorder.seen.lock().len(), 1);

        dispatcher
            .will_add_file(&location.with_file_name("other"), &op())
            .await;
        let seen = recorder.seen.lock();
        assert_eq!(*seen, ["/new", "/other"]);
    }

    #[tokio::test]
    async fn test_no_observer_is_noop() {
        let dispatcher = ObserverDispatcher::new();
        assert!(!dispatcher.has_observer());
        dispatcher
            .will_add_file(&Location::remote("h", None, None, "/x", false), &op())
            .await;
    }
}
