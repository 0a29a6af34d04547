//! Serial work queue
//!
//! One worker task runs the queued units one at a time, in submission order.
//! The filesystem keeps two of these (browse and file operations) so a long
//! listing never blocks a mutation and vice versa.

use std::future::Future;
use std::pin::Pin;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::error::SftpError;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct SerialQueue {
    label: &'static str,
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialQueue {
    /// Start the worker. Must be called from within a tokio runtime.
    pub fn new(label: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let worker = tokio::spawn(async move {
            debug!("{} queue started", label);
            while let Some(job) = rx.recv().await {
                job.await;
                trace!("{} queue: unit finished", label);
            }
            debug!("{} queue drained", label);
        });

        Self {
            label,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Append a unit of work. Fails once the queue has been shut down.
    pub fn enqueue<F>(&self, job: F) -> Result<(), SftpError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(SftpError::Closed)?;
        tx.send(Box::pin(job)).map_err(|_| SftpError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().as_ref().map_or(true, |tx| tx.is_closed())
    }

    /// Stop accepting work and wait for everything already queued to run
    pub async fn shutdown(&self) {
        drop(self.tx.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                debug!("{} queue worker ended abnormally: {}", self.label, e);
            }
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        // Dropping the sender lets the worker finish what is queued and exit
        self.tx.get_mut().take();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_runs_in_submission_order() {
        let queue = SerialQueue::new("test");
        let log = Arc::new(Mutex::new(Vec::new()));

        for (i, delay) in [30u64, 0, 10].into_iter().enumerate() {
            let log = log.clone();
            queue
                .enqueue(async move {
                    log.lock().push(format!("start {}", i));
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    log.lock().push(format!("end {}", i));
                })
                .unwrap();
        }
        queue.shutdown().await;

        assert_eq!(
            *log.lock(),
            ["start 0", "end 0", "start 1", "end 1", "start 2", "end 2"]
        );
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_fails() {
        let queue = SerialQueue::new("test");
        queue.shutdown().await;
        assert!(queue.is_closed());
        assert!(matches!(queue.enqueue(async {}), Err(SftpError::Closed)));
    }
}
