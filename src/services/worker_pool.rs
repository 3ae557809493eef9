//! Fixed-width pool of import workers.
//!
//! Jobs beyond the pool width wait in the queue; no extra workers are spawned.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures_util::future::BoxFuture;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error};

type Task = BoxFuture<'static, ()>;

#[derive(Debug, thiserror::Error)]
#[error("worker pool is shut down")]
pub struct PoolClosed;

#[derive(Clone)]
pub struct WorkerPool {
    sender: mpsc::UnboundedSender<Task>,
    width: usize,
    busy: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn `width` workers on the current tokio runtime.
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        let (sender, receiver) = mpsc::unbounded_channel::<Task>();
        let receiver = Arc::new(Mutex::new(receiver));
        let busy = Arc::new(AtomicUsize::new(0));

        for worker in 0..width {
            let receiver = receiver.clone();
            let busy = busy.clone();
            tokio::spawn(async move {
                loop {
                    let task = receiver.lock().await.recv().await;
                    let Some(task) = task else {
                        debug!(worker, "Import worker stopping");
                        break;
                    };

                    busy.fetch_add(1, Ordering::SeqCst);
                    // A panicking job must not take the worker down with it.
                    if let Err(e) = tokio::spawn(task).await {
                        error!(worker, error = %e, "Import job panicked");
                    }
                    busy.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }

        Self {
            sender,
            width,
            busy,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn submit(&self, task: Task) -> Result<(), PoolClosed> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolClosed);
        }
        self.sender.send(task).map_err(|_| PoolClosed)
    }

    /// Stop accepting jobs. Jobs already queued still run.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Workers currently running a job.
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }
}
