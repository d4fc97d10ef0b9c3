//! Single-worker background task queue.
//!
//! # Design
//! - One tokio task drains an unbounded channel of boxed futures, in submission order.
//! - `pending` counts submitted-but-unfinished jobs so callers can wait for the worker to idle.
//! - Stopping closes the channel; jobs already queued still run before the worker exits.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Inner {
    name: &'static str,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pending: AtomicUsize,
    idle: Notify,
}

/// Cloneable handle onto a background worker.
#[derive(Clone)]
pub struct AsyncTaskService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AsyncTaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncTaskService")
            .field("name", &self.inner.name)
            .field("pending", &self.pending())
            .finish()
    }
}

impl AsyncTaskService {
    /// Spawn the worker on the current tokio runtime.
    #[must_use]
    pub fn spawn(name: &'static str) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let inner = Arc::new(Inner {
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(None),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        let worker_inner = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                job.await;
                if worker_inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    worker_inner.idle.notify_waiters();
                }
            }
            debug!(worker = worker_inner.name, "background worker stopped");
        });
        *inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Self { inner }
    }

    /// Queue a job. Returns `false` once the worker has been stopped.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            warn!(worker = self.inner.name, "job submitted after stop");
            return false;
        };
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        if sender.send(Box::pin(job)).is_err() {
            self.inner.pending.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Jobs queued or running.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Wait until every job submitted so far has finished.
    pub async fn wait_for_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting jobs, drain the ones already queued, and join the worker.
    pub async fn stop(&self) {
        drop(
            self.inner
                .sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            warn!(worker = self.inner.name, error = %err, "background worker panicked");
        }
    }
}
