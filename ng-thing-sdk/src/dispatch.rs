use crate::error::{OpError, OpResult};
use futures::{future::BoxFuture, FutureExt};
use std::{future::Future, sync::Arc};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

type Job = BoxFuture<'static, ()>;

/// Bounded worker pool owned by one device connection.
///
/// Inbound messages are moved off the transport's callback task onto this pool so
/// pipeline execution and application code never block message delivery. `submit`
/// never waits: a full queue rejects the job.
pub struct DispatchPool {
    tx: mpsc::Sender<Job>,
    cancel: CancellationToken,
    workers: usize,
}

impl DispatchPool {
    /// Spawn `workers` tasks sharing one queue of `queue_capacity` jobs.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let cancel = CancellationToken::new();

        for index in 0..workers {
            let rx = Arc::clone(&rx);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let job = tokio::select! {
                        _ = cancel.cancelled() => break,
                        job = async { rx.lock().await.recv().await } => job,
                    };
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
                trace!(worker = index, "Dispatch worker stopped");
            });
        }

        debug!(workers, queue_capacity, "Dispatch pool started");
        Self {
            tx,
            cancel,
            workers,
        }
    }

    /// Enqueue a job without waiting for queue space.
    pub fn submit<F>(&self, job: F) -> OpResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(OpError::Rejected {
                reason: "dispatch pool is shut down".to_string(),
            });
        }
        self.tx.try_send(job.boxed()).map_err(|e| OpError::Rejected {
            reason: match e {
                mpsc::error::TrySendError::Full(_) => "dispatch queue is full".to_string(),
                mpsc::error::TrySendError::Closed(_) => "dispatch pool is shut down".to_string(),
            },
        })
    }

    #[inline]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Stop the workers. Jobs still queued are dropped.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            debug!("Dispatch pool shut down");
        }
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
