//! Bounded worker pool (C6, spec §4.6).
//!
//! CPU-bound transform jobs are dispatched through a bounded channel and
//! gated by a semaphore, so the number of concurrently-running transforms
//! never exceeds `pool_size` and the number of queued-but-not-yet-running
//! jobs never exceeds `queue_depth`. A full queue backpressures the caller
//! by blocking `enqueue` rather than growing without bound or failing fast
//! (spec §5, §4.6).

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;

use crate::error::ServerError;

type JobFn = Box<dyn FnOnce() -> Result<Vec<u8>, ServerError> + Send + 'static>;

struct Job {
    work: JobFn,
    reply: oneshot::Sender<Result<Vec<u8>, ServerError>>,
}

/// A pool handle that can be cloned freely; the dispatcher task owns the
/// receiving end of the channel.
#[derive(Clone)]
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
}

pub struct WorkerPoolHandle {
    pub pool: WorkerPool,
    dispatcher: JoinHandle<()>,
}

impl WorkerPoolHandle {
    pub fn shutdown(self) {
        self.dispatcher.abort();
    }
}

impl WorkerPool {
    /// Spin up a dispatcher task bounded to `pool_size` concurrent jobs with
    /// a queue of `queue_depth` pending entries.
    pub fn spawn(pool_size: usize, queue_depth: usize) -> WorkerPoolHandle {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_depth.max(1));
        let semaphore = Arc::new(Semaphore::new(pool_size.max(1)));

        let dispatcher = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let permit = semaphore.clone().acquire_owned().await;
                tokio::spawn(async move {
                    let _permit = permit;
                    let outcome = tokio::task::spawn_blocking(job.work)
                        .await
                        .unwrap_or_else(|_| {
                            Err(ServerError::Processing("worker task panicked".into()))
                        });
                    let _ = job.reply.send(outcome);
                });
            }
        });

        WorkerPoolHandle {
            pool: WorkerPool { sender: tx },
            dispatcher,
        }
    }

    /// Enqueue `work` and await its result. When the queue is full, this
    /// call blocks until a slot frees up rather than failing fast — the
    /// bounded channel backpressures the caller instead of rejecting it
    /// (spec §4.6/§5). Only a shut-down dispatcher surfaces as `Processing`.
    pub async fn run<F>(&self, work: F) -> Result<Vec<u8>, ServerError>
    where
        F: FnOnce() -> Result<Vec<u8>, ServerError> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job = Job {
            work: Box::new(work),
            reply: reply_tx,
        };

        self.sender
            .send(job)
            .await
            .map_err(|_| ServerError::Processing("worker pool shut down".into()))?;

        reply_rx
            .await
            .unwrap_or_else(|_| Err(ServerError::Processing("worker pool shut down".into())))
    }
}
