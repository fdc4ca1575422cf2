//! Background worker that persists released cold chunks.

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use strata_common::{Result, StrataError};
use tracing::error;

/// A unit of clip work.
pub type ClipJob = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// Single worker thread behind a bounded queue.
///
/// With a queue of one, at most one job runs while one more waits; further
/// submitters block.
pub struct ClipPool {
    sender: Option<Sender<ClipJob>>,
    worker: Option<JoinHandle<()>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl ClipPool {
    pub fn new(queue_size: usize) -> Result<Self> {
        let (sender, receiver) = bounded::<ClipJob>(queue_size);
        let failure = Arc::new(Mutex::new(None));

        let worker_failure = Arc::clone(&failure);
        let worker = thread::Builder::new()
            .name("strata-clip".to_string())
            .spawn(move || {
                for job in receiver.iter() {
                    if let Err(e) = job() {
                        error!(error = %e, "clip failed");
                        worker_failure.lock().get_or_insert_with(|| e.to_string());
                    }
                }
            })?;

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            failure,
        })
    }

    /// Queues a job, blocking while the queue is full.
    ///
    /// Fails fast once any earlier job has failed.
    pub fn add(&self, job: ClipJob) -> Result<()> {
        self.check()?;
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| StrataError::Internal("clip pool already joined".to_string()))?;
        sender
            .send(job)
            .map_err(|_| StrataError::Internal("clip worker stopped".to_string()))
    }

    /// Fails with `ClipFailed` once any job has failed.
    pub fn check(&self) -> Result<()> {
        match self.failure.lock().as_ref() {
            Some(reason) => Err(StrataError::ClipFailed(reason.clone())),
            None => Ok(()),
        }
    }

    /// Finishes every queued job and stops the worker.
    ///
    /// Returns the first job failure, if any.
    pub fn join(&mut self) -> Result<()> {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| StrataError::Internal("clip worker panicked".to_string()))?;
        }
        match self.failure.lock().take() {
            Some(reason) => Err(StrataError::ClipFailed(reason)),
            None => Ok(()),
        }
    }
}

impl Drop for ClipPool {
    fn drop(&mut self) {
        let _ = self.join();
    }
}
