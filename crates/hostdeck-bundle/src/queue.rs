//! Bounded-concurrency upload queue.
//!
//! Every accepted file runs as its own task holding one semaphore permit, so
//! [`DeployQueue::push`] waits while all workers are busy. The first failed
//! upload raises the kill flag; files not yet started are abandoned and later
//! failures are ignored. [`DeployQueue::drain`] waits for every accepted task
//! to settle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::deployer::{DeployFile, FileDeployer};
use crate::error::BundleError;

/// Final counters of a drained queue.
#[derive(Debug)]
pub struct QueueReport {
    pub accepted: u64,
    pub completed: u64,
    pub stopped: bool,
    /// First upload failure, or `NoFilesFound`.
    pub error: Option<BundleError>,
}

impl QueueReport {
    pub fn into_result(self) -> Result<QueueReport, BundleError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

pub struct DeployQueue {
    deployer: Arc<FileDeployer>,
    app_id: Arc<str>,
    version_id: Arc<str>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    killed: Arc<AtomicBool>,
    stopped: bool,
    accepted: AtomicU64,
    completed: Arc<AtomicU64>,
    first_error: Arc<Mutex<Option<BundleError>>>,
}

impl DeployQueue {
    pub fn new(
        deployer: Arc<FileDeployer>,
        app_id: &str,
        version_id: &str,
        concurrency: usize,
    ) -> Self {
        Self {
            deployer,
            app_id: Arc::from(app_id),
            version_id: Arc::from(version_id),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: JoinSet::new(),
            killed: Arc::new(AtomicBool::new(false)),
            stopped: false,
            accepted: AtomicU64::new(0),
            completed: Arc::new(AtomicU64::new(0)),
            first_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether new files are still accepted.
    pub fn is_accepting(&self) -> bool {
        !self.stopped && !self.is_killed()
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Stop accepting files. In-flight uploads still finish.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Stop accepting files and abandon those not yet started.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    /// Enqueue a file, waiting for a free worker. Returns false when the
    /// queue no longer accepts files.
    pub async fn push(&mut self, file: DeployFile) -> bool {
        if !self.is_accepting() {
            return false;
        }
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            return false;
        };
        // A worker may have failed while we waited.
        if !self.is_accepting() {
            return false;
        }
        self.accepted.fetch_add(1, Ordering::SeqCst);

        let deployer = self.deployer.clone();
        let app_id = self.app_id.clone();
        let version_id = self.version_id.clone();
        let killed = self.killed.clone();
        let completed = self.completed.clone();
        let first_error = self.first_error.clone();

        self.tasks.spawn(async move {
            let _permit = permit;
            if killed.load(Ordering::SeqCst) {
                debug!(path = %file.path, "queue killed, abandoning file");
                return;
            }
            let path = file.path.clone();
            match deployer.deploy(&app_id, &version_id, file).await {
                Ok(_) => {
                    completed.fetch_add(1, Ordering::SeqCst);
                }
                Err(err) => {
                    if killed.swap(true, Ordering::SeqCst) {
                        debug!(%path, error = %err, "ignoring failure after kill");
                        return;
                    }
                    warn!(%path, error = %err, "error deploying file");
                    *first_error.lock().await = Some(err);
                }
            }
        });
        true
    }

    /// Wait for every accepted upload to settle.
    pub async fn drain(mut self) -> QueueReport {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "upload task panicked");
                let mut slot = self.first_error.lock().await;
                if slot.is_none() {
                    *slot = Some(BundleError::Task(e.to_string()));
                }
                self.killed.store(true, Ordering::SeqCst);
            }
        }

        let accepted = self.accepted();
        let completed = self.completed();
        let mut error = self.first_error.lock().await.take();
        if error.is_none() && accepted == 0 && !self.stopped {
            error = Some(BundleError::NoFilesFound);
        }
        debug!(
            accepted,
            completed,
            stopped = self.stopped,
            failed = error.is_some(),
            "deploy queue drained"
        );

        QueueReport {
            accepted,
            completed,
            stopped: self.stopped,
            error,
        }
    }
}
