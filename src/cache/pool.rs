//! Shared background worker pool

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use flume::Sender;
use log::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

const THREAD_NAME_PREFIX: &str = "page-loader-";

/// Whether a thread with this name is one of the pool's workers
#[must_use]
pub fn is_worker_thread(name: Option<&str>) -> bool {
    name.is_some_and(|name| name.starts_with(THREAD_NAME_PREFIX))
}

/// Fixed set of worker threads pulling jobs from one shared queue.
///
/// Cloning hands out another submitter for the same workers. Workers exit
/// once every handle has been dropped and the queue is drained.
#[derive(Clone)]
pub struct WorkerPool {
    tx: Sender<Job>,
    size: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> std::io::Result<Self> {
        let workers = workers.max(1);

        // flume gives us MPMC: every worker clones the receiver and pulls
        // from the same queue.
        let (tx, rx) = flume::unbounded::<Job>();

        for id in 0..workers {
            let rx = rx.clone();
            thread::Builder::new()
                .name(format!("{THREAD_NAME_PREFIX}{id}"))
                .spawn(move || {
                    debug!("page-loader-{id}: started");
                    for job in rx {
                        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                            error!(
                                "page-loader-{id}: job panicked: {}",
                                panic_message(payload.as_ref())
                            );
                        }
                    }
                    debug!("page-loader-{id}: queue closed, exiting");
                })?;
        }

        Ok(Self {
            tx,
            size: workers,
        })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue `job`. Returns `false` if no worker is left to run it.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(job)).is_ok()
    }

    /// Jobs waiting for a free worker
    #[must_use]
    pub fn queued(&self) -> usize {
        self.tx.len()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
