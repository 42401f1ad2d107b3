//! A FIFO work queue shared by the scheduler's worker threads.
//!
//! Adapted from `git-branchless-test::worker::WorkQueue`: an unbounded
//! `crossbeam-channel` with dedup-by-acceptance, so that a task which is
//! both a re-enqueued branch successor and already present in the initial
//! task set (§5: "concurrent workers may attempt to process the same
//! node") is only ever handed to one worker.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use crossbeam::channel::{Receiver, RecvError, SendError, Sender};
use tracing::debug;

pub(crate) trait Job: Clone + Copy + Debug + Eq + Hash {}
impl<T: Clone + Copy + Debug + Eq + Hash> Job for T {}

#[derive(Clone)]
pub(crate) struct WorkQueue<J: Job> {
    job_tx: Arc<Mutex<Option<Sender<J>>>>,
    job_rx: Receiver<J>,
    accepted_jobs: Arc<Mutex<HashSet<J>>>,
}

impl<J: Job> WorkQueue<J> {
    pub fn new() -> Self {
        let (job_tx, job_rx) = crossbeam::channel::unbounded();
        Self {
            job_tx: Arc::new(Mutex::new(Some(job_tx))),
            job_rx,
            accepted_jobs: Default::default(),
        }
    }

    /// Enqueues additional jobs without disturbing jobs already queued.
    pub fn set(&self, jobs: Vec<J>) {
        let job_tx = self.job_tx.lock().unwrap();
        let job_tx = match job_tx.as_ref() {
            Some(job_tx) => job_tx,
            None => {
                debug!(?jobs, "tried to enqueue jobs on a closed work queue");
                return;
            }
        };
        for job in jobs {
            debug!(?job, "scheduling job");
            if let Err(SendError(job)) = job_tx.send(job) {
                debug!(?job, "failed to schedule job; queue disconnected");
            }
        }
    }

    /// Closes the queue: no further jobs may be enqueued, and once drained
    /// every `pop_blocking` call returns `None`.
    pub fn close(&self) {
        let mut job_tx = self.job_tx.lock().unwrap();
        *job_tx = None;
    }

    /// Blocks until a job is available or the queue is closed and drained.
    /// Skips jobs already handed to some worker, so the same commit is
    /// never merged concurrently by two workers.
    pub fn pop_blocking(&self) -> Option<J> {
        loop {
            match self.job_rx.recv() {
                Ok(job) => {
                    let mut accepted = self.accepted_jobs.lock().unwrap();
                    if accepted.insert(job) {
                        return Some(job);
                    }
                    debug!(?job, "skipped already-accepted job");
                }
                Err(RecvError) => return None,
            }
        }
    }
}
