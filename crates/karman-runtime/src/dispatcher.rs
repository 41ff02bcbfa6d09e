//! Single serialized execution context.
//!
//! Every I/O completion (accept, connect, receive, close) is posted here as a
//! job. Jobs run one at a time, in posting order, against state that only the
//! dispatcher task can reach. That is what makes session bookkeeping and
//! container mutation race-free without locks.
//!
//! ```text
//!  accept task ─┐
//!  link A rx ───┼──> [ job queue ] ──> dispatcher task ──> &mut S
//!  link B rx ───┤                        (one job at a time)
//!  app handle ──┘
//! ```
//!
//! # Invariants
//!
//! - Jobs from one poster run in the order they were posted.
//! - Jobs never await; anything slow is handed to a task and its completion
//!   posted back.
//! - The task runs until [`Dispatcher::stop`]; jobs queued behind the stop
//!   are dropped, failing their `call`s with `Stopped`.

use std::fmt;

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, trace};

use crate::error::DispatchError;

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Command<S> {
    Run(Job<S>),
    Stop,
}

/// Handle to a running dispatcher. Cheap to clone.
pub struct Dispatcher<S> {
    tx: mpsc::UnboundedSender<Command<S>>,
}

impl<S: Send + 'static> Dispatcher<S> {
    /// Move `state` into a new dispatcher task.
    ///
    /// The task ends after [`Dispatcher::stop`] and returns the state.
    /// Dropping every handle also ends it, but state built with
    /// [`Dispatcher::spawn_with`] usually holds a handle of its own, so
    /// `stop` is the way to end those.
    pub fn spawn(state: S) -> (Self, JoinHandle<S>) {
        Self::spawn_with(|_| state)
    }

    /// Like [`Dispatcher::spawn`], for state that keeps a handle to its own
    /// dispatcher (to post follow-up jobs from I/O callbacks).
    pub fn spawn_with(build: impl FnOnce(Self) -> S) -> (Self, JoinHandle<S>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self { tx };
        let state = build(dispatcher.clone());
        let task = tokio::spawn(run(state, rx));
        (dispatcher, task)
    }

    /// Queue a job.
    ///
    /// # Errors
    ///
    /// `Stopped` if the dispatcher is no longer running.
    pub fn post(&self, job: impl FnOnce(&mut S) + Send + 'static) -> Result<(), DispatchError> {
        self.tx.send(Command::Run(Box::new(job))).map_err(|_| DispatchError::Stopped)
    }

    /// Queue a job and wait for its result.
    ///
    /// # Errors
    ///
    /// `Stopped` if the dispatcher stopped before running the job.
    pub async fn call<R: Send + 'static>(
        &self,
        job: impl FnOnce(&mut S) -> R + Send + 'static,
    ) -> Result<R, DispatchError> {
        let (reply, result) = oneshot::channel();
        self.post(move |state| {
            // Caller may have given up waiting
            let _ = reply.send(job(state));
        })?;
        result.await.map_err(|_| DispatchError::Stopped)
    }

    /// Stop after the jobs already queued.
    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }

    /// True once the dispatcher task has ended
    pub fn is_stopped(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<S> fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").field("stopped", &self.tx.is_closed()).finish()
    }
}

async fn run<S>(mut state: S, mut rx: mpsc::UnboundedReceiver<Command<S>>) -> S {
    let mut executed: u64 = 0;
    while let Some(command) = rx.recv().await {
        match command {
            Command::Run(job) => {
                job(&mut state);
                executed += 1;
                trace!(executed, "dispatcher job done");
            },
            Command::Stop => break,
        }
    }
    rx.close();
    debug!(executed, "dispatcher stopped");
    state
}
