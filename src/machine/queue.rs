//! Work queue - a plain thread pool with completion collection
//!
//! Tasks flow through two unbounded channels: the scheduling thread sends
//! work in, each worker executes whatever it receives and sends the task
//! back out on the completion channel. Ownership transfer through the
//! channels is the synchronization - a task is touched by exactly one
//! thread at a time, and channel send/recv establishes happens-before
//! between the worker that executed it and the thread that collects it.
//!
//! `cancel` drains whatever is still pending without executing it, then
//! waits for the tasks already in workers' hands to land on the completion
//! channel. The submitted/returned accounting makes that wait exact.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

/// How long `cancel` waits for one in-flight task before giving up on the
/// remainder. Only a worker stuck inside a filesystem call can trip this.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Something a worker thread can run to completion
pub trait WorkItem: Send + 'static {
    fn execute(&mut self);
}

/// Thread pool with enqueue / collect-completed / cancel primitives
pub struct WorkQueue<T: WorkItem> {
    task_tx: Option<Sender<T>>,
    task_rx: Receiver<T>,
    done_rx: Receiver<T>,
    submitted: u64,
    returned: u64,
    workers: Vec<JoinHandle<()>>,
}

impl<T: WorkItem> WorkQueue<T> {
    /// Spawn `threads` workers; spawn failure is fatal for the caller
    pub fn start(threads: usize) -> io::Result<Self> {
        let (task_tx, task_rx) = unbounded::<T>();
        let (done_tx, done_rx) = unbounded::<T>();

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let rx = task_rx.clone();
            let tx = done_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("zap-worker-{id}"))
                .spawn(move || worker_loop(id, rx, tx))?;
            workers.push(handle);
        }

        debug!(count = threads, "workers spawned");

        Ok(Self {
            task_tx: Some(task_tx),
            task_rx,
            done_rx,
            submitted: 0,
            returned: 0,
            workers,
        })
    }

    /// Hand a task to the pool; some worker will eventually execute it
    pub fn enqueue(&mut self, task: T) {
        let tx = self
            .task_tx
            .as_ref()
            .expect("enqueue on a shut-down work queue");
        self.submitted += 1;
        if tx.send(task).is_err() {
            // Unreachable while we hold a receiver clone, but do not let
            // the accounting drift if it ever happens.
            self.submitted -= 1;
            warn!("task channel closed; dropping work");
        }
    }

    /// Drain completed tasks into `out`, blocking up to `timeout` for the
    /// first one
    pub fn collect(&mut self, out: &mut Vec<T>, timeout: Duration) {
        match self.done_rx.recv_timeout(timeout) {
            Ok(task) => {
                self.returned += 1;
                out.push(task);
            }
            Err(_) => return,
        }
        while let Ok(task) = self.done_rx.try_recv() {
            self.returned += 1;
            out.push(task);
        }
    }

    /// Drain all pending and completed tasks into `out` without executing
    /// the pending ones; waits for in-flight tasks to finish
    pub fn cancel(&mut self, out: &mut Vec<T>) {
        while let Ok(task) = self.task_rx.try_recv() {
            self.returned += 1;
            out.push(task);
        }

        while self.returned < self.submitted {
            match self.done_rx.recv_timeout(DRAIN_TIMEOUT) {
                Ok(task) => {
                    self.returned += 1;
                    out.push(task);
                }
                Err(_) => {
                    warn!(
                        outstanding = self.submitted - self.returned,
                        "timed out waiting for in-flight tasks"
                    );
                    break;
                }
            }
        }
    }

    /// Tasks enqueued but not yet collected or cancelled
    pub fn outstanding(&self) -> u64 {
        self.submitted - self.returned
    }
}

impl<T: WorkItem> Drop for WorkQueue<T> {
    fn drop(&mut self) {
        // Closing the task channel is the stop signal.
        self.task_tx = None;
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop<T: WorkItem>(id: usize, task_rx: Receiver<T>, done_tx: Sender<T>) {
    debug!(worker = id, "worker started");

    while let Ok(mut task) = task_rx.recv() {
        task.execute();
        if done_tx.send(task).is_err() {
            break;
        }
    }

    debug!(worker = id, "worker stopped");
}
