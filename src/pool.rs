// pool.rs — Fixed-size worker pool for per-point tracking tasks.
//
// N threads pull boxed closures from one bounded channel. The receiver is
// shared behind a mutex; whichever idle worker takes the lock gets the next
// task. `execute` blocks while the queue is full.
//
// A pending counter (mutex + condvar) tracks submitted-but-unfinished tasks
// so callers can `wait_idle`. Dropping the pool closes the channel, lets the
// workers drain what is queued, and joins every thread.
//
// A panicking task is caught and logged; its worker keeps running.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::error::{KltError, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Queue slots per worker.
const QUEUE_DEPTH_PER_WORKER: usize = 4;

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

pub struct WorkerPool {
    sender: Option<SyncSender<Task>>,
    workers: Vec<JoinHandle<()>>,
    pending: Arc<Pending>,
}

impl WorkerPool {
    /// Start `size` worker threads.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(KltError::InvalidPoolSize);
        }
        let (sender, receiver) = mpsc::sync_channel::<Task>(size * QUEUE_DEPTH_PER_WORKER);
        let receiver = Arc::new(Mutex::new(receiver));
        let pending = Arc::new(Pending::default());

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = Arc::clone(&receiver);
            let pending = Arc::clone(&pending);
            let handle = thread::Builder::new()
                .name(format!("kltrack-worker-{id}"))
                .spawn(move || worker_loop(id, &receiver, &pending))
                .map_err(|e| KltError::WorkerSpawn(e.to_string()))?;
            workers.push(handle);
        }
        log::debug!("worker pool started with {size} threads");

        Ok(WorkerPool {
            sender: Some(sender),
            workers,
            pending,
        })
    }

    /// One worker per available core (at least one).
    pub fn with_available_parallelism() -> Result<Self> {
        let n = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new(n)
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a task. Blocks while the queue is full.
    pub fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(KltError::PoolClosed)?;
        self.pending.add();
        if sender.send(Box::new(task)).is_err() {
            self.pending.done();
            return Err(KltError::PoolClosed);
        }
        Ok(())
    }

    /// Block until every submitted task has finished.
    pub fn wait_idle(&self) {
        let mut count = self
            .pending
            .count
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self
                .pending
                .idle
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

fn worker_loop(id: usize, receiver: &Mutex<Receiver<Task>>, pending: &Pending) {
    loop {
        let task = {
            let guard = receiver.lock().unwrap_or_else(PoisonError::into_inner);
            guard.recv()
        };
        let Ok(task) = task else {
            break;
        };
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            log::warn!("worker {id}: task panicked");
        }
        pending.done();
    }
    log::trace!("worker {id} exiting");
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel ends each worker after the queue drains.
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        log::debug!("worker pool shut down");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.workers.len())
            .finish_non_exhaustive()
    }
}
