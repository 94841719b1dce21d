use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// The eventual result of an operation submitted to the pool.
///
/// The result can be taken once; asking again after a value was delivered
/// reports `Error::Disconnected`.
#[must_use = "an OpHandle does nothing unless waited on"]
pub struct OpHandle<T> {
    rx: Receiver<Result<T>>,
}

impl<T> OpHandle<T> {
    fn new(rx: Receiver<Result<T>>) -> Self {
        Self { rx }
    }

    /// A handle that is already complete.
    pub fn ready(result: Result<T>) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(result);
        Self { rx }
    }

    /// Block until the operation finishes.
    pub fn wait(self) -> Result<T> {
        self.rx.recv().map_err(|_| Error::Disconnected)?
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected),
        }
    }

    /// The result if it is ready, without blocking.
    pub fn try_result(&self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(Error::Disconnected)),
        }
    }
}

/// Fixed-size thread pool with a bounded task queue.
///
/// Submitting to a full queue blocks the caller, which is the backpressure
/// clients feel when the engine falls behind.
pub struct WorkerPool {
    sender: RwLock<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(threads: usize, queue_capacity: usize) -> Result<Self> {
        let (tx, rx) = bounded::<Task>(queue_capacity);
        let workers = (0..threads)
            .map(|i| {
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("kv-worker-{i}"))
                    .spawn(move || run(rx))
                    .map_err(Error::from)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            sender: RwLock::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Queue `f` and return a handle to its result.
    pub fn submit<T, F>(&self, f: F) -> Result<OpHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let task: Task = Box::new(move || {
            // Nobody waiting is fine
            let _ = tx.send(f());
        });

        let sender = self.sender.read();
        let queue = sender.as_ref().ok_or(Error::Closed)?;
        queue.send(task).map_err(|_| Error::Closed)?;
        Ok(OpHandle::new(rx))
    }

    /// Close the queue, let workers finish what is queued, and join them.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.sender.write().take();
        for worker in self.workers.lock().drain(..) {
            if worker.join().is_err() {
                tracing::error!("Pool worker panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(rx: Receiver<Task>) {
    for task in rx {
        // A panicking task drops its reply sender; the caller sees Disconnected
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!("Task panicked");
        }
    }
}
