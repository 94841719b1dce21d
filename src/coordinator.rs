use std::sync::Arc;
use std::time::Duration;

use crate::db::DB;
use crate::error::Result;
use crate::options::Options;
use crate::pool::{OpHandle, WorkerPool};
use crate::types::Value;

/// The store's capability contract.
///
/// Every operation returns an `OpHandle`; callers pick blocking
/// (`wait`), bounded (`wait_timeout`) or polling (`try_result`)
/// consumption. A missing key is `Ok(None)`, never an error.
pub trait KvStore {
    fn put(&self, key: &str, value: &str) -> OpHandle<()>;
    fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> OpHandle<()>;
    fn get(&self, key: &str) -> OpHandle<Option<Value>>;
    fn get_ttl(&self, key: &str) -> OpHandle<Option<Value>>;
    fn delete(&self, key: &str) -> OpHandle<()>;
    fn force_flush(&self) -> OpHandle<()>;
    fn shutdown(&self) -> Result<()>;
}

/// Runs engine operations on a fixed worker pool.
pub struct Coordinator {
    db: Arc<DB>,
    pool: WorkerPool,
}

impl Coordinator {
    pub fn open(options: Options) -> Result<Self> {
        let pool = WorkerPool::new(options.worker_threads, options.task_queue_capacity)?;
        let db = Arc::new(DB::open(options)?);
        Ok(Self { db, pool })
    }

    /// The synchronous engine underneath.
    pub fn db(&self) -> &Arc<DB> {
        &self.db
    }

    fn run<T, F>(&self, op: F) -> OpHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&DB) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        self.pool
            .submit(move || op(db.as_ref()))
            .unwrap_or_else(|e| OpHandle::ready(Err(e)))
    }
}

impl KvStore for Coordinator {
    fn put(&self, key: &str, value: &str) -> OpHandle<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.run(move |db| db.put(&key, &value))
    }

    fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> OpHandle<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.run(move |db| db.put_with_ttl(&key, &value, ttl))
    }

    fn get(&self, key: &str) -> OpHandle<Option<Value>> {
        let key = key.to_string();
        self.run(move |db| db.get(&key))
    }

    fn get_ttl(&self, key: &str) -> OpHandle<Option<Value>> {
        let key = key.to_string();
        self.run(move |db| db.get_ttl(&key))
    }

    fn delete(&self, key: &str) -> OpHandle<()> {
        let key = key.to_string();
        self.run(move |db| db.delete(&key))
    }

    fn force_flush(&self) -> OpHandle<()> {
        self.run(|db| db.force_flush())
    }

    /// Shut the engine down, then close the pool and join its workers.
    fn shutdown(&self) -> Result<()> {
        let result = self.db.shutdown();
        self.pool.shutdown();
        result
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Err(e) = KvStore::shutdown(self) {
            tracing::error!(error = %e, "Coordinator shutdown on drop failed");
        }
    }
}
