use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Receiver, SendTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::options::{OverflowPolicy, WalOptions};
use crate::wal::record::LogEntry;

/// Work items for the writer thread. Barriers ride the same queue as
/// appends, so a barrier's reply means everything queued before it is done.
enum Command {
    Append(LogEntry),
    Sync(Sender<Result<()>>),
    Rotate(PathBuf, Sender<Result<PathBuf>>),
}

struct Shared {
    out: Mutex<BufWriter<File>>,
    /// File the writer is currently appending to.
    path: Mutex<PathBuf>,
    failed: AtomicBool,
}

impl Shared {
    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn fail(&self, what: &str, e: &std::io::Error) {
        if !self.failed.swap(true, Ordering::AcqRel) {
            tracing::error!(error = %e, "WAL {what} failed; rejecting writes until restart");
        }
    }
}

/// Appends log entries through a bounded queue drained by a background thread.
///
/// Every mutation is enqueued before it becomes visible, so an acknowledged
/// write is at least queued for durability. Two background threads own the
/// file:
///   - the writer thread drains the queue in batches into a BufWriter
///   - the flush thread pushes the buffer to the OS every `flush_interval`
///     and fsyncs every `sync_interval`
///
/// Data flushed but not yet synced is the durability window a crash can lose.
pub struct WalWriter {
    sender: RwLock<Option<Sender<Command>>>,
    shared: Arc<Shared>,
    overflow: OverflowPolicy,
    writer_thread: Mutex<Option<JoinHandle<()>>>,
    flush_thread: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl WalWriter {
    /// Open (or create) the log at `path` for appending.
    ///
    /// `last_timestamp` is the absolute timestamp of the last record already
    /// in the file, so the first new delta continues the existing chain.
    pub fn open(path: &Path, options: &WalOptions, last_timestamp: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let shared = Arc::new(Shared {
            out: Mutex::new(BufWriter::with_capacity(options.buffer_size, file)),
            path: Mutex::new(path.to_path_buf()),
            failed: AtomicBool::new(false),
        });

        let (tx, rx) = bounded(options.queue_capacity);
        let writer_thread = {
            let shared = Arc::clone(&shared);
            let checksums = options.checksums;
            let max_batch = options.max_batch;
            let buffer_size = options.buffer_size;
            thread::Builder::new()
                .name("wal-writer".into())
                .spawn(move || run_writer(rx, shared, last_timestamp, checksums, max_batch, buffer_size))?
        };

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let flush_thread = {
            let shared = Arc::clone(&shared);
            let flush_interval = options.flush_interval;
            let sync_interval = options.sync_interval;
            thread::Builder::new()
                .name("wal-flush".into())
                .spawn(move || run_flusher(stop_rx, shared, flush_interval, sync_interval))?
        };

        Ok(WalWriter {
            sender: RwLock::new(Some(tx)),
            shared,
            overflow: options.overflow,
            writer_thread: Mutex::new(Some(writer_thread)),
            flush_thread: Mutex::new(Some((stop_tx, flush_thread))),
        })
    }

    /// Queue an entry. Returns once it is enqueued, not once it is on disk.
    pub fn append(&self, entry: LogEntry) -> Result<()> {
        if self.shared.is_failed() {
            return Err(Error::WalFailed);
        }
        let sender = self.sender.read();
        let tx = sender.as_ref().ok_or(Error::Closed)?;
        let cmd = Command::Append(entry);
        match self.overflow {
            OverflowPolicy::Block => tx.send(cmd).map_err(|_| Error::Closed),
            OverflowPolicy::Reject { timeout } => {
                tx.send_timeout(cmd, timeout).map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => Error::QueueFull,
                    SendTimeoutError::Disconnected(_) => Error::Closed,
                })
            }
        }
    }

    /// Wait until everything queued so far is written and fsync'd.
    pub fn sync(&self) -> Result<()> {
        self.request(Command::Sync)
    }

    /// Seal the current file and continue appending to a new one at `next`.
    ///
    /// Everything queued before the call lands in the sealed file, which is
    /// fsync'd before the switch. Returns the sealed file's path. The new
    /// file starts a fresh timestamp chain.
    pub fn rotate(&self, next: &Path) -> Result<PathBuf> {
        let next = next.to_path_buf();
        let sealed = self.request(|reply| Command::Rotate(next, reply))?;
        tracing::debug!(sealed = %sealed.display(), active = %self.path().display(), "WAL rotated");
        Ok(sealed)
    }

    /// Stop accepting appends, drain the queue, flush + fsync, join threads.
    /// Safe to call more than once.
    pub fn close(&self) -> Result<()> {
        let sender = self.sender.write().take();
        drop(sender);

        if let Some(handle) = self.writer_thread.lock().take() {
            handle.join().map_err(|_| Error::Disconnected)?;
        }
        if let Some((stop, handle)) = self.flush_thread.lock().take() {
            drop(stop);
            handle.join().map_err(|_| Error::Disconnected)?;
        }

        if self.shared.is_failed() {
            return Err(Error::WalFailed);
        }
        Ok(())
    }

    /// Whether an IO error has put the log into the write-rejecting state.
    pub fn is_failed(&self) -> bool {
        self.shared.is_failed()
    }

    /// The file currently being appended to.
    pub fn path(&self) -> PathBuf {
        self.shared.path.lock().clone()
    }

    /// Swap the output under the writer thread, e.g. for a handle that fails.
    #[cfg(test)]
    pub(crate) fn replace_file(&self, out: BufWriter<File>) {
        *self.shared.out.lock() = out;
    }

    /// Send a barrier command and wait for the writer thread's reply.
    fn request<T>(&self, make: impl FnOnce(Sender<Result<T>>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = bounded(1);
        {
            let sender = self.sender.read();
            let tx = sender.as_ref().ok_or(Error::Closed)?;
            tx.send(make(reply_tx)).map_err(|_| Error::Closed)?;
        }
        reply_rx.recv().map_err(|_| Error::Disconnected)?
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "WAL close on drop failed");
        }
    }
}

fn run_writer(
    rx: Receiver<Command>,
    shared: Arc<Shared>,
    mut last_timestamp: u64,
    checksums: bool,
    max_batch: usize,
    buffer_size: usize,
) {
    // recv() errors only once every sender is gone and the queue is empty
    while let Ok(first) = rx.recv() {
        let batch = std::iter::once(first).chain(rx.try_iter().take(max_batch - 1));
        let mut out = shared.out.lock();
        for cmd in batch {
            match cmd {
                Command::Append(entry) => {
                    if shared.is_failed() {
                        continue;
                    }
                    let encoded = entry.encode(last_timestamp, checksums);
                    match out.write_all(&encoded) {
                        Ok(()) => last_timestamp = last_timestamp.max(entry.timestamp),
                        Err(e) => shared.fail("write", &e),
                    }
                }
                Command::Sync(reply) => {
                    let _ = reply.send(flush_and_sync(&mut out, &shared));
                }
                Command::Rotate(next, reply) => {
                    let result = rotate(&mut out, &shared, next, buffer_size);
                    if result.is_ok() {
                        last_timestamp = 0;
                    }
                    let _ = reply.send(result);
                }
            }
        }
    }

    let mut out = shared.out.lock();
    if let Err(e) = flush_and_sync(&mut out, &shared) {
        tracing::error!(error = %e, "Final WAL sync failed");
    }
}

fn run_flusher(stop: Receiver<()>, shared: Arc<Shared>, flush_interval: Duration, sync_interval: Duration) {
    let ticker = tick(flush_interval);
    let mut last_sync = Instant::now();
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => {
                if shared.is_failed() {
                    continue;
                }
                let mut out = shared.out.lock();
                if let Err(e) = out.flush() {
                    shared.fail("flush", &e);
                    continue;
                }
                if last_sync.elapsed() >= sync_interval {
                    last_sync = Instant::now();
                    if let Err(e) = out.get_ref().sync_data() {
                        shared.fail("sync", &e);
                    }
                }
            }
        }
    }
}

fn flush_and_sync(out: &mut BufWriter<File>, shared: &Shared) -> Result<()> {
    if shared.is_failed() {
        return Err(Error::WalFailed);
    }
    let result = out.flush().and_then(|_| out.get_ref().sync_all());
    result.map_err(|e| {
        shared.fail("sync", &e);
        Error::Io(e)
    })
}

fn rotate(out: &mut BufWriter<File>, shared: &Shared, next: PathBuf, buffer_size: usize) -> Result<PathBuf> {
    flush_and_sync(out, shared)?;
    let file = OpenOptions::new().create(true).append(true).open(&next).map_err(|e| {
        shared.fail("rotate", &e);
        Error::Io(e)
    })?;
    *out = BufWriter::with_capacity(buffer_size, file);
    Ok(std::mem::replace(&mut *shared.path.lock(), next))
}
