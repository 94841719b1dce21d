use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::compaction::SstManager;
use crate::error::{Error, Result};
use crate::memtable::FrozenQueue;
use crate::types::Snapshot;
use crate::wal::WalManager;

/// A frozen buffer and the WAL segments that hold its writes.
pub(crate) struct FlushJob {
    pub(crate) snapshot: Arc<Snapshot>,
    pub(crate) wal_segments: Vec<PathBuf>,
}

enum Message {
    Flush(FlushJob),
    Barrier(Sender<Result<()>>),
}

/// Background thread that turns frozen snapshots into level-0 SSTables.
///
/// Snapshots are flushed strictly in freeze order so table ids follow data
/// age. A failed flush keeps the snapshot (still readable through the
/// frozen queue) at the head of the line; it is retried before anything
/// newer on the next message. A snapshot's WAL segments are deleted only
/// after its table is published.
pub(crate) struct Flusher {
    tx: Option<Sender<Message>>,
    handle: Option<JoinHandle<()>>,
}

impl Flusher {
    pub(crate) fn spawn(sst: Arc<SstManager>, frozen: FrozenQueue) -> Result<Self> {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name("memtable-flush".into())
            .spawn(move || run(rx, sst, frozen))?;
        Ok(Flusher {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    pub(crate) fn submit(&self, job: FlushJob) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::Closed)?;
        tx.send(Message::Flush(job)).map_err(|_| Error::Disconnected)
    }

    /// Returns once everything submitted so far is published, or the first
    /// flush error.
    pub(crate) fn wait(&self) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::Closed)?;
        let (reply_tx, reply_rx) = bounded(1);
        tx.send(Message::Barrier(reply_tx)).map_err(|_| Error::Disconnected)?;
        reply_rx.recv().map_err(|_| Error::Disconnected)?
    }

    /// Close the queue and join; pending snapshots get a last flush attempt.
    pub(crate) fn stop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Memtable flush thread panicked");
            }
        }
    }
}

fn run(rx: Receiver<Message>, sst: Arc<SstManager>, frozen: FrozenQueue) {
    let mut pending = VecDeque::new();
    for message in rx {
        match message {
            Message::Flush(job) => {
                pending.push_back(job);
                // Errors are already logged; the snapshot stays queued
                let _ = drain(&mut pending, &sst, &frozen);
            }
            Message::Barrier(reply) => {
                let _ = reply.send(drain(&mut pending, &sst, &frozen));
            }
        }
    }

    if drain(&mut pending, &sst, &frozen).is_err() {
        tracing::error!(
            unflushed = pending.len(),
            "Memtable flush worker exiting with unflushed snapshots; the WAL still holds them"
        );
    }
}

fn drain(pending: &mut VecDeque<FlushJob>, sst: &SstManager, frozen: &FrozenQueue) -> Result<()> {
    while let Some(job) = pending.front() {
        if let Err(e) = sst.flush_to_sstable(&job.snapshot) {
            tracing::error!(error = %e, entries = job.snapshot.len(), "Memtable flush failed; will retry");
            return Err(e);
        }
        // Published first, then dropped from the log and the frozen queue
        if let Some(done) = pending.pop_front() {
            for segment in &done.wal_segments {
                if let Err(e) = WalManager::delete_wal(segment) {
                    tracing::warn!(error = %e, path = %segment.display(), "Failed to delete flushed WAL segment");
                }
            }
            frozen.write().retain(|s| !Arc::ptr_eq(s, &done.snapshot));
        }
    }
    Ok(())
}
