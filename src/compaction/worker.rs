use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};

use crate::compaction::SstShared;
use crate::error::Result;

/// Background compaction thread.
///
/// Wakes on a flush nudge or on the periodic tick, then runs tiered
/// compaction. A failed round is logged and retried on the next wake-up;
/// it never reaches client calls.
pub(crate) struct CompactionWorker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl CompactionWorker {
    pub(crate) fn spawn(shared: Arc<SstShared>, interval: Duration) -> Result<Self> {
        let (stop, stop_rx) = bounded::<()>(0);
        let nudge_rx = shared.nudge_rx.clone();
        let handle = thread::Builder::new()
            .name("compaction".into())
            .spawn(move || run(shared, stop_rx, nudge_rx, interval))?;
        Ok(CompactionWorker { stop, handle })
    }

    /// Signal the thread and wait for it (and any in-flight merge) to finish.
    pub(crate) fn stop(self) {
        drop(self.stop);
        if self.handle.join().is_err() {
            tracing::error!("Compaction thread panicked");
        }
    }
}

fn run(shared: Arc<SstShared>, stop: Receiver<()>, nudge: Receiver<()>, interval: Duration) {
    let ticker = tick(interval);
    loop {
        let stopped = select! {
            recv(stop) -> _ => true,
            recv(nudge) -> _ => false,
            recv(ticker) -> _ => false,
        };
        if stopped {
            break;
        }

        match shared.compact() {
            Ok(0) => {}
            Ok(merged) => tracing::debug!(merged, "Compaction round finished"),
            Err(e) => tracing::error!(error = %e, "Compaction failed; retrying on next tick"),
        }
    }
    tracing::info!("Compaction worker stopped");
}
