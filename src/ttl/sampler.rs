use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};

use crate::error::Result;
use crate::options::TtlOptions;
use crate::ttl::{sweep_threshold, TtlStore};

/// Periodic expiry sampler.
pub(crate) struct Sampler {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Sampler {
    pub(crate) fn spawn(store: Arc<TtlStore>, options: TtlOptions) -> Result<Self> {
        let (stop, stop_rx) = bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("ttl-sampler".into())
            .spawn(move || run(store, options, stop_rx))?;
        Ok(Sampler { stop, handle })
    }

    pub(crate) fn stop(self) {
        drop(self.stop);
        if self.handle.join().is_err() {
            tracing::error!("TTL sampler thread panicked");
        }
    }
}

fn run(store: Arc<TtlStore>, options: TtlOptions, stop: Receiver<()>) {
    let ticker = tick(options.sample_interval);
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => round(&store, &options),
        }
    }
}

fn round(store: &TtlStore, options: &TtlOptions) {
    let (sampled, expired) = store.sample(options.sample_size);
    if sampled == 0 {
        return;
    }
    if expired >= sweep_threshold(sampled, options.expired_fraction, options.min_expired) {
        let removed = store.sweep();
        tracing::debug!(sampled, expired, removed, "TTL sweep");
    }
}
