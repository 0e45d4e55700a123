use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use super::detect::CapabilityDetector;

/// Calls `detect(false)` on a fixed interval until stopped or dropped.
///
/// Follows the foreground cache rules, so it only probes once the entry has
/// expired or been invalidated. Foreground callers then keep hitting the cache.
pub struct BackgroundRefresher {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    refreshes: Arc<AtomicU64>,
}

impl BackgroundRefresher {
    pub fn spawn(detector: Arc<CapabilityDetector>, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let refreshes = Arc::new(AtomicU64::new(0));
        let counter = refreshes.clone();

        let handle = thread::Builder::new().name("strata-refresh".into()).spawn(move || {
            info!("Capability refresher running every {:?}", interval);
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match detector.detect(false) {
                        Ok(entry) => {
                            counter.fetch_add(1, Ordering::Relaxed);
                            debug!("Background refresh: entry from {:?}", entry.detected_at);
                        }
                        Err(e) => warn!("Background refresh failed: {}", e),
                    },
                    // Stop requested or the owner is gone.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("Capability refresher stopped");
        })?;

        Ok(Self { stop_tx: Some(stop_tx), handle: Some(handle), refreshes })
    }

    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Signals the thread and waits for it. Safe to call twice.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Capability refresher panicked");
            }
        }
    }
}

impl Drop for BackgroundRefresher {
    fn drop(&mut self) {
        self.stop();
    }
}
