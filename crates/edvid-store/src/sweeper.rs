//! Background snapshot/retention sweeper.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::JobStore;

/// Spawn the periodic sweeper: every `snapshot_interval` it snapshots the
/// store and removes expired jobs. On shutdown it runs one final snapshot
/// so a clean restart loses nothing.
pub fn spawn_sweeper(store: Arc<JobStore>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = store.config().snapshot_interval;
        let retention = store.config().retention;
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so startup isn't
        // snapshotting an empty store.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    store.cleanup_expired(retention).await;
                    if let Err(e) = store.snapshot().await {
                        warn!("job store snapshot failed: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    let stop = changed.is_err() || *shutdown.borrow();
                    if stop {
                        if let Err(e) = store.snapshot().await {
                            warn!("final job store snapshot failed: {e}");
                        }
                        info!("job store sweeper stopped");
                        return;
                    }
                }
            }
        }
    })
}
