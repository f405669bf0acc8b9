use std::sync::Arc;
use std::time::Duration;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use crate::limiter::{AdmissionLimiter, Clock};
use crate::storage::ScratchDir;

/// Run one age-based sweep of the scratch directory on the blocking pool
pub async fn sweep_once(scratch: ScratchDir, max_age: Duration) -> anyhow::Result<usize> {
    let removed = tokio::task::spawn_blocking(move || scratch.sweep_older_than(max_age)).await??;
    Ok(removed)
}

/// Periodically delete orphaned scratch files until `shutdown` flips to true.
///
/// The first sweep happens one interval after spawning; startup runs its own sweep.
pub fn spawn_storage_sweeper(
    scratch: ScratchDir,
    every: Duration,
    max_age: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    match sweep_once(scratch.clone(), max_age).await {
                        Ok(0) => debug!("Storage sweep: nothing to remove"),
                        Ok(n) => info!("🧹 Storage sweep removed {} orphaned file(s)", n),
                        Err(e) => warn!("Storage sweep failed: {:#}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Storage sweeper stopped");
    })
}

/// Periodically forget identities with no requests left in the window
pub fn spawn_limiter_pruner<C: Clock + 'static>(
    limiter: Arc<AdmissionLimiter<C>>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    let dropped = limiter.prune();
                    if dropped > 0 {
                        debug!(
                            "Limiter prune dropped {} idle identit(ies), {} still tracked",
                            dropped,
                            limiter.tracked_identities()
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Limiter pruner stopped");
    })
}
