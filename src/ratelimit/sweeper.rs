//! Background eviction of stale counter entries.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::store::CounterStore;

/// Settings for the eviction loop.
#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Tracked-key count above which each pass logs a warning
    pub max_tracked_keys_warning: usize,
}

/// Spawn a task that sweeps `store` every `config.interval`.
///
/// The task runs until aborted through the returned handle.
pub fn spawn(store: Arc<CounterStore>, config: SweeperConfig) -> JoinHandle<()> {
    info!(
        interval = ?config.interval,
        "Starting counter eviction sweeper"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            run_pass(&store, config.max_tracked_keys_warning);
        }
    })
}

/// One eviction pass. Returns the number of entries removed.
pub fn run_pass(store: &CounterStore, max_tracked_keys_warning: usize) -> usize {
    let evicted = store.sweep_now();
    let remaining = store.len();

    debug!(evicted, remaining, "Eviction sweep complete");

    if remaining > max_tracked_keys_warning {
        warn!(
            tracked_keys = remaining,
            threshold = max_tracked_keys_warning,
            "Counter store is tracking more keys than expected"
        );
    }

    evicted
}
