//! Driver for the periodic background jobs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use ratus_core::engine::Engine;

use super::metrics::Metrics;

/// Settings controlling the chore loop cadence.
#[derive(Debug, Clone, Copy)]
pub struct ChoreSettings {
    /// Tick interval. Zero disables the loop so the instance only handles
    /// requests.
    pub interval: Duration,
    /// Delay before the first tick.
    pub initial_delay: Duration,
    /// Scale the initial delay by a uniform random factor in [0, 1] to
    /// desynchronize fleets of instances started together.
    pub initial_random: bool,
}

/// Run the chore loop until the shutdown signal flips.
///
/// Chore failures are logged and never terminate the loop; a transiently
/// unavailable storage engine recovers on a later tick.
pub async fn run(
    engine: Arc<dyn Engine>,
    metrics: Arc<Metrics>,
    settings: ChoreSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    if settings.interval.is_zero() {
        return;
    }

    let mut delay = settings.initial_delay;
    if settings.initial_random && !delay.is_zero() {
        delay = delay.mul_f64(rand::thread_rng().gen::<f64>());
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.changed() => return,
    }

    info!("start running background jobs");
    let mut ticker = tokio::time::interval(settings.interval);
    // Drop ticks instead of bursting when a pass runs long.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let start = Instant::now();
                if let Err(e) = engine.chore().await {
                    warn!("background job failed: {e}");
                }
                metrics.observe_chore(start.elapsed().as_secs_f64());
            }
            _ = shutdown.changed() => {
                info!("stop running background jobs");
                return;
            }
        }
    }
}
