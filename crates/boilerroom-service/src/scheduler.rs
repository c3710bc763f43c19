//! Periodic control loops.
//!
//! Every [`ControlTask`] runs in its own tokio task on its own interval.
//! A loop awaits its tick before waiting for the next one, so a slow tick
//! (a valve move can take minutes) delays that loop only; the interval is
//! set to [`MissedTickBehavior::Delay`] so missed ticks are not bunched up
//! afterwards. Cancellation is checked between ticks only: a tick that has
//! started always completes.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::plant::{ControlTask, Plant};

/// Failures logged individually before a loop goes quiet.
const LOUD_FAILURES: u32 = 3;

/// Runs the plant's control loops.
pub struct Scheduler {
    plant: Arc<Plant>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler stopped by `cancel`.
    pub fn new(plant: Arc<Plant>, cancel: CancellationToken) -> Self {
        Self { plant, cancel }
    }

    /// Spawn every control loop. Returns immediately; the handles finish
    /// once the token is cancelled and running ticks have completed.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let schedule = self.plant.config().schedule.clone();
        info!("Starting {} control loops", ControlTask::ALL.len());

        ControlTask::ALL
            .into_iter()
            .map(|task| {
                let plant = Arc::clone(&self.plant);
                let cancel = self.cancel.clone();
                let period = Duration::from_secs(task.period_secs(&schedule));
                tokio::spawn(run_task(plant, task, period, cancel))
            })
            .collect()
    }
}

/// Drive one control loop until cancelled.
async fn run_task(plant: Arc<Plant>, task: ControlTask, period: Duration, cancel: CancellationToken) {
    info!("Starting {} loop (every {}s)", task, period.as_secs());

    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = timer.tick() => {}
        }

        if plant.tick(task).await {
            if consecutive_failures > LOUD_FAILURES {
                info!("{} loop recovered after {} failed ticks", task, consecutive_failures);
            }
            consecutive_failures = 0;
            debug!("{} tick done", task);
        } else {
            consecutive_failures += 1;
            if consecutive_failures <= LOUD_FAILURES {
                warn!("{} tick failed (attempt {})", task, consecutive_failures);
            } else if consecutive_failures == LOUD_FAILURES + 1 {
                error!(
                    "{} tick failed {} times in a row, will keep trying silently",
                    task, consecutive_failures
                );
            }
        }
    }

    info!("{} loop stopped", task);
}
