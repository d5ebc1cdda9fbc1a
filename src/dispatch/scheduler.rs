// src/dispatch/scheduler.rs
use std::sync::{Arc, RwLock};
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{CycleReport, Dispatcher};

/// Last finished cycle, shared with the HTTP debug route.
pub type CycleStatus = Arc<RwLock<Option<CycleReport>>>;

/// Spawn the poll loop. A cycle is awaited inside the loop, so cycles never
/// overlap; a slow cycle delays the next tick instead of bursting.
pub fn spawn_poll_scheduler(
    mut dispatcher: Dispatcher,
    interval: Duration,
    status: CycleStatus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_tick(&mut dispatcher, &status).await;
        }
    })
}

/// One tick: run a cycle and publish its report. Failures are logged only.
pub async fn run_tick(dispatcher: &mut Dispatcher, status: &CycleStatus) {
    counter!("poll_cycles_total").increment(1);
    match dispatcher.run_cycle().await {
        Ok(report) => {
            tracing::info!(
                target: "dispatch",
                fetched = report.fetched,
                completed = report.completed,
                failed = report.failed,
                deferred = report.deferred,
                posts = report.posts_created,
                seen_marked = report.seen_marked,
                "poll cycle finished"
            );
            if let Ok(mut slot) = status.write() {
                *slot = Some(report);
            }
        }
        Err(e) => {
            counter!("poll_cycle_errors_total").increment(1);
            tracing::error!(target: "dispatch", error = %format!("{e:#}"), "poll cycle failed");
        }
    }
}
