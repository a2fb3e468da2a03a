//! The four periodic actors.
//!
//! Each loop selects its work against a [`CancellationToken`]; cancelling
//! drops whatever sensor read or network call is in flight.

use super::engine::{ReconcileCause, TrackerEngine};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Eligibility re-check plus one sample, at the current cadence. An
/// applied foreground/background change cuts the sleep short.
pub(crate) async fn run_sampling(engine: Arc<TrackerEngine>, cancel: CancellationToken) {
    info!("sampling actor started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = async {
                if let Err(e) = engine.reconcile(ReconcileCause::Tick).await {
                    debug!("eligibility re-check: {e}");
                }
                engine.sampling_tick().await
            } => {
                debug!(?outcome, "sampling tick");
            }
        }

        let interval = engine.sampling_interval().await;
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
            _ = engine.cadence_changed() => debug!("cadence changed, sampling early"),
        }
    }
    info!("sampling actor stopped");
}

pub(crate) async fn run_policy_refresh(engine: Arc<TrackerEngine>, cancel: CancellationToken) {
    let period = engine.config().policy.refresh_interval();
    info!(period_secs = period.as_secs(), "policy refresh actor started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = engine.policy_refresh_tick() => {
                if let Err(e) = result {
                    warn!("re-check after policy refresh: {e}");
                }
            }
        }
    }
    info!("policy refresh actor stopped");
}

/// Drains on its own timer, and early when a submit queues a sample.
pub(crate) async fn run_drain(engine: Arc<TrackerEngine>, cancel: CancellationToken) {
    let period = engine.config().sync.drain_interval();
    info!(period_secs = period.as_secs(), "drain actor started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
            _ = engine.pipeline().drain_requested() => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            report = engine.drain_tick() => {
                if report.remaining > 0 {
                    debug!(?report, "drain run finished with backlog");
                }
            }
        }
    }
    info!("drain actor stopped");
}

pub(crate) async fn run_watchdog(engine: Arc<TrackerEngine>, cancel: CancellationToken) {
    let period = engine.config().recovery.watchdog_interval();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period_secs = period.as_secs(), "watchdog actor started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            () = engine.watchdog_tick() => {}
        }
    }
    info!("watchdog actor stopped");
}
