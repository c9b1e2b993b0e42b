//! Background sweep loop
//!
//! Completes expired SCHEDULED bookings and removes orphaned empty calls on
//! a fixed interval until shutdown is signalled.

use std::time::Duration;

use consult_core::LifecycleEngine;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub struct SweepScheduler {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweepScheduler {
    /// Spawn the loop. The first sweep runs immediately.
    pub fn start(engine: LifecycleEngine, period: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(sweep_loop(engine, period, shutdown_rx));
        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signal the loop and wait for the in-flight sweep to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!("Sweep task ended abnormally: {}", e);
        }
    }
}

async fn sweep_loop(engine: LifecycleEngine, period: Duration, mut shutdown: watch::Receiver<bool>) {
    info!("🔄 Starting booking sweep every {:?}", period);

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match engine.sweep_expired(engine.now()).await {
                    Ok(report) if report.completed.is_empty()
                        && report.skipped.is_empty()
                        && report.orphaned_calls_removed == 0 => {
                        debug!("Sweep found nothing to do");
                    }
                    Ok(report) => {
                        info!(
                            "🧹 Sweep completed {} booking(s), skipped {}, removed {} orphaned call(s)",
                            report.completed.len(),
                            report.skipped.len(),
                            report.orphaned_calls_removed
                        );
                    }
                    Err(e) => error!("❌ Sweep failed: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("🛑 Booking sweep stopped");
}
