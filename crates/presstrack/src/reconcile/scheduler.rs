//! Periodic sweep scheduler.
//!
//! Owns the repeating reconciliation task with explicit start/stop
//! lifecycle and supports manual trigger via broadcast channel, so the
//! ingestion path and the timer share one code path into the passes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::reconcile::{PassReport, Reconciler};

/// How often the sweep runs when nothing triggers it earlier.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Periodic sweep scheduler driving both reconciliation passes.
pub struct SweepScheduler {
    reconciler: Arc<Reconciler>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl SweepScheduler {
    /// Creates a new sweep scheduler.
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the sweep loop in a background thread.
    /// Accepts a trigger receiver for "process now" requests.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let reconciler = Arc::clone(&self.reconciler);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            rt.block_on(async {
                let mut interval_timer = tokio::time::interval(interval);
                interval_timer.tick().await; // skip immediate first tick

                // One sweep at startup to catch up on anything that
                // arrived while the process was down.
                run_sweep(&reconciler);

                loop {
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    tokio::select! {
                        _ = interval_timer.tick() => {},
                        Ok(()) = trigger_rx.recv() => {
                            log::info!("Manual reconciliation sweep triggered");
                        },
                    }

                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    run_sweep(&reconciler);
                }
            });
        })
    }

    /// Signals the scheduler to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

fn run_sweep(reconciler: &Reconciler) {
    match reconciler.process_machine_events() {
        Ok(report) => log_report("machine-event", &report),
        Err(e) => log::error!("Machine-event pass failed: {}", e),
    }
    match reconciler.process_scan_events() {
        Ok(report) => log_report("scan-event", &report),
        Err(e) => log::error!("Scan-event pass failed: {}", e),
    }
}

fn log_report(pass: &str, report: &PassReport) {
    for error in &report.errors {
        log::warn!("Sweep {} pass: {}", pass, error);
    }
    if report.skipped {
        log::debug!("Sweep {} pass skipped (already running)", pass);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_scheduler_shutdown() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = Arc::new(Reconciler::new(db));
        let scheduler = SweepScheduler::new(reconciler, Duration::from_millis(50));

        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx);

        // Let it run briefly then stop
        std::thread::sleep(Duration::from_millis(100));
        scheduler.stop();

        // Send a trigger to wake up the select loop so it sees the shutdown
        let _ = trigger_tx.send(());

        // Should join within a reasonable time
        handle.join().expect("scheduler thread panicked");
    }

    #[test]
    fn test_trigger_runs_a_sweep() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = Arc::new(Reconciler::new(db.clone()));
        // Long interval: only the trigger can cause the second sweep.
        let scheduler = SweepScheduler::new(reconciler, Duration::from_secs(3600));

        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx);

        let _ = trigger_tx.send(());
        std::thread::sleep(Duration::from_millis(200));

        // The startup sweep (and the triggered one) touched the markers.
        db.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM processing_markers", [], |r| r.get(0))?;
            assert_eq!(count, 2);
            Ok(())
        })
        .unwrap();

        scheduler.stop();
        let _ = trigger_tx.send(());
        handle.join().expect("scheduler thread panicked");
    }
}
