use std::sync::mpsc;
use std::sync::Arc;

use log::info;
use tokio::sync::broadcast;

use presstrack::db::{self, Database};
use presstrack::error::PresstrackError;
use presstrack::reconcile::{Reconciler, SweepScheduler, DEFAULT_SWEEP_INTERVAL};

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    info!("Starting presstrack v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> presstrack::Result<()> {
    let path = db::default_database_path().ok_or(PresstrackError::NoHomeDirectory)?;
    let database = Database::open(&path)?;

    let reconciler = Arc::new(Reconciler::new(database));
    let scheduler = SweepScheduler::new(Arc::clone(&reconciler), DEFAULT_SWEEP_INTERVAL);
    let (trigger_tx, trigger_rx) = broadcast::channel(16);
    let handle = scheduler.start(trigger_rx);

    let (stop_tx, stop_rx) = mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    }) {
        log::error!("Failed to install Ctrl-C handler: {}", e);
        std::process::exit(1);
    }

    let _ = stop_rx.recv();
    info!("Shutting down");
    scheduler.stop();
    // Wake the select loop so it sees the shutdown flag.
    let _ = trigger_tx.send(());
    if handle.join().is_err() {
        log::error!("Scheduler thread panicked during shutdown");
    }
    Ok(())
}
