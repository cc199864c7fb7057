//! Background loop draining the tracker replay queue.

use leadtrack_core::{
    config::JobsConfig, error::LeadResult, store::LeadStore, tracker_api::TrackerApi,
    tracker_jobs::TrackerWorker,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Run batches until `shutdown` is set, sleeping between idle polls.
///
/// The store must be a connection of its own; the HTTP side keeps another.
pub fn run_worker(
    store: &LeadStore,
    api: &dyn TrackerApi,
    jobs: &JobsConfig,
    shutdown: Arc<AtomicBool>,
) -> LeadResult<()> {
    let worker = TrackerWorker::new(store, api, jobs);
    let idle = Duration::from_millis(jobs.poll_interval_ms);
    log::info!("Tracker worker started");
    while !shutdown.load(Ordering::Relaxed) {
        match worker.run_pending() {
            Ok(report) if report.is_idle() => std::thread::sleep(idle),
            Ok(_) => {}
            Err(e) if e.is_persistence() => {
                log::error!(target: "tracker", "Tracker worker storage error: {e}");
                std::thread::sleep(idle);
            }
            Err(e) => return Err(e),
        }
    }
    log::info!("Tracker worker stopped");
    Ok(())
}
