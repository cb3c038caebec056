//! A background thread that logs a snapshot of every worker's current
//! assignment when the process receives `SIGUSR1` (spec.md §4.G).
//!
//! The scheduler itself only exposes [`crate::scheduler::Scheduler::progress_snapshot`];
//! this module is the one place that turns an OS signal into that
//! snapshot being logged, so the core stays free of signal-handling
//! concerns outside this single, opt-in reporter.

use crate::error::{Error, Result};
use crate::scheduler::Scheduler;
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct ProgressReporter {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    /// Registers a `SIGUSR1` handler and spawns a thread that logs
    /// `scheduler`'s progress snapshot each time the signal arrives.
    pub fn spawn(scheduler: Arc<Scheduler>) -> Result<Self> {
        let triggered = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGUSR1, Arc::clone(&triggered))
            .map_err(|e| Error::IoError {
                path: "SIGUSR1 handler".into(),
                source: e,
            })?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !stop_for_thread.load(Ordering::Relaxed) {
                if triggered.swap(false, Ordering::Relaxed) {
                    log_snapshot(&scheduler);
                }
                thread::sleep(POLL_INTERVAL);
            }
        });

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn log_snapshot(scheduler: &Scheduler) {
    for slot in scheduler.progress_snapshot() {
        match slot.current_uri {
            Some(uri) => info!(
                "worker {}: {} ({}/{} bytes)",
                slot.worker_id, uri, slot.bytes_done, slot.bytes_total
            ),
            None => info!("worker {}: idle", slot.worker_id),
        }
    }
}
