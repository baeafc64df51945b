//! Periodic worker threads with cooperative shutdown.
//!
//! Each worker wakes every `resolution`, runs its job, and exits as soon as
//! its shutdown channel is signalled or dropped. Jobs decide for themselves
//! whether their interval has elapsed, so interval changes from a config
//! reload apply on the next wake-up.

use log::{error, info};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Wake-up granularity of store workers.
pub const WORKER_RESOLUTION: Duration = Duration::from_millis(250);

struct Worker {
    name: String,
    shutdown_tx: Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct BackgroundWorkers {
    workers: Vec<Worker>,
}

impl BackgroundWorkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Starts a named thread calling `job` every `resolution`.
    ///
    /// # Errors
    /// Returns the OS error when the thread cannot be spawned.
    pub fn spawn(
        &mut self,
        name: &str,
        resolution: Duration,
        mut job: impl FnMut() + Send + 'static,
    ) -> std::io::Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(format!("gamevault-{name}"))
            .spawn(move || {
                info!("event=worker_start module=background status=ok worker={thread_name}");
                loop {
                    match shutdown_rx.recv_timeout(resolution) {
                        Err(RecvTimeoutError::Timeout) => job(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("event=worker_stop module=background status=ok worker={thread_name}");
            })?;

        self.workers.push(Worker {
            name: name.to_string(),
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Signals every worker and waits for each to finish its current job.
    pub fn stop(self) {
        for worker in &self.workers {
            let _ = worker.shutdown_tx.send(());
        }
        for worker in self.workers {
            if worker.handle.join().is_err() {
                error!(
                    "event=worker_stop module=background status=error worker={} error_code=panicked",
                    worker.name
                );
            }
        }
    }
}

/// Tracks when a periodic job last ran.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    last_run: Instant,
}

impl Cadence {
    /// First run becomes due one full interval after `start`.
    pub fn starting_at(start: Instant) -> Self {
        Self { last_run: start }
    }

    /// `true` (and restarts the period) when `interval` has elapsed by `now`.
    pub fn due(&mut self, now: Instant, interval: Duration) -> bool {
        if now.saturating_duration_since(self.last_run) >= interval {
            self.last_run = now;
            true
        } else {
            false
        }
    }
}
