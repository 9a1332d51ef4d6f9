/*!
The `progress` module runs a transfer on a worker thread while the calling
thread owns the user-facing progress display. The worker signals through the
shared [`TransferControl`]; the caller polls status and pulses its display,
and may cancel at any time.

A display that opens and closes within a few milliseconds flickers, so a
response is never delivered before a minimum time has passed since the run
began.
!*/

use crate::transfer::{TransferControl, TransferStatus};
use log::debug;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// The minimum time between starting a run and delivering its response.
pub const MIN_TIME_UNTIL_RESPONSE: Duration = Duration::from_secs(1);

/// A transfer running on a worker thread.
pub struct ProgressRun<T> {
    control: Arc<TransferControl>,
    started: Instant,
    min_visible: Duration,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> ProgressRun<T> {
    /// Spawns `work` on a worker thread. The worker receives the shared
    /// control and must leave it in the `Finished` state.
    pub fn spawn<F>(name: &str, work: F) -> Self
    where
        F: FnOnce(Arc<TransferControl>) -> T + Send + 'static,
    {
        Self::spawn_with_min_visible(name, MIN_TIME_UNTIL_RESPONSE, work)
    }

    /// Like [`ProgressRun::spawn`] with an explicit minimum visible time.
    pub fn spawn_with_min_visible<F>(name: &str, min_visible: Duration, work: F) -> Self
    where
        F: FnOnce(Arc<TransferControl>) -> T + Send + 'static,
    {
        let control = TransferControl::new();
        let worker_control = Arc::clone(&control);
        debug!("starting worker '{}'", name);
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || work(worker_control))
            .expect("worker thread");
        Self {
            control,
            started: Instant::now(),
            min_visible,
            handle,
        }
    }

    pub fn control(&self) -> Arc<TransferControl> {
        Arc::clone(&self.control)
    }

    /// True while the worker has not reached the terminal state.
    pub fn is_active(&self) -> bool {
        self.control.is_active()
    }

    pub fn status(&self) -> TransferStatus {
        self.control.status()
    }

    /// Requests cancellation; the worker observes it at its next poll tick or
    /// block boundary.
    pub fn cancel(&self) {
        self.control.cancel()
    }

    /// Waits for the worker and returns its result, no earlier than the
    /// minimum visible time after the run started.
    pub fn finish(self) -> T {
        let result = match self.handle.join() {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        };
        let elapsed = self.started.elapsed();
        if elapsed < self.min_visible {
            thread::sleep(self.min_visible - elapsed);
        }
        result
    }
}
