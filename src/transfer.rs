/*!
The `transfer` module holds the shared state that a worker thread and its
controller use to coordinate one in-flight transfer: the cancellation flag and
coarse status of a single SysEx exchange, and the progress bookkeeping of a
multi-round job.
!*/

use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Where a SysEx exchange currently is.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TransferStatus {
    /// No byte of the reply has arrived yet.
    Waiting,
    Sending,
    Receiving,
    /// Terminal. Every transfer ends here exactly once, error or not.
    Finished,
}

impl Default for TransferStatus {
    fn default() -> Self {
        TransferStatus::Waiting
    }
}

/// The state shared between the thread driving a transfer and the thread that
/// may cancel it. The cancellation flag is a single atomic so the receive
/// loop can observe it at every poll tick; the mutex guards only `status`.
#[derive(Debug, Default)]
pub struct TransferControl {
    active: AtomicBool,
    status: Mutex<TransferStatus>,
}

impl TransferControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(true),
            status: Mutex::new(TransferStatus::Waiting),
        })
    }

    /// Requests cancellation. The next poll tick of the driving thread
    /// observes this and winds the transfer down.
    pub fn cancel(&self) {
        debug!("cancelling transfer");
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> TransferStatus {
        *lock(&self.status)
    }

    pub(crate) fn set_status(&self, status: TransferStatus) {
        *lock(&self.status) = status;
    }

    /// Marks the terminal state: not active, status `Finished`.
    pub(crate) fn finish(&self) {
        self.active.store(false, Ordering::SeqCst);
        *lock(&self.status) = TransferStatus::Finished;
    }
}

/// One SysEx exchange: the shared control plus the receive budget.
///
/// `timeout` of `None` waits forever. In `batch` mode reception accepts any
/// number of concatenated SysEx messages and ends at the first silent
/// timeout window instead of at the first `0xF7`.
pub struct SysexTransfer {
    control: Arc<TransferControl>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) batch: bool,
}

impl SysexTransfer {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            control: TransferControl::new(),
            timeout,
            batch: false,
        }
    }

    pub fn batch(timeout: Option<Duration>) -> Self {
        Self {
            control: TransferControl::new(),
            timeout,
            batch: true,
        }
    }

    /// Attaches an existing control, so another thread can cancel this
    /// transfer.
    pub fn with_control(control: Arc<TransferControl>, timeout: Option<Duration>) -> Self {
        Self {
            control,
            timeout,
            batch: false,
        }
    }

    pub fn control(&self) -> Arc<TransferControl> {
        Arc::clone(&self.control)
    }

    pub fn is_active(&self) -> bool {
        self.control.is_active()
    }

    pub fn status(&self) -> TransferStatus {
        self.control.status()
    }

    pub(crate) fn set_status(&self, status: TransferStatus) {
        self.control.set_status(status)
    }

    pub(crate) fn finish(&self) {
        self.control.finish()
    }
}

struct JobState {
    callback: Option<Box<dyn Fn(f64) + Send + Sync>>,
    parts: u32,
    part: u32,
}

/// Cross-thread control of a multi-round transfer job: cooperative
/// cancellation and progress reporting at block boundaries.
pub struct JobControl {
    active: AtomicBool,
    state: Mutex<JobState>,
}

impl Default for JobControl {
    fn default() -> Self {
        Self::new()
    }
}

impl JobControl {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            state: Mutex::new(JobState {
                callback: None,
                parts: 1,
                part: 0,
            }),
        }
    }

    pub fn cancel(&self) {
        debug!("cancelling job");
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Installs the progress callback. It is invoked from the worker thread
    /// with a fraction in `[0, 1]`.
    pub fn on_progress<F>(&self, callback: F)
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        lock(&self.state).callback = Some(Box::new(callback));
    }

    /// Declares how many sequential parts the job has. Progress of each part
    /// maps into its share of the whole.
    pub fn set_parts(&self, parts: u32) {
        let mut state = lock(&self.state);
        state.parts = parts.max(1);
        state.part = 0;
    }

    pub fn next_part(&self) {
        let mut state = lock(&self.state);
        if state.part + 1 < state.parts {
            state.part += 1;
        }
    }

    /// Reports progress of the current part, as a fraction in `[0, 1]`.
    pub fn report(&self, fraction: f64) {
        let state = lock(&self.state);
        let clamped = fraction.max(0.0).min(1.0);
        let overall = (f64::from(state.part) + clamped) / f64::from(state.parts);
        if let Some(callback) = &state.callback {
            callback(overall);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
