//! Guaranteed cleanup on the way out.
//!
//! One hook, three triggers: the normal return of the run loop, a termination
//! signal, and a panic unwinding through [`ShutdownGuard`]. The cleanup body runs at
//! most once. A trigger that loses the race blocks until the winner's cleanup has
//! finished, so a signal arriving mid-cleanup can't exit the process early.

use log::{info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Cleanup = Box<dyn FnOnce(&str) + Send>;

pub struct ShutdownHook {
    fired: AtomicBool,
    cleanup: Mutex<Option<Cleanup>>,
}

impl ShutdownHook {
    pub fn new(cleanup: impl FnOnce(&str) + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            fired: AtomicBool::new(false),
            cleanup: Mutex::new(Some(Box::new(cleanup))),
        })
    }

    /// Run the cleanup if nobody has yet. Returns true for the call that ran it.
    pub fn trigger(&self, reason: &str) -> bool {
        // lock first so a losing trigger waits for the winner to finish
        let mut slot = self.cleanup.lock();
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        info!("Shutting down: {}", reason);
        match slot.take() {
            Some(cleanup) => {
                cleanup(reason);
                true
            }
            None => false,
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// SIGINT / SIGTERM run the cleanup and exit with status 0.
    pub fn install_signal_handler(self: &Arc<Self>) -> Result<(), ctrlc::Error> {
        let hook = Arc::clone(self);
        ctrlc::set_handler(move || {
            hook.trigger("termination signal");
            std::process::exit(0);
        })
    }

    /// Fires the hook when dropped, on normal return or while unwinding.
    pub fn guard(self: &Arc<Self>) -> ShutdownGuard {
        ShutdownGuard {
            hook: Arc::clone(self),
        }
    }
}

pub struct ShutdownGuard {
    hook: Arc<ShutdownHook>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!("Unhandled failure, running cleanup");
            self.hook.trigger("unhandled failure");
        } else {
            self.hook.trigger("normal exit");
        }
    }
}
