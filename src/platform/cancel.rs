use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Cooperative cancellation shared between the orchestrator and the readers.
/// An interruptible token also fires once SIGINT has been received.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    observe_interrupt: bool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interruptible() -> Self {
        Self {
            flag: Arc::default(),
            observe_interrupt: true,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || (self.observe_interrupt && interrupted())
    }
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

#[cfg(unix)]
extern "C" fn on_interrupt(_signum: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
    // A second Ctrl-C terminates immediately.
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_DFL);
    }
}

/// Latch SIGINT so an in-flight scan can wind down and report the abort.
#[cfg(unix)]
pub fn install_interrupt_handler() {
    unsafe {
        libc::signal(
            libc::SIGINT,
            on_interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }
}

#[cfg(not(unix))]
pub fn install_interrupt_handler() {}
