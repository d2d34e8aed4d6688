//! Operator-initiated shutdown.
//!
//! SIGINT and SIGTERM only raise a flag. The session polls it between
//! messages and winds down on its normal path, committing the dedup store
//! and sending `QUIT`. The handlers reset themselves on first delivery, so
//! a second signal (eg, while blocked on a dead server) terminates the
//! process outright.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::libc::c_int;
use nix::sys::signal::{
    sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal,
};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_: c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

pub fn install_handlers() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESETHAND,
        SigSet::empty(),
    );
    for &signal in &[Signal::SIGINT, Signal::SIGTERM] {
        // Safe: the handler only stores to an atomic.
        unsafe { sigaction(signal, &action) }?;
    }
    Ok(())
}

/// A handle on a shutdown flag.
#[derive(Clone, Copy)]
pub struct ShutdownSignal {
    flag: &'static AtomicBool,
}

impl ShutdownSignal {
    /// The flag raised by the process signal handlers.
    pub fn process() -> Self {
        ShutdownSignal {
            flag: &SHUTDOWN_REQUESTED,
        }
    }

    #[cfg(test)]
    pub fn from_flag(flag: &'static AtomicBool) -> Self {
        ShutdownSignal { flag }
    }

    #[cfg(test)]
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_is_visible_through_copies() {
        static FLAG: AtomicBool = AtomicBool::new(false);
        let signal = ShutdownSignal::from_flag(&FLAG);
        let copy = signal;
        assert!(!copy.requested());
        signal.request();
        assert!(copy.requested());
    }

    #[test]
    fn sigterm_raises_process_flag() {
        install_handlers().unwrap();
        nix::sys::signal::raise(Signal::SIGTERM).unwrap();
        assert!(ShutdownSignal::process().requested());
    }
}
