//! Async-signal intake.
//!
//! `SIGUSR1` is the sole signal the core installs a handler for. The
//! handler itself only sets an atomic flag — everything else happens
//! on the main thread at the top of the next loop iteration.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::SupervisorError;

static SNOOZE_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_snooze_signal(_sig: libc::c_int) {
    request();
}

/// Sets the snooze flag directly. Used both by the signal handler and
/// by the `snooze` `SET_CMD` body, which asks for the same effect
/// without going through a real signal.
pub fn request() {
    SNOOZE_REQUESTED.store(true, Ordering::SeqCst);
}

/// Installs the `SIGUSR1` handler. Call once at start-up.
pub fn install() -> Result<(), SupervisorError> {
    let action = SigAction::new(
        SigHandler::Handler(on_snooze_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe { signal::sigaction(Signal::SIGUSR1, &action) }?;
    Ok(())
}

/// Reads and clears the snooze flag. Called once per loop iteration.
pub fn take_and_clear() -> bool {
    SNOOZE_REQUESTED.swap(false, Ordering::SeqCst)
}
