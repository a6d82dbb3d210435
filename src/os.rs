//! The OS capability seam.
//!
//! Every syscall the supervision loop and termination policy touch that
//! isn't already covered by [`crate::clock`], [`crate::codec`], or
//! [`crate::watchdog`] is named here as a small trait: [`Poller`] for the
//! stdin multiplex, [`Rebooter`] for the terminal reboot/poweroff call,
//! [`Killer`] for signalling the VM and PID 1, [`Sleeper`] for the
//! one-second waits in the kill-retry sequence, and [`Syncer`] for
//! `sync(2)`. Production code wires these to raw `libc` calls; tests
//! substitute the fakes in [`crate::testing`]. This is the same seam the
//! original C implementation achieved through `LD_PRELOAD` function
//! interposition, re-expressed as trait objects.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Result of one [`Poller::wait_readable`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    TimedOut,
}

/// Failure modes from the stdin multiplex. [`PollError::Interrupted`] is
/// distinguished because the loop's response to it is to restart the
/// iteration rather than to treat it as [`crate::error::Reason::Error`].
#[derive(Debug)]
pub enum PollError {
    Interrupted,
    Io(io::Error),
}

/// Seam for the blocking wait on stdin readability.
pub trait Poller {
    fn wait_readable(&mut self, timeout: Duration) -> Result<PollOutcome, PollError>;
}

/// Polls a single descriptor (normally stdin) with `poll(2)`.
pub struct RealPoller {
    fd: RawFd,
}

impl RealPoller {
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }

    pub fn stdin() -> Self {
        Self::new(libc::STDIN_FILENO)
    }
}

impl Poller for RealPoller {
    fn wait_readable(&mut self, timeout: Duration) -> Result<PollOutcome, PollError> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(i32::MAX as u128) as i32;
        let rc = unsafe { libc::poll(&mut pfd as *mut libc::pollfd, 1, millis) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Err(PollError::Interrupted);
            }
            return Err(PollError::Io(err));
        }
        if rc == 0 {
            Ok(PollOutcome::TimedOut)
        } else {
            Ok(PollOutcome::Ready)
        }
    }
}

/// The terminal action [`crate::terminate`] can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootCommand {
    Restart,
    PowerOff,
}

/// Seam for the hard `reboot(2)` call. In production this never
/// returns control to the caller in practice (the kernel tears the
/// process down); fakes simply record the call for assertions.
pub trait Rebooter {
    fn reboot(&self, cmd: RebootCommand);
}

pub struct RealRebooter;

impl Rebooter for RealRebooter {
    fn reboot(&self, cmd: RebootCommand) {
        let how = match cmd {
            RebootCommand::Restart => libc::RB_AUTOBOOT,
            RebootCommand::PowerOff => libc::RB_POWER_OFF,
        };
        unsafe {
            libc::reboot(how);
        }
    }
}

/// Signals the [`Killer`] seam can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    Term,
    Kill,
    Abort,
    Usr1,
    Usr2,
}

impl KillSignal {
    fn raw(self) -> libc::c_int {
        match self {
            KillSignal::Term => libc::SIGTERM,
            KillSignal::Kill => libc::SIGKILL,
            KillSignal::Abort => libc::SIGABRT,
            KillSignal::Usr1 => libc::SIGUSR1,
            KillSignal::Usr2 => libc::SIGUSR2,
        }
    }
}

/// Outcome of sending a signal to a pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The signal was delivered (or the pid exists and we have
    /// permission to signal it).
    Sent,
    /// The pid no longer exists (`ESRCH`).
    Gone,
}

/// Seam for `kill(2)`, used both to probe liveness (`sig == 0`) and to
/// actually deliver a terminating signal.
pub trait Killer {
    fn probe(&self, pid: u32) -> KillOutcome;
    fn send(&self, pid: u32, sig: KillSignal) -> KillOutcome;
}

pub struct RealKiller;

impl RealKiller {
    fn raw_kill(pid: u32, sig: libc::c_int) -> KillOutcome {
        let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
        if rc == 0 {
            KillOutcome::Sent
        } else if io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH) {
            KillOutcome::Gone
        } else {
            // Any other failure (e.g. EPERM) is not ours to resolve;
            // behave as if the signal was sent so the caller's retry
            // loop still terminates on its own schedule.
            KillOutcome::Sent
        }
    }
}

impl Killer for RealKiller {
    fn probe(&self, pid: u32) -> KillOutcome {
        Self::raw_kill(pid, 0)
    }

    fn send(&self, pid: u32, sig: KillSignal) -> KillOutcome {
        Self::raw_kill(pid, sig.raw())
    }
}

/// Seam for the one-second waits in the kill-retry sequence.
pub trait Sleeper {
    fn sleep_one_second(&self);
}

pub struct RealSleeper;

impl Sleeper for RealSleeper {
    fn sleep_one_second(&self) {
        std::thread::sleep(Duration::from_secs(1));
    }
}

/// Seam for `sync(2)`.
pub trait Syncer {
    fn sync(&self);
}

pub struct RealSyncer;

impl Syncer for RealSyncer {
    fn sync(&self) {
        unsafe {
            libc::sync();
        }
    }
}
