//! Error types shared across the supervisor core.

use std::fmt;
use std::io;

use thiserror::Error;

/// Failure modes the core can surface. Every fallible public entry point
/// returns one of these instead of panicking; the only abort path in the
/// whole crate is [`crate::clock::MonotonicClock`] losing access to
/// `CLOCK_MONOTONIC`, which is unrecoverable and is handled by exiting
/// the process directly rather than by returning an error the loop
/// would have to reason about.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("i/o error on the framed stdio channel: {0}")]
    Io(#[from] io::Error),

    #[error("failed to install the snooze signal handler: {0}")]
    Signal(#[from] nix::Error),

    #[error("poll on stdin was interrupted by a signal")]
    Interrupted,
}

/// Reason the [`crate::supervise::run`] loop returned control to
/// `main`. Exactly one of these is produced per process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// No heartbeat (or init handshake) arrived before its deadline.
    Timeout,
    /// The VM closed its end of the pipe (EOF on stdin).
    Closed,
    /// The stdin multiplex or a frame read/write failed unrecoverably.
    Error,
    /// The VM asked for a graceful shutdown.
    ShutDown,
    /// The VM announced it is about to write a crash dump.
    Crashing,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reason::Timeout => "timeout",
            Reason::Closed => "closed",
            Reason::Error => "error",
            Reason::ShutDown => "shut_down",
            Reason::Crashing => "crashing",
        };
        f.write_str(s)
    }
}
