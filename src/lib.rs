//! Port-program supervisor for a managed VM runtime.
//!
//! The VM spawns this process and connects it over a pair of pipes on
//! fds 0 and 1. The supervisor enforces a heartbeat contract on the VM
//! (see [`proto`]) and drives the kernel hardware watchdog so that a
//! hang on either side of the pipe eventually reboots the board. See
//! [`supervise::run`] for the loop itself and [`terminate::terminate`]
//! for what happens once it returns.

pub mod args;
pub mod clock;
pub mod codec;
pub mod env;
pub mod error;
pub mod ioctl;
pub mod logging;
pub mod os;
pub mod proto;
pub mod report;
pub mod signal;
pub mod state;
pub mod supervise;
pub mod terminate;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;
