//! Environment-variable configuration.
//!
//! Everything here is read once at start-up; nothing in the
//! supervision loop consults `std::env` directly.

use std::env;

use crate::os::KillSignal;

/// Parsed `HEART_*`/`ERL_CRASH_DUMP_SECONDS` environment, plus the
/// clamped values derived from it that the rest of the crate consumes.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub watchdog_path: Option<String>,
    pub watchdog_timeout_override: Option<u32>,
    pub kernel_timeout_request: Option<u32>,
    pub init_handshake_timeout: u32,
    pub init_grace_time: u32,
    pub kill_signal: KillSignal,
    pub no_kill: bool,
    pub verbose: u8,
    pub crash_dump_seconds: Option<u32>,
}

const MAX_INIT_GRACE_TIME: u32 = 600;
const MIN_KERNEL_TIMEOUT: u32 = 2;
const MAX_KERNEL_TIMEOUT: u32 = 120;

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Testable constructor: `lookup` stands in for `std::env::var`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let watchdog_path = lookup("HEART_WATCHDOG_PATH");

        let watchdog_timeout_override = lookup("HEART_WATCHDOG_TIMEOUT").and_then(|v| v.parse().ok());

        let kernel_timeout_request = lookup("HEART_KERNEL_TIMEOUT")
            .and_then(|v| v.parse::<u32>().ok())
            .map(|v| v.clamp(MIN_KERNEL_TIMEOUT, MAX_KERNEL_TIMEOUT));

        let init_grace_time = lookup("HEART_INIT_GRACE_TIME")
            .and_then(|v| v.parse::<i64>().ok())
            .map(|v| v.clamp(0, MAX_INIT_GRACE_TIME as i64) as u32)
            .unwrap_or(0);

        let init_handshake_timeout = lookup("HEART_INIT_TIMEOUT")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        // init_handshake_timeout must be >= init_grace_time when both are nonzero.
        let init_handshake_timeout = if init_handshake_timeout != 0 && init_handshake_timeout < init_grace_time {
            init_grace_time
        } else {
            init_handshake_timeout
        };

        let kill_signal = if lookup("HEART_KILL_SIGNAL").as_deref() == Some("SIGABRT") {
            KillSignal::Abort
        } else {
            KillSignal::Kill
        };

        let no_kill = lookup("HEART_NO_KILL").as_deref() == Some("TRUE");

        let verbose = lookup("HEART_VERBOSE")
            .and_then(|v| v.parse::<u8>().ok())
            .unwrap_or(0);

        let crash_dump_seconds = lookup("ERL_CRASH_DUMP_SECONDS").and_then(|v| v.parse().ok());

        Self {
            watchdog_path,
            watchdog_timeout_override,
            kernel_timeout_request,
            init_handshake_timeout,
            init_grace_time,
            kill_signal,
            no_kill,
            verbose,
            crash_dump_seconds,
        }
    }
}
