//! Info reporter.
//!
//! Serialises supervisor and watchdog state as `key=value` lines and
//! sends them back to the VM as a single `HEART_CMD` frame.

use std::fmt::Write as _;

use crate::codec::FrameIo;
use crate::proto;
use crate::state::SupervisorState;
use crate::watchdog::WatchdogIo;

pub const PROGRAM_NAME: &str = "heart";
pub const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");

fn time_left(deadline: u64, now: u64) -> u64 {
    deadline.saturating_sub(now)
}

/// Builds the `key=value\n`-per-line report body.
pub fn build_report(now: u64, state: &SupervisorState, watchdog: &dyn WatchdogIo) -> String {
    let wdt = watchdog.report();

    let init_handshake_time_left = if state.init_handshake_timeout == 0 {
        0
    } else {
        time_left(state.init_handshake_end_time, now)
    };

    let wdt_pet_time_left = time_left(
        state.last_wdt_pet_time + watchdog.wdt_pet_timeout(),
        now,
    );

    let mut body = String::new();
    macro_rules! line {
        ($($arg:tt)*) => {{
            let _ = writeln!(body, $($arg)*);
        }};
    }

    line!("program_name={}", PROGRAM_NAME);
    line!("program_version={}", PROGRAM_VERSION);
    line!("heartbeat_timeout={}", state.heartbeat_timeout);
    line!(
        "heartbeat_time_left={}",
        time_left(state.heartbeat_deadline(), now)
    );
    line!(
        "init_grace_time_left={}",
        time_left(state.init_grace_end_time, now)
    );
    line!("snooze_time_left={}", time_left(state.snooze_end_time, now));
    line!("wdt_pet_time_left={}", wdt_pet_time_left);
    line!("init_handshake_happened={}", state.init_handshake_happened);
    line!("init_handshake_timeout={}", state.init_handshake_timeout);
    line!("init_handshake_time_left={}", init_handshake_time_left);
    line!("wdt_identity={}", wdt.identity);
    line!("wdt_firmware_version={}", wdt.firmware_version);
    line!("wdt_options={}", wdt.options.join(","));
    line!("wdt_time_left={}", wdt.time_left.max(0));
    line!("wdt_pre_timeout={}", wdt.pre_timeout.max(0));
    line!("wdt_timeout={}", watchdog.wdt_timeout());
    line!(
        "wdt_last_boot={}",
        if wdt.last_boot_watchdog { "watchdog" } else { "power_on" }
    );

    body
}

/// Builds and sends the `HEART_CMD` reply for a `GET_CMD`.
pub fn send_report(
    io: &mut dyn FrameIo,
    now: u64,
    state: &SupervisorState,
    watchdog: &dyn WatchdogIo,
) -> std::io::Result<()> {
    let body = build_report(now, state, watchdog);
    io.write_frame(proto::HEART_CMD, body.as_bytes())
}
