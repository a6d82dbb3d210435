//! Supervisor state.
//!
//! Every mutable field the loop touches lives in one owned value
//! passed by exclusive reference, rather than as module statics the
//! way the original port program holds them.

use crate::args::CliArgs;
use crate::env::EnvConfig;

const DEFAULT_HEARTBEAT_TIMEOUT: u64 = 60;
pub const SNOOZE_SECONDS: u64 = 900;

#[derive(Debug, Clone)]
pub struct SupervisorState {
    pub heartbeat_timeout: u64,
    pub last_heart_beat_time: u64,
    pub last_wdt_pet_time: u64,
    pub init_handshake_timeout: u64,
    pub init_handshake_happened: bool,
    pub init_handshake_end_time: u64,
    pub init_grace_time: u64,
    pub init_grace_end_time: u64,
    pub snooze_end_time: u64,
    pub kill_pid: u32,
}

impl SupervisorState {
    /// Builds the state the loop starts with: grace/handshake deadlines
    /// are computed from `now`, and the heartbeat deadline is deferred
    /// to the end of the grace window.
    pub fn at_start(now: u64, cli: &CliArgs, env: &EnvConfig) -> Self {
        let heartbeat_timeout = cli
            .heartbeat_timeout
            .map(u64::from)
            .unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT);

        let init_grace_time = u64::from(env.init_grace_time);
        let init_grace_end_time = now + init_grace_time;

        let init_handshake_timeout = u64::from(env.init_handshake_timeout);
        let init_handshake_end_time = now + init_handshake_timeout;
        let init_handshake_happened = init_handshake_timeout == 0;

        Self {
            heartbeat_timeout,
            last_heart_beat_time: init_grace_end_time,
            last_wdt_pet_time: now,
            init_handshake_timeout,
            init_handshake_happened,
            init_handshake_end_time,
            init_grace_time,
            init_grace_end_time,
            snooze_end_time: now,
            kill_pid: cli.kill_pid.unwrap_or(0),
        }
    }

    pub fn heartbeat_deadline(&self) -> u64 {
        self.last_heart_beat_time + self.heartbeat_timeout
    }

    pub fn handshake_outstanding(&self) -> bool {
        self.init_handshake_timeout != 0 && !self.init_handshake_happened
    }

    pub fn in_grace_or_snooze(&self, now: u64) -> bool {
        now < self.snooze_end_time || now < self.init_grace_end_time
    }

    /// HEART_BEAT effect: pet is the caller's job, this only advances
    /// the deadline, and only forward — a future value left by a
    /// snooze or the initial grace period must not be rewound.
    pub fn record_heart_beat(&mut self, now: u64) {
        if self.last_heart_beat_time < now {
            self.last_heart_beat_time = now;
        }
    }

    /// Applies a consumed snooze request: marks the handshake as done
    /// (a snoozing VM is, by definition, up) and pushes both the
    /// heartbeat deadline and the snooze window 15 minutes out.
    pub fn apply_snooze(&mut self, now: u64) {
        self.init_handshake_happened = true;
        self.last_heart_beat_time = now + SNOOZE_SECONDS;
        self.snooze_end_time = now + SNOOZE_SECONDS;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(grace: u32, handshake: u32) -> EnvConfig {
        EnvConfig {
            watchdog_path: None,
            watchdog_timeout_override: None,
            kernel_timeout_request: None,
            init_handshake_timeout: handshake,
            init_grace_time: grace,
            kill_signal: crate::os::KillSignal::Kill,
            no_kill: false,
            verbose: 0,
            crash_dump_seconds: None,
        }
    }

    #[test]
    fn grace_window_defers_the_heartbeat_deadline() {
        let cli = CliArgs::default();
        let st = SupervisorState::at_start(100, &cli, &env(30, 0));
        assert_eq!(st.init_grace_end_time, 130);
        assert_eq!(st.last_heart_beat_time, 130);
    }

    #[test]
    fn zero_handshake_timeout_means_already_happened() {
        let cli = CliArgs::default();
        let st = SupervisorState::at_start(0, &cli, &env(0, 0));
        assert!(st.init_handshake_happened);
        assert!(!st.handshake_outstanding());
    }

    #[test]
    fn nonzero_handshake_timeout_is_outstanding_until_cleared() {
        let cli = CliArgs::default();
        let st = SupervisorState::at_start(0, &cli, &env(0, 45));
        assert!(!st.init_handshake_happened);
        assert!(st.handshake_outstanding());
        assert_eq!(st.init_handshake_end_time, 45);
    }

    #[test]
    fn heart_beat_never_rewinds_a_future_deadline() {
        let cli = CliArgs::default();
        let mut st = SupervisorState::at_start(0, &cli, &env(100, 0));
        assert_eq!(st.last_heart_beat_time, 100);
        st.record_heart_beat(40);
        assert_eq!(st.last_heart_beat_time, 100, "40 < 100, must not rewind");
        st.record_heart_beat(150);
        assert_eq!(st.last_heart_beat_time, 150);
    }

    #[test]
    fn snooze_pushes_both_deadlines_15_minutes_out() {
        let cli = CliArgs::default();
        let mut st = SupervisorState::at_start(0, &cli, &env(0, 0));
        st.apply_snooze(1000);
        assert_eq!(st.last_heart_beat_time, 1900);
        assert_eq!(st.snooze_end_time, 1900);
        assert!(st.init_handshake_happened);
    }
}
