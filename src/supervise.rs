//! The supervision loop.
//!
//! Single-threaded and cooperative: one blocking wait on stdin
//! readiness per iteration, a handful of wall-clock deadline checks,
//! and a dispatch table keyed on the incoming opcode. Every deadline
//! check happens before the frame read on the same iteration, so a
//! frame that arrives after its deadline never rescues the
//! supervisor.

use std::time::Duration;

use crate::codec::{FrameIo, ReadOutcome};
use crate::clock::Clock;
use crate::env::EnvConfig;
use crate::error::Reason;
use crate::os::{KillSignal, Killer, PollError, PollOutcome, Poller, RebootCommand, Rebooter, Syncer};
use crate::proto::{self, set_cmd};
use crate::state::SupervisorState;
use crate::watchdog::WatchdogIo;

/// PID the guarded-* commands signal: always init, never the VM the
/// termination policy's `kill_pid` names.
const INIT_PID: u32 = 1;

/// Everything the loop needs to reach the outside world, bundled so
/// [`run`] doesn't take nine positional parameters.
pub struct Capabilities<'a> {
    pub clock: &'a dyn Clock,
    pub poller: &'a mut dyn Poller,
    pub frame_io: &'a mut dyn FrameIo,
    pub watchdog: &'a mut dyn WatchdogIo,
    pub killer: &'a dyn Killer,
    pub syncer: &'a dyn Syncer,
    pub rebooter: &'a dyn Rebooter,
}

/// Runs the supervision loop to completion and returns why it exited.
///
/// Entry performs the one-time setup: an unconditional pet and the
/// single start-up `ACK`.
pub fn run(state: &mut SupervisorState, env: &EnvConfig, caps: &mut Capabilities) -> Reason {
    pet_and_record(state, caps.watchdog, caps.clock.now());
    let _ = caps.frame_io.write_frame(proto::ACK, &[]);

    loop {
        // 1. Consume snooze.
        if crate::signal::take_and_clear() {
            let now = caps.clock.now();
            pet_and_record(state, caps.watchdog, now);
            state.apply_snooze(now);
        }

        // 2. Compute the wait.
        let now = caps.clock.now();
        let wait = compute_wait(state, caps.watchdog, now);

        // 3. Wait.
        let outcome = match caps.poller.wait_readable(Duration::from_secs(wait)) {
            Ok(o) => o,
            Err(PollError::Interrupted) => continue,
            Err(PollError::Io(_)) => return Reason::Error,
        };

        // 4. Refresh now.
        let now = caps.clock.now();

        // 5. Enforce heartbeat deadline.
        if now >= state.heartbeat_deadline() {
            return Reason::Timeout;
        }

        // 6. Enforce handshake deadline.
        if state.handshake_outstanding() && now >= state.init_handshake_end_time {
            return Reason::Timeout;
        }

        // 7. Idle path.
        if outcome == PollOutcome::TimedOut {
            pet_and_record(state, caps.watchdog, now);
            continue;
        }

        // 8. Grace path.
        if state.in_grace_or_snooze(now) {
            pet_and_record(state, caps.watchdog, now);
        }

        // 9. Read one frame and dispatch.
        let frame = match caps.frame_io.read_frame() {
            Ok(ReadOutcome::Eof) => return Reason::Closed,
            Ok(frame) => frame,
            Err(_) => return Reason::Error,
        };

        if frame.is_junk() {
            continue;
        }
        let Some((op, body)) = frame.opcode_and_body() else {
            continue;
        };

        if let Some(reason) = dispatch(op, body, now, state, env, caps) {
            return reason;
        }
    }
}

fn compute_wait(state: &SupervisorState, watchdog: &dyn WatchdogIo, now: u64) -> u64 {
    let heartbeat_left = state.heartbeat_deadline().saturating_sub(now);
    let wdt_pet_deadline = state.last_wdt_pet_time + watchdog.wdt_pet_timeout();
    let pet_left = wdt_pet_deadline.saturating_sub(now);

    let mut wait = heartbeat_left.min(pet_left);
    if state.handshake_outstanding() {
        wait = wait.min(state.init_handshake_end_time.saturating_sub(now));
    }
    wait.max(1)
}

fn pet_and_record(state: &mut SupervisorState, watchdog: &mut dyn WatchdogIo, now: u64) {
    if watchdog.pet() {
        state.last_wdt_pet_time = now;
    }
}

fn ack(frame_io: &mut dyn FrameIo) {
    let _ = frame_io.write_frame(proto::ACK, &[]);
}

fn dispatch(
    op: u8,
    body: &[u8],
    now: u64,
    state: &mut SupervisorState,
    env: &EnvConfig,
    caps: &mut Capabilities,
) -> Option<Reason> {
    match op {
        proto::HEART_BEAT => {
            pet_and_record(state, caps.watchdog, now);
            state.record_heart_beat(now);
            None
        }
        proto::SHUT_DOWN => Some(Reason::ShutDown),
        proto::SET_CMD => dispatch_set_cmd(body, now, state, env, caps),
        proto::CLEAR_CMD => {
            ack(caps.frame_io);
            None
        }
        proto::GET_CMD => {
            let _ = crate::report::send_report(caps.frame_io, now, state, caps.watchdog);
            None
        }
        proto::PREPARING_CRASH => Some(Reason::Crashing),
        _ => None,
    }
}

/// A `SET_CMD` body matches a command only if its length is exactly
/// the command text plus the sender's conventional trailing NUL —
/// not merely a prefix with any amount of trailing NULs stripped off.
fn is_cmd(body: &[u8], cmd: &str) -> bool {
    body.len() == cmd.len() + 1 && body.starts_with(cmd.as_bytes())
}

fn dispatch_set_cmd(
    body: &[u8],
    now: u64,
    state: &mut SupervisorState,
    _env: &EnvConfig,
    caps: &mut Capabilities,
) -> Option<Reason> {
    if is_cmd(body, set_cmd::DISABLE) || is_cmd(body, set_cmd::DISABLE_HW) {
        caps.watchdog.detach();
        ack(caps.frame_io);
        None
    } else if is_cmd(body, set_cmd::DISABLE_VM) {
        ack(caps.frame_io);
        Some(Reason::Timeout)
    } else if is_cmd(body, set_cmd::GUARDED_REBOOT) {
        pet_and_record(state, caps.watchdog, now);
        caps.watchdog.detach();
        caps.killer.send(INIT_PID, KillSignal::Term);
        caps.syncer.sync();
        ack(caps.frame_io);
        None
    } else if is_cmd(body, set_cmd::GUARDED_IMMEDIATE_REBOOT) {
        caps.watchdog.detach();
        caps.rebooter.reboot(RebootCommand::Restart);
        None
    } else if is_cmd(body, set_cmd::GUARDED_POWEROFF) {
        pet_and_record(state, caps.watchdog, now);
        caps.watchdog.detach();
        caps.killer.send(INIT_PID, KillSignal::Usr2);
        caps.syncer.sync();
        ack(caps.frame_io);
        None
    } else if is_cmd(body, set_cmd::GUARDED_IMMEDIATE_POWEROFF) {
        caps.watchdog.detach();
        caps.rebooter.reboot(RebootCommand::PowerOff);
        None
    } else if is_cmd(body, set_cmd::GUARDED_HALT) {
        pet_and_record(state, caps.watchdog, now);
        caps.watchdog.detach();
        caps.killer.send(INIT_PID, KillSignal::Usr1);
        caps.syncer.sync();
        ack(caps.frame_io);
        None
    } else if is_cmd(body, set_cmd::INIT_HANDSHAKE) {
        state.init_handshake_happened = true;
        ack(caps.frame_io);
        None
    } else if is_cmd(body, set_cmd::SNOOZE) {
        crate::signal::request();
        ack(caps.frame_io);
        None
    } else {
        ack(caps.frame_io);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::CliArgs;
    use crate::testing::{FakeClock, FakeKiller, FakeRebooter, FakeSleeper, FakeSyncer, FakeWatchdog, MemFrameIo, ScriptedPoller};

    fn env() -> EnvConfig {
        EnvConfig {
            watchdog_path: None,
            watchdog_timeout_override: None,
            kernel_timeout_request: None,
            init_handshake_timeout: 0,
            init_grace_time: 0,
            kill_signal: KillSignal::Kill,
            no_kill: false,
            verbose: 0,
            crash_dump_seconds: None,
        }
    }

    struct Harness {
        clock: FakeClock,
        poller: ScriptedPoller,
        frame_io: MemFrameIo,
        watchdog: FakeWatchdog,
        killer: FakeKiller,
        syncer: FakeSyncer,
        rebooter: FakeRebooter,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                clock: FakeClock::new(0),
                poller: ScriptedPoller::new(),
                frame_io: MemFrameIo::new(),
                watchdog: FakeWatchdog::new(),
                killer: FakeKiller::new(0),
                syncer: FakeSyncer::default(),
                rebooter: FakeRebooter::default(),
            }
        }

        fn run(&mut self, state: &mut SupervisorState, env: &EnvConfig) -> Reason {
            let mut caps = Capabilities {
                clock: &self.clock,
                poller: &mut self.poller,
                frame_io: &mut self.frame_io,
                watchdog: &mut self.watchdog,
                killer: &self.killer,
                syncer: &self.syncer,
                rebooter: &self.rebooter,
            };
            run(state, env, &mut caps)
        }
    }

    #[test]
    fn shut_down_frame_ends_the_loop_after_one_ack() {
        let cli = CliArgs::default();
        let env = env();
        let mut state = SupervisorState::at_start(0, &cli, &env);
        let mut h = Harness::new();
        h.frame_io.push_frame(proto::SHUT_DOWN, &[]);
        h.poller = ScriptedPoller::new().push_ready();

        let reason = h.run(&mut state, &env);

        assert_eq!(reason, Reason::ShutDown);
        let acks = h.frame_io.written_frames().iter().filter(|(op, _)| *op == proto::ACK).count();
        assert_eq!(acks, 1, "only the start-up ACK, none for SHUT_DOWN");
    }

    #[test]
    fn heart_beat_pets_and_does_not_ack() {
        let cli = CliArgs::default();
        let env = env();
        let mut state = SupervisorState::at_start(0, &cli, &env);
        let mut h = Harness::new();
        h.frame_io.push_frame(proto::HEART_BEAT, &[]);
        h.frame_io.push_frame(proto::SHUT_DOWN, &[]);
        h.poller = ScriptedPoller::new().push_ready().push_ready();

        let reason = h.run(&mut state, &env);

        assert_eq!(reason, Reason::ShutDown);
        // One pet at entry, one for the HEART_BEAT.
        assert_eq!(h.watchdog.pet_count.get(), 2);
        let acks = h.frame_io.written_frames().iter().filter(|(op, _)| *op == proto::ACK).count();
        assert_eq!(acks, 1);
    }

    #[test]
    fn set_cmd_gets_exactly_one_ack() {
        let cli = CliArgs::default();
        let env = env();
        let mut state = SupervisorState::at_start(0, &cli, &env);
        let mut h = Harness::new();
        h.frame_io.push_frame(proto::SET_CMD, b"init_handshake\0");
        h.frame_io.push_frame(proto::SHUT_DOWN, &[]);
        h.poller = ScriptedPoller::new().push_ready().push_ready();

        let reason = h.run(&mut state, &env);
        assert_eq!(reason, Reason::ShutDown);
        let acks = h.frame_io.written_frames().iter().filter(|(op, _)| *op == proto::ACK).count();
        assert_eq!(acks, 2, "one start-up ACK, one for the SET_CMD");
    }

    #[test]
    fn disable_hw_detaches_but_keeps_the_loop_running() {
        let cli = CliArgs::default();
        let env = env();
        let mut state = SupervisorState::at_start(0, &cli, &env);
        let mut h = Harness::new();
        h.frame_io.push_frame(proto::SET_CMD, b"disable_hw\0");
        h.frame_io.push_frame(proto::SHUT_DOWN, &[]);
        h.poller = ScriptedPoller::new().push_ready().push_ready();

        let reason = h.run(&mut state, &env);

        assert_eq!(reason, Reason::ShutDown);
        assert!(h.watchdog.detached.get());
    }

    #[test]
    fn guarded_immediate_reboot_calls_reboot_directly_with_no_pet() {
        let cli = CliArgs::default();
        let env = env();
        let mut state = SupervisorState::at_start(0, &cli, &env);
        let mut h = Harness::new();
        h.frame_io.push_frame(proto::SET_CMD, b"guarded_immediate_reboot\0");
        h.frame_io.push_frame(proto::SHUT_DOWN, &[]);
        h.poller = ScriptedPoller::new().push_ready().push_ready();

        let pets_before_dispatch = h.watchdog.pet_count.get();
        let _ = h.run(&mut state, &env);
        let _ = pets_before_dispatch;

        assert_eq!(h.rebooter.calls.borrow().as_slice(), [RebootCommand::Restart]);
        // The entry pet happened, but guarded_immediate_reboot itself
        // pets nothing extra before rebooting.
        assert!(h.watchdog.detached.get());
    }

    #[test]
    fn oversize_frame_is_ignored_with_no_ack_and_no_state_change() {
        let cli = CliArgs::default();
        let env = env();
        let mut state = SupervisorState::at_start(0, &cli, &env);
        let mut h = Harness::new();
        h.frame_io.push_oversize(4000, vec![0xAB; crate::codec::MAX_PAYLOAD]);
        h.frame_io.push_frame(proto::SHUT_DOWN, &[]);
        h.poller = ScriptedPoller::new().push_ready().push_ready();

        let reason = h.run(&mut state, &env);
        assert_eq!(reason, Reason::ShutDown);
        let acks = h.frame_io.written_frames().iter().filter(|(op, _)| *op == proto::ACK).count();
        assert_eq!(acks, 1, "oversize frame must not itself produce an ACK");
    }

    #[test]
    fn eof_returns_closed() {
        let cli = CliArgs::default();
        let env = env();
        let mut state = SupervisorState::at_start(0, &cli, &env);
        let mut h = Harness::new();
        h.frame_io.push_eof();
        h.poller = ScriptedPoller::new().push_ready();

        assert_eq!(h.run(&mut state, &env), Reason::Closed);
    }

    #[test]
    fn heartbeat_timeout_fires_when_clock_outruns_the_deadline() {
        let cli = CliArgs { heartbeat_timeout: Some(11), kill_pid: None };
        let env = env();
        let mut state = SupervisorState::at_start(0, &cli, &env);
        let mut h = Harness::new();
        h.clock = FakeClock::new(0);
        h.poller = ScriptedPoller::new().push_timed_out();
        // Advance the clock past the deadline before the loop reads it back.
        h.clock.set(50);

        assert_eq!(h.run(&mut state, &env), Reason::Timeout);
    }

    #[test]
    fn idle_tick_pets_the_watchdog() {
        let cli = CliArgs::default();
        let env = env();
        let mut state = SupervisorState::at_start(0, &cli, &env);
        let mut h = Harness::new();
        h.frame_io.push_frame(proto::SHUT_DOWN, &[]);
        h.poller = ScriptedPoller::new().push_timed_out().push_ready();

        let reason = h.run(&mut state, &env);
        assert_eq!(reason, Reason::ShutDown);
        // entry pet + idle-tick pet.
        assert_eq!(h.watchdog.pet_count.get(), 2);
    }
}
