//! In-memory fakes for the capability seam.
//!
//! These stand in for the `LD_PRELOAD` function interposition the
//! original test fixture used: every syscall the loop and the
//! termination policy touch is reachable through a trait here, so a
//! test drives the whole state machine without a real watchdog device,
//! a real clock, or a real child to kill.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use crate::clock::Clock;
use crate::codec::{FrameIo, ReadOutcome};
use crate::os::{KillOutcome, KillSignal, Killer, PollError, PollOutcome, Poller, RebootCommand, Rebooter, Sleeper, Syncer};
use crate::watchdog::{WatchdogIo, WatchdogReport};

/// A clock whose value is set directly by the test, rather than
/// advanced by real time passing.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: Cell<u64>,
}

impl FakeClock {
    pub fn new(start: u64) -> Self {
        Self { now: Cell::new(start) }
    }

    pub fn set(&self, t: u64) {
        self.now.set(t);
    }

    pub fn advance(&self, by: u64) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> u64 {
        self.now.get()
    }
}

/// An in-memory frame channel: the test enqueues the frames the "VM"
/// would have sent, and inspects the frames the loop wrote back.
#[derive(Debug, Default)]
pub struct MemFrameIo {
    incoming: VecDeque<ReadOutcome>,
    outgoing: Vec<(u8, Vec<u8>)>,
}

impl MemFrameIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frame(&mut self, op: u8, body: &[u8]) {
        let mut payload = Vec::with_capacity(1 + body.len());
        payload.push(op);
        payload.extend_from_slice(body);
        self.incoming.push_back(ReadOutcome::Frame {
            declared_len: payload.len(),
            payload,
        });
    }

    pub fn push_oversize(&mut self, declared_len: usize, payload: Vec<u8>) {
        self.incoming.push_back(ReadOutcome::Frame { declared_len, payload });
    }

    pub fn push_eof(&mut self) {
        self.incoming.push_back(ReadOutcome::Eof);
    }

    pub fn written_frames(&self) -> &[(u8, Vec<u8>)] {
        &self.outgoing
    }
}

impl FrameIo for MemFrameIo {
    fn read_frame(&mut self) -> io::Result<ReadOutcome> {
        Ok(self.incoming.pop_front().unwrap_or(ReadOutcome::Eof))
    }

    fn write_frame(&mut self, op: u8, body: &[u8]) -> io::Result<()> {
        self.outgoing.push((op, body.to_vec()));
        Ok(())
    }
}

/// A watchdog double that records pets/detaches and returns
/// test-configured timeouts and reports.
pub struct FakeWatchdog {
    pub pet_count: Cell<u32>,
    pub pet_should_fail: Cell<bool>,
    pub detached: Cell<bool>,
    pub wdt_timeout: Cell<u64>,
    pub wdt_pet_timeout: Cell<u64>,
    pub report: RefCell<WatchdogReport>,
}

impl FakeWatchdog {
    pub fn new() -> Self {
        Self {
            pet_count: Cell::new(0),
            pet_should_fail: Cell::new(false),
            detached: Cell::new(false),
            wdt_timeout: Cell::new(60),
            wdt_pet_timeout: Cell::new(50),
            report: RefCell::new(WatchdogReport {
                identity: "none".to_string(),
                firmware_version: 0,
                options: Vec::new(),
                time_left: 0,
                pre_timeout: 0,
                last_boot_watchdog: false,
            }),
        }
    }
}

impl Default for FakeWatchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchdogIo for FakeWatchdog {
    fn pet(&mut self) -> bool {
        if self.pet_should_fail.get() {
            return false;
        }
        self.pet_count.set(self.pet_count.get() + 1);
        true
    }

    fn detach(&mut self) {
        self.detached.set(true);
    }

    fn wdt_timeout(&self) -> u64 {
        self.wdt_timeout.get()
    }

    fn wdt_pet_timeout(&self) -> u64 {
        self.wdt_pet_timeout.get()
    }

    fn report(&self) -> WatchdogReport {
        self.report.borrow().clone()
    }
}

/// A poller driven by a scripted sequence of outcomes, one per call.
/// Falls back to [`PollOutcome::TimedOut`] once the script is drained,
/// so a loop under test never blocks forever on a missing entry.
pub struct ScriptedPoller {
    script: VecDeque<Result<PollOutcome, PollError>>,
    pub requested_timeouts: RefCell<Vec<Duration>>,
}

impl ScriptedPoller {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            requested_timeouts: RefCell::new(Vec::new()),
        }
    }

    pub fn push_ready(mut self) -> Self {
        self.script.push_back(Ok(PollOutcome::Ready));
        self
    }

    pub fn push_timed_out(mut self) -> Self {
        self.script.push_back(Ok(PollOutcome::TimedOut));
        self
    }

    pub fn push_interrupted(mut self) -> Self {
        self.script.push_back(Err(PollError::Interrupted));
        self
    }
}

impl Default for ScriptedPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller for ScriptedPoller {
    fn wait_readable(&mut self, timeout: Duration) -> Result<PollOutcome, PollError> {
        self.requested_timeouts.borrow_mut().push(timeout);
        match self.script.pop_front() {
            Some(outcome) => outcome,
            None => Ok(PollOutcome::TimedOut),
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeRebooter {
    pub calls: RefCell<Vec<RebootCommand>>,
}

impl Rebooter for FakeRebooter {
    fn reboot(&self, cmd: RebootCommand) {
        self.calls.borrow_mut().push(cmd);
    }
}

/// A killer that reports the pid gone after a configured number of
/// probes/sends, so kill-retry loops under test terminate.
pub struct FakeKiller {
    pub calls: RefCell<Vec<(u32, Option<KillSignal>)>>,
    gone_after: Cell<u32>,
}

impl FakeKiller {
    pub fn new(gone_after: u32) -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            gone_after: Cell::new(gone_after),
        }
    }

    fn tick(&self) -> KillOutcome {
        let remaining = self.gone_after.get();
        if remaining == 0 {
            KillOutcome::Gone
        } else {
            self.gone_after.set(remaining - 1);
            KillOutcome::Sent
        }
    }
}

impl Killer for FakeKiller {
    fn probe(&self, pid: u32) -> KillOutcome {
        self.calls.borrow_mut().push((pid, None));
        self.tick()
    }

    fn send(&self, pid: u32, sig: KillSignal) -> KillOutcome {
        self.calls.borrow_mut().push((pid, Some(sig)));
        self.tick()
    }
}

#[derive(Debug, Default)]
pub struct FakeSleeper {
    pub sleep_count: Cell<u32>,
}

impl Sleeper for FakeSleeper {
    fn sleep_one_second(&self) {
        self.sleep_count.set(self.sleep_count.get() + 1);
    }
}

#[derive(Debug, Default)]
pub struct FakeSyncer {
    pub sync_count: Cell<u32>,
}

impl Syncer for FakeSyncer {
    fn sync(&self) {
        self.sync_count.set(self.sync_count.get() + 1);
    }
}
