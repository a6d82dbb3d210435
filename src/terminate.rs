//! Termination policy.
//!
//! Runs exactly once, after the supervision loop has already decided
//! *why* it is returning. Every syscall here goes through the
//! capability seam so the whole decision tree is exercised in tests
//! without ever calling a real `reboot(2)`.

use std::time::Duration;

use crate::env::EnvConfig;
use crate::error::Reason;
use crate::os::{KillOutcome, Killer, Poller, RebootCommand, Rebooter, Sleeper, Syncer};
use crate::state::SupervisorState;
use crate::watchdog::WatchdogIo;

const KILL_RETRY_ATTEMPTS: u32 = 5;

/// Runs the termination policy for `reason`. Returns normally only for
/// [`Reason::ShutDown`]; every other path ends in a call to
/// [`Rebooter::reboot`].
#[allow(clippy::too_many_arguments)]
pub fn terminate(
    reason: Reason,
    state: &SupervisorState,
    env: &EnvConfig,
    watchdog: &mut dyn WatchdogIo,
    poller: &mut dyn Poller,
    killer: &dyn Killer,
    sleeper: &dyn Sleeper,
    syncer: &dyn Syncer,
    rebooter: &dyn Rebooter,
) {
    match reason {
        Reason::ShutDown => {
            watchdog.pet();
            return;
        }
        Reason::Crashing => {
            watchdog.pet();
            if let Some(secs) = env.crash_dump_seconds {
                let _ = poller.wait_readable(Duration::from_secs(u64::from(secs)));
            }
        }
        Reason::Timeout | Reason::Closed | Reason::Error => {}
    }

    syncer.sync();
    kill_vm(reason, state, env, killer, sleeper);
    rebooter.reboot(RebootCommand::Restart);
}

fn kill_vm(reason: Reason, state: &SupervisorState, env: &EnvConfig, killer: &dyn Killer, sleeper: &dyn Sleeper) {
    if env.no_kill || state.kill_pid == 0 {
        return;
    }

    if reason == Reason::Closed {
        for _ in 0..KILL_RETRY_ATTEMPTS {
            if killer.probe(state.kill_pid) == KillOutcome::Gone {
                return;
            }
            sleeper.sleep_one_second();
        }
    }

    for _ in 0..KILL_RETRY_ATTEMPTS {
        if killer.send(state.kill_pid, env.kill_signal) == KillOutcome::Gone {
            return;
        }
        sleeper.sleep_one_second();
    }
}
