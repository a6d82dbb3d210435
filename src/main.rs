//! Binary entry point: wires the real OS capability seam together and
//! runs the supervision loop once to completion.

use heart::args::CliArgs;
use heart::clock::{Clock, MonotonicClock};
use heart::codec::StdioFrameIo;
use heart::env::EnvConfig;
use heart::error::Reason;
use heart::logging::KmsgLogger;
use heart::os::{RealKiller, RealPoller, RealRebooter, RealSleeper, RealSyncer};
use heart::report::PROGRAM_NAME;
use heart::state::SupervisorState;
use heart::supervise::{self, Capabilities};
use heart::terminate;
use heart::watchdog::Watchdog;

use log::info;

fn main() {
    let env = EnvConfig::from_env();
    let cli = CliArgs::from_env_args();

    KmsgLogger::init(PROGRAM_NAME, env.verbose);

    if let Err(e) = heart::signal::install() {
        log::warn!("heart: failed to install snooze signal handler: {e}");
    }

    let clock = MonotonicClock;
    let mut frame_io = StdioFrameIo::stdio();
    let mut watchdog = Watchdog::new(&env);
    let mut poller = RealPoller::stdin();
    let killer = RealKiller;
    let sleeper = RealSleeper;
    let syncer = RealSyncer;
    let rebooter = RealRebooter;

    let mut state = SupervisorState::at_start(clock.now(), &cli, &env);

    let reason = {
        let mut caps = Capabilities {
            clock: &clock,
            poller: &mut poller,
            frame_io: &mut frame_io,
            watchdog: &mut watchdog,
            killer: &killer,
            syncer: &syncer,
            rebooter: &rebooter,
        };
        supervise::run(&mut state, &env, &mut caps)
    };

    info!("heart: supervision loop exited with reason {reason}");

    terminate::terminate(
        reason,
        &state,
        &env,
        &mut watchdog,
        &mut poller,
        &killer,
        &sleeper,
        &syncer,
        &rebooter,
    );

    // Only Reason::ShutDown returns from terminate() without having
    // already rebooted the board.
    if reason == Reason::ShutDown {
        std::process::exit(0);
    }
}
