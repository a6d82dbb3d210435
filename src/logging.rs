//! Structured log sink.
//!
//! Backed by the `log` facade the rest of the crate logs through, but
//! the sink itself is custom rather than `env_logger`'s default
//! stderr writer: it tries to steal `/dev/kmsg` onto stderr once at
//! start-up, and separately drops an RFC3339 breadcrumb to
//! `/dev/pmsg0` for anything at `error` or above, mirroring
//! `elog.c`'s `heart_error`/`heart_fmt_error` pair from the historical
//! C implementation. `env_logger` remains in the dependency graph
//! purely as a dev-dependency for test log capture, exactly as the
//! teacher crate uses it.

use std::cell::RefCell;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{Level, LevelFilter, Log, Metadata, Record};

const KMSG_PATH: &str = "/dev/kmsg";
const PMSG_PATH: &str = "/dev/pmsg0";

/// RFC5424 facility.level prefix `log`'s own format doesn't produce,
/// so the sink adds it by hand to match what lands in `dmesg`.
fn rfc5424_severity(level: Level) -> u8 {
    match level {
        Level::Error => 3,
        Level::Warn => 4,
        Level::Info => 6,
        Level::Debug | Level::Trace => 7,
    }
}

/// Maps `HEART_VERBOSE` onto a `log::LevelFilter`: 0 is emergencies
/// only (errors and above still pass, there is no "off" level below
/// error in this program), 1 is errors, 2+ is debug.
pub fn level_filter_for_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Error,
        1 => LevelFilter::Warn,
        _ => LevelFilter::Debug,
    }
}

struct PmsgSink {
    /// `None` until the first attempt; `Some(None)` once an open has
    /// failed, so it is never retried.
    handle: Option<Option<std::fs::File>>,
}

impl PmsgSink {
    fn new() -> Self {
        Self { handle: None }
    }

    fn write_breadcrumb(&mut self, line: &str) {
        if self.handle.is_none() {
            self.handle = Some(OpenOptions::new().write(true).open(PMSG_PATH).ok());
        }
        if let Some(Some(file)) = self.handle.as_mut() {
            let _ = writeln!(file, "{line}");
        }
    }
}

/// The production `log::Log` implementation.
pub struct KmsgLogger {
    program_name: &'static str,
    filter: LevelFilter,
    pmsg: Mutex<RefCell<PmsgSink>>,
}

impl KmsgLogger {
    pub fn new(program_name: &'static str, filter: LevelFilter) -> Self {
        Self {
            program_name,
            filter,
            pmsg: Mutex::new(RefCell::new(PmsgSink::new())),
        }
    }

    /// Tries to redirect stderr onto `/dev/kmsg`, so that both this
    /// logger's own writes and anything else that lands on stderr end
    /// up in the kernel ring buffer. Falls back silently to leaving
    /// stderr alone.
    pub fn install_kmsg_redirect() {
        if let Ok(kmsg) = OpenOptions::new().write(true).open(KMSG_PATH) {
            unsafe {
                libc::dup2(kmsg.as_raw_fd(), libc::STDERR_FILENO);
            }
            // The dup2'd fd now owns fd 2; let this File's own fd be
            // dropped/closed without disturbing stderr.
        }
    }

    /// Installs this logger as the global `log` sink. Call once.
    pub fn init(program_name: &'static str, verbose: u8) {
        Self::install_kmsg_redirect();
        let filter = level_filter_for_verbosity(verbose);
        let logger = Box::new(Self::new(program_name, filter));
        let _ = log::set_boxed_logger(logger);
        log::set_max_level(filter);
    }
}

impl Log for KmsgLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.filter
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // A formatting panic must never bring the supervisor down;
        // std::fmt doesn't unwind on ordinary Display/Debug errors, so
        // this is a belt-and-braces swallow around the whole line.
        let line = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            format!(
                "<{}>{}: {}",
                rfc5424_severity(record.level()),
                self.program_name,
                record.args()
            )
        }));
        let Ok(line) = line else { return };

        eprintln!("{line}");

        if record.level() <= Level::Error {
            if let Ok(guard) = self.pmsg.lock() {
                let breadcrumb = format!("{} {}", rfc3339_now(), line);
                guard.borrow_mut().write_breadcrumb(&breadcrumb);
            }
        }
    }

    fn flush(&self) {}
}

static TIME_WARNED: AtomicBool = AtomicBool::new(false);

/// A minimal RFC3339 `SystemTime` formatter covering exactly the case
/// this sink needs (UTC, second resolution); a full calendar/date
/// crate would be overkill for one breadcrumb field.
fn rfc3339_now() -> String {
    let secs = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        Err(_) => {
            if !TIME_WARNED.swap(true, Ordering::Relaxed) {
                eprintln!("heart: system clock before epoch, breadcrumb timestamp will read 1970");
            }
            0
        }
    };
    civil_from_unix(secs)
}

fn civil_from_unix(secs: u64) -> String {
    // Howard Hinnant's days_from_civil inverse, adapted for seconds.
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (hour, minute, second) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    let z = days as i64 + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { y + 1 } else { y };

    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}Z")
}
