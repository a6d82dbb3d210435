//! Kernel watchdog driver.
//!
//! Adapted from the open/pet/magic-close device wrapper this crate was
//! seeded from, generalised to the port-program's needs: the device is
//! opened lazily (on the first pet) with bounded retry, its own
//! timeout is negotiated once on open, and on request the fd is
//! *detached* — forgotten without being closed, since some kernels
//! treat `close()` as "disable the watchdog" — rather than released
//! through `magic_close()`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::{AsRawFd, IntoRawFd};

use libc::c_int;
use log::{error, info, warn};

use crate::env::EnvConfig;
use crate::ioctl::*;

/// Default path for the watchdog character device.
pub const DEFAULT_WATCHDOG_PATH: &str = "/dev/watchdog0";

const MAX_OPEN_RETRIES: u32 = 10;
const MIN_WDT_TIMEOUT: u64 = 2;
const MAX_WDT_TIMEOUT: u64 = 120;
const DEFAULT_WDT_TIMEOUT: u64 = 10;
const WDT_PET_TIMEOUT_BUFFER: u64 = 10;
const NO_WATCHDOG_TIMEOUT: u64 = 60 * 60 * 24 * 365;
const DETACHED_PET_TIMEOUT: u64 = 60 * 60 * 24;

/// Options bit and label, in the order the info reporter must emit
/// them.
const OPTION_FLAGS: &[(u32, &str)] = &[
    (0x0001, "overheat"),
    (0x0002, "fanfault"),
    (0x0004, "extern1"),
    (0x0008, "extern2"),
    (0x0010, "powerunder"),
    (0x0020, "cardreset"),
    (0x0040, "powerover"),
    (0x0080, "settimeout"),
    (0x0100, "magicclose"),
    (0x0200, "pretimeout"),
    (0x0400, "alarmonly"),
    (0x8000, "keepaliveping"),
];

/// Snapshot of watchdog-side state for the info reporter.
#[derive(Debug, Clone)]
pub struct WatchdogReport {
    pub identity: String,
    pub firmware_version: u32,
    pub options: Vec<&'static str>,
    pub time_left: i32,
    pub pre_timeout: i32,
    pub last_boot_watchdog: bool,
}

impl WatchdogReport {
    fn unavailable() -> Self {
        Self {
            identity: "none".to_string(),
            firmware_version: 0,
            options: Vec::new(),
            time_left: 0,
            pre_timeout: 0,
            last_boot_watchdog: false,
        }
    }
}

/// Seam the supervision loop drives the watchdog through. The real
/// implementation is [`Watchdog`]; tests substitute
/// [`crate::testing::FakeWatchdog`].
pub trait WatchdogIo {
    /// Pets the device, opening it first if it isn't open yet and
    /// retries remain. Returns whether the pet was actually written.
    fn pet(&mut self) -> bool;
    /// Forgets the open fd without closing it and stops trying to
    /// reopen it.
    fn detach(&mut self);
    fn wdt_timeout(&self) -> u64;
    fn wdt_pet_timeout(&self) -> u64;
    fn report(&self) -> WatchdogReport;
}

/// Drives `/dev/watchdogN` (or the path from `HEART_WATCHDOG_PATH`).
pub struct Watchdog {
    file: Option<File>,
    open_retries: u32,
    path: String,
    timeout_override: Option<u64>,
    kernel_timeout_request: Option<u32>,
    wdt_timeout: u64,
    wdt_pet_timeout: u64,
}

impl Watchdog {
    pub fn new(env: &EnvConfig) -> Self {
        let path = env
            .watchdog_path
            .clone()
            .unwrap_or_else(|| DEFAULT_WATCHDOG_PATH.to_string());
        let wdt_timeout = DEFAULT_WDT_TIMEOUT;
        let wdt_pet_timeout = derive_pet_timeout(wdt_timeout);
        Self {
            file: None,
            open_retries: MAX_OPEN_RETRIES,
            path,
            timeout_override: env.watchdog_timeout_override.map(u64::from),
            kernel_timeout_request: env.kernel_timeout_request,
            wdt_timeout,
            wdt_pet_timeout,
        }
    }

    fn ensure_open(&mut self) {
        if self.file.is_some() || self.open_retries == 0 {
            return;
        }

        match OpenOptions::new().write(true).open(&self.path) {
            Ok(file) => {
                self.file = Some(file);
                self.negotiate_timeout();
            }
            Err(e) => {
                self.open_retries -= 1;
                warn!("heart: can't open '{}': {e}", self.path);
                if self.open_retries == 0 {
                    error!("heart: running without kernel watchdog");
                    self.wdt_timeout = NO_WATCHDOG_TIMEOUT;
                    self.wdt_pet_timeout = NO_WATCHDOG_TIMEOUT;
                }
            }
        }
    }

    fn negotiate_timeout(&mut self) {
        let fd = self.file.as_ref().expect("just opened").as_raw_fd();

        if let Some(forced) = self.timeout_override {
            self.wdt_timeout = forced;
        } else {
            if let Some(requested) = self.kernel_timeout_request {
                let mut v: c_int = requested as c_int;
                unsafe {
                    let _ = ioctl_set_timeout(fd, &mut v as *mut c_int);
                }
            }

            let mut real: c_int = -1;
            let got = unsafe { ioctl_get_timeout(fd, &mut real as *mut c_int) };
            match got {
                Ok(_) if real >= MIN_WDT_TIMEOUT as c_int => self.wdt_timeout = real as u64,
                Ok(_) => warn!("heart: device reported too-short WDT timeout, using defaults"),
                Err(e) => warn!("heart: could not query WDT timeout ({e}), using defaults"),
            }
        }

        self.wdt_timeout = self.wdt_timeout.clamp(MIN_WDT_TIMEOUT, MAX_WDT_TIMEOUT);
        self.wdt_pet_timeout = derive_pet_timeout(self.wdt_timeout);

        info!(
            "heart: kernel watchdog activated. WDT timeout {}s, WDT pet interval {}s",
            self.wdt_timeout, self.wdt_pet_timeout
        );
    }
}

fn derive_pet_timeout(wdt_timeout: u64) -> u64 {
    if wdt_timeout > 2 * WDT_PET_TIMEOUT_BUFFER {
        wdt_timeout - WDT_PET_TIMEOUT_BUFFER
    } else {
        wdt_timeout / 2
    }
}

impl WatchdogIo for Watchdog {
    fn pet(&mut self) -> bool {
        self.ensure_open();
        let Some(file) = self.file.as_mut() else {
            return false;
        };
        match file.write(&[0u8]) {
            Ok(_) => true,
            Err(e) => {
                error!("heart: error petting watchdog: {e}");
                self.file = None;
                false
            }
        }
    }

    fn detach(&mut self) {
        if let Some(file) = self.file.take() {
            // Leaked on purpose: closing can disable the watchdog on
            // kernels without CONFIG_WATCHDOG_NOWAYOUT.
            let _ = file.into_raw_fd();
        }
        self.open_retries = 0;
        self.wdt_pet_timeout = DETACHED_PET_TIMEOUT;
    }

    fn wdt_timeout(&self) -> u64 {
        self.wdt_timeout
    }

    fn wdt_pet_timeout(&self) -> u64 {
        self.wdt_pet_timeout
    }

    fn report(&self) -> WatchdogReport {
        let Some(file) = self.file.as_ref() else {
            return WatchdogReport::unavailable();
        };
        let fd = file.as_raw_fd();

        let mut info = watchdog_info::new();
        let (identity, firmware_version, options) =
            if unsafe { ioctl_get_support(fd, &mut info as *mut watchdog_info) }.is_ok() {
                let identity = String::from_utf8_lossy(&info.identity)
                    .trim_end_matches('\0')
                    .to_string();
                let options = OPTION_FLAGS
                    .iter()
                    .filter(|(bit, _)| info.options & bit != 0)
                    .map(|(_, name)| *name)
                    .collect();
                (identity, info.firmware_version, options)
            } else {
                ("none".to_string(), 0, Vec::new())
            };

        let mut time_left: c_int = 0;
        let _ = unsafe { ioctl_get_time_left(fd, &mut time_left as *mut c_int) };

        let mut pre_timeout: c_int = 0;
        let _ = unsafe { ioctl_get_pretimeout(fd, &mut pre_timeout as *mut c_int) };

        let mut boot_status: c_int = 0;
        let _ = unsafe { ioctl_get_bootstatus(fd, &mut boot_status as *mut c_int) };

        WatchdogReport {
            identity,
            firmware_version,
            options,
            time_left,
            pre_timeout,
            last_boot_watchdog: boot_status != 0,
        }
    }
}
