//! Modem AT-command control.
//!
//! The modem's PCM endpoint is gated by `AT+CPCMREG` on its control
//! TTY. Commands are fire-and-forget: the TTY is opened write-only and
//! non-blocking per command, the response channel belongs to the RIL.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Default control TTY of the modem.
pub const DEFAULT_MODEM_TTY: &str = "/dev/ttyUSB3";

/// Serial control channel to the modem.
pub struct ModemControl {
    tty: PathBuf,
    /// Last `AT+CPCMREG` value acknowledged by a successful write, so
    /// redundant commands are suppressed.
    pcm_register: Mutex<Option<bool>>,
}

impl ModemControl {
    pub fn new(tty: impl Into<PathBuf>) -> Self {
        Self {
            tty: tty.into(),
            pcm_register: Mutex::new(None),
        }
    }

    pub fn tty(&self) -> &Path {
        &self.tty
    }

    /// Writes `cmd` terminated by a carriage return. Interrupted
    /// writes are retried; everything else surfaces as an error.
    pub fn send_at(&self, cmd: &str) -> io::Result<()> {
        let mut tty = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.tty)?;

        let framed = format!("{cmd}\r");
        let mut written = 0;
        while written < framed.len() {
            match tty.write(&framed.as_bytes()[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        tty.sync_all()?;
        log::info!("modem at: sent {cmd}");
        Ok(())
    }

    /// Enables or disables the modem PCM endpoint. Returns whether the
    /// endpoint is known to be in the requested state; the last
    /// successful setting is cached and repeated commands skipped.
    pub fn set_pcm_register(&self, enable: bool) -> bool {
        let mut cached = self.pcm_register.lock().unwrap();
        if *cached == Some(enable) {
            log::debug!("modem at: CPCMREG already {}", enable as u8);
            return true;
        }

        let cmd = if enable { "AT+CPCMREG=1" } else { "AT+CPCMREG=0" };
        match self.send_at(cmd) {
            Ok(()) => {
                *cached = Some(enable);
                true
            }
            Err(e) => {
                log::error!("modem at: {cmd} failed: {e}");
                false
            }
        }
    }

    /// Drops the cached `AT+CPCMREG` state, forcing the next request
    /// to hit the TTY.
    pub fn forget_pcm_register(&self) {
        *self.pcm_register.lock().unwrap() = None;
    }
}
