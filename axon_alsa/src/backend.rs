//! Traits at the PCM hardware boundary.
//!
//! The device layer talks to sound cards exclusively through
//! [`PcmBackend`]; swapping the backend swaps the hardware. I/O errors
//! are a closed sum so callers can pattern-match the recovery policy
//! instead of comparing raw errno values.

use core::fmt;

use crate::config::PcmConfig;
use crate::error::Result;

/// Stream direction of a PCM device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Playback,
    Capture,
}

/// PCM transfer failure, mapped from the driver's errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmIoError {
    /// Underrun or overrun (`-EPIPE`); recovered with `prepare`.
    XRun,
    /// Driver I/O failure (`-EIO` and anything unclassified); recovered
    /// with `prepare` + `start`.
    Io(i32),
    /// `-EBUSY` / `-EAGAIN`; the device must be closed and ownership
    /// relinquished.
    Busy,
}

impl fmt::Display for PcmIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PcmIoError::XRun => write!(f, "xrun"),
            PcmIoError::Io(code) => write!(f, "i/o error (errno {code})"),
            PcmIoError::Busy => write!(f, "device busy"),
        }
    }
}

impl std::error::Error for PcmIoError {}

/// Maps an errno from a PCM transfer to the recovery taxonomy.
pub fn classify_errno(errno: i32) -> PcmIoError {
    const EPIPE: i32 = 32;
    const EAGAIN: i32 = 11;
    const EBUSY: i32 = 16;
    match errno.abs() {
        EPIPE => PcmIoError::XRun,
        EAGAIN | EBUSY => PcmIoError::Busy,
        code => PcmIoError::Io(code),
    }
}

pub type PcmIoResult<T> = std::result::Result<T, PcmIoError>;

/// Factory for PCM device handles.
pub trait PcmBackend: Send + Sync {
    /// Opens `card`/`device` in the given direction. Implementations
    /// return a handle even when the device needs `prepare` before use;
    /// a handle that failed to come up reports `is_ready() == false`.
    fn open(
        &self,
        card: u32,
        device: u32,
        direction: Direction,
        config: &PcmConfig,
    ) -> Result<Box<dyn PcmHandle>>;
}

/// One open PCM device.
pub trait PcmHandle: Send {
    /// Whether the handle came up usable.
    fn is_ready(&self) -> bool {
        true
    }

    fn prepare(&mut self) -> PcmIoResult<()>;

    fn start(&mut self) -> PcmIoResult<()>;

    fn stop(&mut self) -> PcmIoResult<()>;

    /// Writes interleaved sample bytes, returning bytes consumed.
    fn write(&mut self, buf: &[u8]) -> PcmIoResult<usize>;

    /// Reads interleaved sample bytes, returning bytes produced.
    fn read(&mut self, buf: &mut [u8]) -> PcmIoResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_classification() {
        assert_eq!(classify_errno(-32), PcmIoError::XRun);
        assert_eq!(classify_errno(32), PcmIoError::XRun);
        assert_eq!(classify_errno(-16), PcmIoError::Busy);
        assert_eq!(classify_errno(-11), PcmIoError::Busy);
        assert_eq!(classify_errno(-5), PcmIoError::Io(5));
    }
}
