//! PCM endpoint lifecycle with local error recovery.

use crate::backend::{Direction, PcmBackend, PcmHandle, PcmIoError, PcmIoResult};
use crate::config::PcmConfig;
use crate::error::{AlsaError, Result};

/// Lifecycle state of a PCM endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmState {
    Closed,
    Opened,
    Prepared,
    Running,
    XRun,
    Error,
}

/// A PCM device plus the recovery policy around its transfers.
///
/// Transfer errors are handled locally, once per period: an XRUN is
/// answered with `prepare` and a single retry, an I/O error with
/// `prepare` + `start` and a single retry. `Busy` means another client
/// holds the device; the endpoint closes itself and the caller must
/// relinquish any ownership claim. The first write after open follows
/// the deterministic boot sequence: prepare, write, and only on the
/// first EIO/EPIPE start and retry once.
pub struct PcmEndpoint {
    handle: Option<Box<dyn PcmHandle>>,
    state: PcmState,
    card: u32,
    device: u32,
    direction: Direction,
    config: PcmConfig,
    started: bool,
}

impl PcmEndpoint {
    /// Opens the device. A handle that reports not-ready is closed
    /// immediately and surfaces as an error.
    pub fn open(
        backend: &dyn PcmBackend,
        card: u32,
        device: u32,
        direction: Direction,
        config: PcmConfig,
    ) -> Result<Self> {
        let handle = backend.open(card, device, direction, &config)?;
        if !handle.is_ready() {
            drop(handle);
            return Err(AlsaError::NotReady { card, device });
        }
        Ok(Self {
            handle: Some(handle),
            state: PcmState::Opened,
            card,
            device,
            direction,
            config,
            started: false,
        })
    }

    pub fn prepare(&mut self) -> PcmIoResult<()> {
        let handle = self.handle.as_mut().ok_or(PcmIoError::Io(0))?;
        match handle.prepare() {
            Ok(()) => {
                self.state = PcmState::Prepared;
                Ok(())
            }
            Err(e) => {
                self.state = PcmState::Error;
                Err(e)
            }
        }
    }

    pub fn start(&mut self) -> PcmIoResult<()> {
        let handle = self.handle.as_mut().ok_or(PcmIoError::Io(0))?;
        match handle.start() {
            Ok(()) => {
                self.state = PcmState::Running;
                self.started = true;
                Ok(())
            }
            Err(e) => {
                self.state = PcmState::Error;
                Err(e)
            }
        }
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            let _ = handle.stop();
        }
        if self.state != PcmState::Closed {
            self.state = PcmState::Opened;
        }
        self.started = false;
    }

    pub fn close(&mut self) {
        self.handle = None;
        self.state = PcmState::Closed;
        self.started = false;
    }

    /// Writes one whole period, recovering transient errors in place.
    /// Returns bytes written. On `Busy` the endpoint is already closed
    /// when the error is returned.
    pub fn write_period(&mut self, buf: &[u8]) -> PcmIoResult<usize> {
        match self.write_once(buf) {
            Ok(n) => Ok(n),
            Err(PcmIoError::XRun) => {
                log::warn!("pcm card {} xrun, preparing", self.card);
                self.state = PcmState::XRun;
                self.prepare()?;
                if !self.started {
                    self.start()?;
                }
                self.write_once(buf)
            }
            Err(PcmIoError::Io(code)) => {
                log::warn!("pcm card {} i/o error {code}, prepare+start", self.card);
                self.prepare()?;
                self.start()?;
                self.write_once(buf)
            }
            Err(PcmIoError::Busy) => {
                log::warn!("pcm card {} busy, closing", self.card);
                self.close();
                Err(PcmIoError::Busy)
            }
        }
    }

    /// Reads one whole period, recovering XRUNs in place.
    pub fn read_period(&mut self, buf: &mut [u8]) -> PcmIoResult<usize> {
        match self.read_once(buf) {
            Ok(n) => Ok(n),
            Err(PcmIoError::XRun) => {
                log::warn!("pcm card {} capture xrun, preparing", self.card);
                self.state = PcmState::XRun;
                self.prepare()?;
                self.read_once(buf)
            }
            Err(PcmIoError::Io(code)) => {
                log::warn!("pcm card {} capture i/o error {code}, prepare+start", self.card);
                self.prepare()?;
                self.start()?;
                self.read_once(buf)
            }
            Err(PcmIoError::Busy) => {
                self.close();
                Err(PcmIoError::Busy)
            }
        }
    }

    fn write_once(&mut self, buf: &[u8]) -> PcmIoResult<usize> {
        let handle = self.handle.as_mut().ok_or(PcmIoError::Io(0))?;
        match handle.write(buf) {
            Ok(n) => {
                self.state = PcmState::Running;
                self.started = true;
                Ok(n)
            }
            Err(e) => Err(e),
        }
    }

    fn read_once(&mut self, buf: &mut [u8]) -> PcmIoResult<usize> {
        let handle = self.handle.as_mut().ok_or(PcmIoError::Io(0))?;
        match handle.read(buf) {
            Ok(n) => {
                self.state = PcmState::Running;
                Ok(n)
            }
            Err(e) => Err(e),
        }
    }

    pub fn state(&self) -> PcmState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether a start (explicit or via first successful write) has
    /// happened since open.
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn config(&self) -> &PcmConfig {
        &self.config
    }

    pub fn card(&self) -> u32 {
        self.card
    }

    pub fn device(&self) -> u32 {
        self.device
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}
