//! In-memory PCM and mixer backends.
//!
//! Used by the unit and integration suites, and handy for driving the
//! HAL on a development host with no sound hardware. Playback devices
//! record every period written; capture devices replay a configurable
//! sample pattern, paced to the configured period time so pipelines
//! behave roughly like they do against a real driver.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::backend::{Direction, PcmBackend, PcmHandle, PcmIoError, PcmIoResult};
use crate::config::PcmConfig;
use crate::error::{AlsaError, Result};
use crate::mixer::{MixerBackend, MixerDevice};

/// Recorded state of one playback device.
#[derive(Debug, Default, Clone)]
pub struct FakeSink {
    pub periods: Vec<Vec<u8>>,
    pub prepares: u32,
    pub starts: u32,
    pub stops: u32,
}

impl FakeSink {
    /// Total bytes across all recorded periods.
    pub fn bytes_written(&self) -> usize {
        self.periods.iter().map(Vec::len).sum()
    }
}

/// Replay state of one capture device.
#[derive(Debug, Default)]
struct FakeSource {
    pattern: Vec<i16>,
    cursor: usize,
    /// Sleep per read to mimic the driver blocking for a period.
    /// `None` paces to the real period time of the open config.
    read_delay: Option<Duration>,
    reads: u32,
}

#[derive(Default)]
struct FakeBusState {
    sinks: HashMap<(u32, u32), FakeSink>,
    sources: HashMap<(u32, u32), FakeSource>,
    write_errors: HashMap<(u32, u32), VecDeque<PcmIoError>>,
    read_errors: HashMap<(u32, u32), VecDeque<PcmIoError>>,
    open_failures: Vec<(u32, u32, Direction)>,
    not_ready: Vec<(u32, u32)>,
}

/// Shared view over every fake device, for test assertions.
#[derive(Clone, Default)]
pub struct FakeBus {
    state: Arc<Mutex<FakeBusState>>,
}

impl FakeBus {
    fn lock(&self) -> MutexGuard<'_, FakeBusState> {
        self.state.lock().unwrap()
    }

    /// Snapshot of a playback device's recorded periods.
    pub fn playback_sink(&self, card: u32, device: u32) -> Option<FakeSink> {
        self.lock().sinks.get(&(card, device)).cloned()
    }

    /// Makes subsequent opens of `card`/`device` fail outright.
    pub fn fail_open(&self, card: u32, device: u32, direction: Direction) {
        self.lock().open_failures.push((card, device, direction));
    }

    /// Makes subsequent opens of `card`/`device` return a handle that
    /// reports not-ready.
    pub fn fail_ready(&self, card: u32, device: u32) {
        self.lock().not_ready.push((card, device));
    }

    /// Queues an error for the next write on `card`/`device`.
    pub fn queue_write_error(&self, card: u32, device: u32, error: PcmIoError) {
        self.lock()
            .write_errors
            .entry((card, device))
            .or_default()
            .push_back(error);
    }

    /// Queues an error for the next read on `card`/`device`.
    pub fn queue_read_error(&self, card: u32, device: u32, error: PcmIoError) {
        self.lock()
            .read_errors
            .entry((card, device))
            .or_default()
            .push_back(error);
    }

    /// Samples replayed (cyclically) by the capture device.
    pub fn set_capture_pattern(&self, card: u32, device: u32, pattern: Vec<i16>) {
        self.lock()
            .sources
            .entry((card, device))
            .or_default()
            .pattern = pattern;
    }

    /// Overrides the per-read pacing delay of a capture device.
    pub fn set_capture_delay(&self, card: u32, device: u32, delay: Duration) {
        self.lock()
            .sources
            .entry((card, device))
            .or_default()
            .read_delay = Some(delay);
    }

    /// Reads performed on a capture device so far.
    pub fn capture_reads(&self, card: u32, device: u32) -> u32 {
        self.lock()
            .sources
            .get(&(card, device))
            .map_or(0, |s| s.reads)
    }
}

/// PCM backend backed by [`FakeBus`].
#[derive(Clone, Default)]
pub struct FakePcmBackend {
    bus: FakeBus,
}

impl FakePcmBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bus(&self) -> FakeBus {
        self.bus.clone()
    }
}

impl PcmBackend for FakePcmBackend {
    fn open(
        &self,
        card: u32,
        device: u32,
        direction: Direction,
        config: &PcmConfig,
    ) -> Result<Box<dyn PcmHandle>> {
        let mut state = self.bus.lock();
        if state.open_failures.contains(&(card, device, direction)) {
            return Err(AlsaError::Backend(format!(
                "open refused for card {card} device {device}"
            )));
        }
        let ready = !state.not_ready.contains(&(card, device));
        if direction == Direction::Playback {
            state.sinks.entry((card, device)).or_default();
        } else {
            state.sources.entry((card, device)).or_default();
        }
        drop(state);
        Ok(Box::new(FakePcmHandle {
            bus: self.bus.clone(),
            key: (card, device),
            direction,
            config: *config,
            ready,
        }))
    }
}

struct FakePcmHandle {
    bus: FakeBus,
    key: (u32, u32),
    direction: Direction,
    config: PcmConfig,
    ready: bool,
}

impl FakePcmHandle {
    fn take_queued_error(&self, read: bool) -> Option<PcmIoError> {
        let mut state = self.bus.lock();
        let queue = if read {
            state.read_errors.get_mut(&self.key)
        } else {
            state.write_errors.get_mut(&self.key)
        };
        queue.and_then(VecDeque::pop_front)
    }
}

impl PcmHandle for FakePcmHandle {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn prepare(&mut self) -> PcmIoResult<()> {
        if self.direction == Direction::Playback {
            self.bus
                .lock()
                .sinks
                .entry(self.key)
                .or_default()
                .prepares += 1;
        }
        Ok(())
    }

    fn start(&mut self) -> PcmIoResult<()> {
        if self.direction == Direction::Playback {
            self.bus.lock().sinks.entry(self.key).or_default().starts += 1;
        }
        Ok(())
    }

    fn stop(&mut self) -> PcmIoResult<()> {
        if self.direction == Direction::Playback {
            self.bus.lock().sinks.entry(self.key).or_default().stops += 1;
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> PcmIoResult<usize> {
        if let Some(error) = self.take_queued_error(false) {
            return Err(error);
        }
        self.bus
            .lock()
            .sinks
            .entry(self.key)
            .or_default()
            .periods
            .push(buf.to_vec());
        Ok(buf.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> PcmIoResult<usize> {
        if let Some(error) = self.take_queued_error(true) {
            return Err(error);
        }

        let period_time = Duration::from_micros(
            self.config.period_size as u64 * 1_000_000 / u64::from(self.config.rate.max(1)),
        );
        let delay = {
            let mut state = self.bus.lock();
            let source = state.sources.entry(self.key).or_default();
            source.reads += 1;

            let samples = buf.len() / 2;
            if source.pattern.is_empty() {
                buf.fill(0);
            } else {
                for i in 0..samples {
                    let sample = source.pattern[source.cursor];
                    source.cursor = (source.cursor + 1) % source.pattern.len();
                    buf[i * 2..i * 2 + 2].copy_from_slice(&sample.to_le_bytes());
                }
            }
            source.read_delay.unwrap_or(period_time)
        };
        // Block like a real driver waiting for the period to fill.
        std::thread::sleep(delay);
        Ok(buf.len())
    }
}

#[derive(Debug, Clone)]
struct FakeControl {
    min: i64,
    max: i64,
    values: Vec<i64>,
}

#[derive(Default)]
struct FakeMixerState {
    cards: HashMap<u32, HashMap<String, FakeControl>>,
}

/// Mixer backend with named controls declared per card.
#[derive(Clone, Default)]
pub struct FakeMixerBackend {
    state: Arc<Mutex<FakeMixerState>>,
}

impl FakeMixerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a control with `count` values, all initially `min`.
    pub fn add_control(&self, card: u32, name: &str, min: i64, max: i64, count: usize) {
        self.state
            .lock()
            .unwrap()
            .cards
            .entry(card)
            .or_default()
            .insert(
                name.to_string(),
                FakeControl {
                    min,
                    max,
                    values: vec![min; count],
                },
            );
    }

    /// Current first value of a control, for assertions.
    pub fn control_value(&self, card: u32, name: &str) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .cards
            .get(&card)?
            .get(name)?
            .values
            .first()
            .copied()
    }
}

impl MixerBackend for FakeMixerBackend {
    fn open(&self, card: u32) -> Result<Box<dyn MixerDevice>> {
        Ok(Box::new(FakeMixerDevice {
            state: Arc::clone(&self.state),
            card,
        }))
    }
}

struct FakeMixerDevice {
    state: Arc<Mutex<FakeMixerState>>,
    card: u32,
}

impl FakeMixerDevice {
    fn with_control<T>(&self, name: &str, f: impl FnOnce(&FakeControl) -> T) -> Option<T> {
        let state = self.state.lock().unwrap();
        state.cards.get(&self.card)?.get(name).map(f)
    }
}

impl MixerDevice for FakeMixerDevice {
    fn has_control(&self, name: &str) -> bool {
        self.with_control(name, |_| ()).is_some()
    }

    fn range(&self, name: &str) -> Option<(i64, i64)> {
        self.with_control(name, |c| (c.min, c.max))
    }

    fn value_count(&self, name: &str) -> usize {
        self.with_control(name, |c| c.values.len()).unwrap_or(0)
    }

    fn value(&self, name: &str, index: usize) -> Option<i64> {
        self.with_control(name, |c| c.values.get(index).copied())?
    }

    fn set_value(&mut self, name: &str, index: usize, value: i64) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(control) = state
            .cards
            .get_mut(&self.card)
            .and_then(|card| card.get_mut(name))
        else {
            return false;
        };
        match control.values.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}
