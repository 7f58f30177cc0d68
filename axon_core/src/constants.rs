//! Fixed parameters of the modem PCM contract and the voice pipeline.

use std::time::Duration;

/// Sample rate of the modem PCM endpoint, in Hz.
pub const MODEM_RATE: u32 = 8000;

/// The modem endpoint is strictly mono.
pub const MODEM_CHANNELS: u32 = 1;

/// One modem period, in samples. The modem driver rejects partial periods.
pub const MODEM_PERIOD_SAMPLES: usize = 320;

/// One modem period, in bytes (signed 16-bit little-endian samples).
pub const MODEM_PERIOD_BYTES: usize = MODEM_PERIOD_SAMPLES * 2;

/// Periods in the modem playback buffer.
pub const MODEM_PERIOD_COUNT: u32 = 4;

/// Period of the modem capture endpoint (downlink voice), in samples.
pub const MODEM_IN_PERIOD_SAMPLES: usize = 800;

/// Capacity of the uplink ring, in samples. Roughly six seconds of
/// 8 kHz mono audio, enough to ride out long scheduling stalls of the
/// playback thread without dropping the call.
pub const VOICE_RING_CAPACITY: usize = MODEM_RATE as usize * 6;

/// Below this many buffered samples the uplink writer stops draining and
/// leaves the remainder for the next invocation.
pub const UPLINK_LOW_WATER: usize = 160;

/// Upper bound on periods emitted per uplink invocation, so a single
/// `write` call cannot monopolise the playback thread.
pub const UPLINK_MAX_PERIODS: usize = 4;

/// How long the uplink writer may block waiting for capture data before
/// padding the period with silence.
pub const UPLINK_WAIT: Duration = Duration::from_millis(10);

/// Average absolute sample level below which a period is considered to
/// carry no usable signal. Diagnostic only; silence is still emitted.
pub const SIGNAL_FLOOR: i32 = 100;

/// Microphone capture configuration used by the voice capture worker.
/// The supported codecs only capture reliably at 48 kHz stereo; 240
/// frames is a 5 ms period at that rate.
pub const VOICE_MIC_RATE: u32 = 48_000;
pub const VOICE_MIC_CHANNELS: u32 = 2;
pub const VOICE_MIC_PERIOD_FRAMES: usize = 240;

/// Settle time after enabling the modem PCM endpoint before the first
/// open, so the USB audio function has come up.
pub const MODEM_SETTLE: Duration = Duration::from_millis(200);
