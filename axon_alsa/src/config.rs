//! PCM stream configurations.

use axon_core::constants::{
    MODEM_CHANNELS, MODEM_IN_PERIOD_SAMPLES, MODEM_PERIOD_COUNT, MODEM_PERIOD_SAMPLES, MODEM_RATE,
    VOICE_MIC_CHANNELS, VOICE_MIC_PERIOD_FRAMES, VOICE_MIC_RATE,
};

/// Sample encodings the HAL produces. Everything in the voice path is
/// 16-bit little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    #[default]
    S16Le,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16Le => 2,
        }
    }
}

/// Hardware parameters requested when opening a PCM device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmConfig {
    pub rate: u32,
    pub channels: u32,
    /// Period length in frames.
    pub period_size: usize,
    pub period_count: u32,
    pub format: SampleFormat,
}

impl PcmConfig {
    /// The strict modem playback contract: 8 kHz mono S16LE in exact
    /// 320-sample periods.
    pub fn modem_playback() -> Self {
        Self {
            rate: MODEM_RATE,
            channels: MODEM_CHANNELS,
            period_size: MODEM_PERIOD_SAMPLES,
            period_count: MODEM_PERIOD_COUNT,
            format: SampleFormat::S16Le,
        }
    }

    /// Modem capture (downlink voice) configuration.
    pub fn modem_capture() -> Self {
        Self {
            rate: MODEM_RATE,
            channels: MODEM_CHANNELS,
            period_size: MODEM_IN_PERIOD_SAMPLES,
            period_count: MODEM_PERIOD_COUNT,
            format: SampleFormat::S16Le,
        }
    }

    /// Microphone configuration used by the voice capture worker.
    pub fn voice_mic() -> Self {
        Self {
            rate: VOICE_MIC_RATE,
            channels: VOICE_MIC_CHANNELS,
            period_size: VOICE_MIC_PERIOD_FRAMES,
            period_count: 4,
            format: SampleFormat::S16Le,
        }
    }

    /// Bluetooth SCO link configuration (non-voice-modem cards).
    pub fn sco() -> Self {
        Self {
            rate: MODEM_RATE,
            channels: 1,
            period_size: 128,
            period_count: 4,
            format: SampleFormat::S16Le,
        }
    }

    /// Default playback configuration for conventional outputs.
    pub fn default_playback() -> Self {
        Self {
            rate: 44_100,
            channels: 2,
            period_size: 512,
            period_count: 3,
            format: SampleFormat::S16Le,
        }
    }

    /// Default capture configuration for conventional inputs.
    pub fn default_capture() -> Self {
        Self {
            rate: 44_100,
            channels: 2,
            period_size: 256,
            period_count: 4,
            format: SampleFormat::S16Le,
        }
    }

    /// One period in bytes.
    pub fn period_bytes(&self) -> usize {
        self.period_size * self.channels as usize * self.format.bytes_per_sample()
    }

    /// One frame in bytes.
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }
}
