//! Capture-path signal statistics.
//!
//! Diagnostics only: the voice pipeline records every captured batch so
//! a silent microphone, a dead route or a clipped input can be told
//! apart from a log excerpt. Nothing here feeds back into the audio
//! path.

/// Coarse classification of an average absolute sample level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalClass {
    Silence,
    Low,
    Normal,
    Loud,
}

impl SignalClass {
    /// Classifies an average absolute 16-bit sample level.
    pub fn from_level(avg_abs: i32) -> Self {
        if avg_abs < 5 {
            SignalClass::Silence
        } else if avg_abs < 20 {
            SignalClass::Low
        } else if avg_abs < 120 {
            SignalClass::Normal
        } else {
            SignalClass::Loud
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalClass::Silence => "SILENCE",
            SignalClass::Low => "LOW",
            SignalClass::Normal => "NORMAL",
            SignalClass::Loud => "LOUD",
        }
    }
}

/// Running statistics over captured sample batches.
#[derive(Debug, Default, Clone)]
pub struct CaptureStats {
    pub batches: u32,
    pub zero_batches: u32,
    pub nonzero_batches: u32,
    pub consecutive_zero: u32,
    pub total_samples: u64,
    pub sum_abs: u64,
    pub max_abs: i32,
    summary_reported: bool,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one captured batch into the statistics and returns whether
    /// the batch was entirely zero.
    pub fn record(&mut self, samples: &[i16]) -> bool {
        if samples.is_empty() {
            return true;
        }

        let mut all_zero = true;
        let mut sum_abs = 0u64;
        let mut max_abs = 0i32;
        for &s in samples {
            let v = i32::from(s).abs();
            if v != 0 {
                all_zero = false;
            }
            sum_abs += v as u64;
            if v > max_abs {
                max_abs = v;
            }
        }

        self.batches += 1;
        self.total_samples += samples.len() as u64;
        self.sum_abs += sum_abs;
        if max_abs > self.max_abs {
            self.max_abs = max_abs;
        }
        if all_zero {
            self.zero_batches += 1;
            self.consecutive_zero += 1;
        } else {
            self.nonzero_batches += 1;
            self.consecutive_zero = 0;
        }
        all_zero
    }

    /// Average absolute sample level over everything recorded.
    pub fn average_abs(&self) -> i32 {
        if self.total_samples == 0 {
            0
        } else {
            (self.sum_abs / self.total_samples) as i32
        }
    }

    /// Classification of the running average level.
    pub fn signal_class(&self) -> SignalClass {
        SignalClass::from_level(self.average_abs())
    }

    /// Logs a one-shot summary line; repeated calls are silent until
    /// the stats are reset.
    pub fn report_summary(&mut self, reason: &str) {
        if self.summary_reported {
            return;
        }
        self.summary_reported = true;
        log::info!(
            "capture summary ({reason}): batches={} zero={} nonzero={} avg={} max={} level={}",
            self.batches,
            self.zero_batches,
            self.nonzero_batches,
            self.average_abs(),
            self.max_abs,
            self.signal_class().as_str()
        );
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
