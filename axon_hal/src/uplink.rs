//! Modem uplink writes.
//!
//! Everything that reaches the modem goes through here, in exact
//! 640-byte periods. Two producers exist: the voice ring (microphone
//! uplink, drained on the playback thread while a call is active) and
//! the downlink accumulator (application audio directed at the modem
//! when no voice pipeline is running).

use axon_alsa::{PcmEndpoint, PcmIoError, PcmIoResult};
use axon_core::VoiceRing;
use axon_core::constants::{
    MODEM_PERIOD_BYTES, MODEM_PERIOD_SAMPLES, SIGNAL_FLOOR, UPLINK_LOW_WATER, UPLINK_MAX_PERIODS,
    UPLINK_WAIT,
};
use axon_core::resample::VoiceResampler;

/// Serialises `samples` into little-endian bytes.
pub(crate) fn samples_to_bytes(samples: &[i16], out: &mut [u8]) {
    for (sample, chunk) in samples.iter().zip(out.chunks_exact_mut(2)) {
        chunk.copy_from_slice(&sample.to_le_bytes());
    }
}

/// Deserialises little-endian bytes into `samples`.
pub(crate) fn bytes_to_samples(bytes: &[u8], out: &mut Vec<i16>) {
    out.clear();
    out.extend(
        bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
    );
}

/// Average absolute level of a sample block.
fn average_abs(samples: &[i16]) -> i32 {
    if samples.is_empty() {
        return 0;
    }
    let sum: i64 = samples.iter().map(|&s| i64::from(s).abs()).sum();
    (sum / samples.len() as i64) as i32
}

/// Drains the voice ring into the modem endpoint.
///
/// Emits up to four periods per invocation. Once at least one period
/// is out, draining stops when the ring falls below the low-water mark
/// so the next invocation finds a full period. An empty ring is given
/// one bounded condvar wait before the period is padded with silence;
/// the wait is abandoned as soon as the pipeline deactivates.
///
/// Returns the number of periods written. `Busy` propagates with the
/// endpoint already closed; the caller must drop its ownership claim.
pub(crate) fn drain_uplink(
    ring: &VoiceRing,
    endpoint: &mut PcmEndpoint,
    debug: bool,
) -> PcmIoResult<usize> {
    let mut period = [0i16; MODEM_PERIOD_SAMPLES];
    let mut bytes = [0u8; MODEM_PERIOD_BYTES];
    let mut periods = 0;

    while periods < UPLINK_MAX_PERIODS && ring.is_active() {
        if periods > 0 && ring.available() < UPLINK_LOW_WATER {
            break;
        }

        let mut got = ring.pop(&mut period);
        if got == 0 {
            if !ring.wait_for_data(UPLINK_WAIT) && !ring.is_active() {
                break;
            }
            got = ring.pop(&mut period);
        }
        if got < MODEM_PERIOD_SAMPLES {
            period[got..].fill(0);
            if debug && got == 0 {
                log::debug!("uplink: ring empty, padding silence");
            }
        }
        if debug && got > 0 {
            let avg = average_abs(&period[..got]);
            if avg < SIGNAL_FLOOR {
                log::debug!("uplink: low signal (avg={avg}, fetched={got})");
            }
        }

        samples_to_bytes(&period, &mut bytes);
        endpoint.write_period(&bytes)?;
        periods += 1;
    }

    if debug && periods > 0 {
        let (used, capacity) = ring.occupancy();
        log::debug!("uplink: wrote {periods} periods, ring {used}/{capacity}");
    }
    Ok(periods)
}

/// Application-audio accumulator for the modem sink.
///
/// Incoming writes are downmixed and resampled to 8 kHz mono, then
/// gathered into a 320-sample buffer. Whenever the buffer fills, one
/// exact period goes out; the residual waits for the next write. The
/// resampler phase deliberately survives an accumulator reset, so a
/// standby/resume cycle mid-call splices cleanly.
pub(crate) struct DownlinkPath {
    resampler: VoiceResampler,
    accum: [i16; MODEM_PERIOD_SAMPLES],
    used: usize,
    scratch: Vec<i16>,
}

impl DownlinkPath {
    pub(crate) fn new() -> Self {
        Self {
            resampler: VoiceResampler::new(),
            accum: [0; MODEM_PERIOD_SAMPLES],
            used: 0,
            scratch: Vec::new(),
        }
    }

    /// Samples waiting for the next period boundary.
    pub(crate) fn pending(&self) -> usize {
        self.used
    }

    /// Drops buffered samples but keeps the resampler phase.
    pub(crate) fn reset_accumulator(&mut self) {
        self.used = 0;
    }

    /// Feeds one application write into the accumulator, emitting
    /// periods as they complete. Returns periods written.
    pub(crate) fn write(
        &mut self,
        endpoint: &mut PcmEndpoint,
        pcm_bytes: &[u8],
        channels: u32,
        rate: u32,
        debug: bool,
    ) -> PcmIoResult<usize> {
        let mut samples = std::mem::take(&mut self.scratch);
        bytes_to_samples(pcm_bytes, &mut samples);
        let converted = self.resampler.process(&samples, channels, rate);

        let mut periods = 0;
        let mut appended = 0;
        let mut bytes = [0u8; MODEM_PERIOD_BYTES];
        while appended < converted.len() {
            let space = MODEM_PERIOD_SAMPLES - self.used;
            let take = (converted.len() - appended).min(space);
            self.accum[self.used..self.used + take]
                .copy_from_slice(&converted[appended..appended + take]);
            self.used += take;
            appended += take;

            if self.used < MODEM_PERIOD_SAMPLES {
                continue;
            }

            if debug {
                let avg = average_abs(&self.accum);
                if avg < SIGNAL_FLOOR {
                    log::debug!("downlink: low signal period (avg={avg})");
                }
            }
            samples_to_bytes(&self.accum, &mut bytes);
            match endpoint.write_period(&bytes) {
                Ok(_) => {
                    self.used = 0;
                    periods += 1;
                }
                Err(e) => {
                    self.scratch = samples;
                    return Err(e);
                }
            }
        }

        self.scratch = samples;
        Ok(periods)
    }
}
