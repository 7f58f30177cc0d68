//! Capture streams.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axon_alsa::{Direction, InputRole, PcmConfig, PcmEndpoint, RouteId};
use axon_core::HdmiInRate;
use axon_core::resample::VoiceResampler;

use crate::device::{DeviceInner, StreamConfig};
use crate::devices::InputDevices;
use crate::dump::PcmDumper;
use crate::error::{HalError, Result};
use crate::params::{self, Params};
use crate::routing;
use crate::uplink::{bytes_to_samples, samples_to_bytes};

/// Capture source hint from the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputSource {
    #[default]
    Default,
    Mic,
    VoiceCommunication,
    VoiceRecognition,
    Camcorder,
}

struct InState {
    standby: bool,
    endpoint: Option<PcmEndpoint>,
    hw: PcmConfig,
    /// Fractional read position of the hw→requested rate converter.
    pos: f64,
    /// Voice-pipeline tap: delivered audio to 8 kHz mono.
    tap: VoiceResampler,
    /// Converted samples awaiting delivery, requested interleave.
    pending: Vec<i16>,
    raw: Vec<u8>,
    hw_samples: Vec<i16>,
    delivered: Vec<i16>,
    dump: Option<PcmDumper>,
}

/// One capture stream.
///
/// Hardware runs at the card's native configuration; frames are
/// adapted to the requested rate and channel count with the same
/// averaging downmix and linear interpolation the voice path uses.
/// Telephony-downlink streams additionally feed everything they
/// deliver into the uplink ring while a call is active.
pub struct InputStream {
    id: u64,
    inner: Arc<DeviceInner>,
    config: StreamConfig,
    devices: InputDevices,
    source: InputSource,
    voice_capture: bool,
    state: Mutex<InState>,
}

impl InputStream {
    pub(crate) fn new(
        inner: Arc<DeviceInner>,
        devices: InputDevices,
        config: StreamConfig,
        source: InputSource,
    ) -> Self {
        let id = inner.alloc_stream_id();
        Self {
            id,
            inner,
            config,
            devices,
            source,
            voice_capture: devices.contains(InputDevices::TELEPHONY_RX),
            state: Mutex::new(InState {
                standby: true,
                endpoint: None,
                hw: PcmConfig::default_capture(),
                pos: 0.0,
                tap: VoiceResampler::new(),
                pending: Vec::new(),
                raw: Vec::new(),
                hw_samples: Vec::new(),
                delivered: Vec::new(),
                dump: None,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.rate
    }

    pub fn channels(&self) -> u32 {
        self.config.channels
    }

    pub fn format(&self) -> axon_alsa::SampleFormat {
        self.config.format
    }

    pub fn buffer_size(&self) -> usize {
        self.config.buffer_bytes()
    }

    pub fn source(&self) -> InputSource {
        self.source
    }

    pub fn frames_lost(&self) -> u32 {
        0
    }

    pub fn set_gain(&self, _gain: f32) -> Result<()> {
        Ok(())
    }

    /// Reads one buffer of interleaved S16LE frames. Like the write
    /// side, the full byte count is always reported; on internal
    /// error the buffer is zeroed, the thread throttled, and the
    /// stream pushed back into standby.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        if let Err(e) = self.read_inner(buf) {
            log::warn!("in read error, delivering silence: {e}");
            buf.fill(0);
            let micros = buf.len() as u64 * 1_000_000 / self.config.frame_bytes() as u64
                / u64::from(self.config.rate);
            std::thread::sleep(Duration::from_micros(micros));
            let mut st = self.state.lock().unwrap();
            self.standby_locked(&mut st);
        }
        buf.len()
    }

    fn read_inner(&self, buf: &mut [u8]) -> Result<()> {
        let mut guard = self.state.lock().unwrap();
        let st = &mut *guard;

        if st.standby {
            self.start_locked(st)?;
            st.standby = false;
        }

        // HDMI feeds renegotiate their rate out-of-band; follow the
        // hint by restarting the hardware.
        if self.devices.contains(InputDevices::HDMI)
            && let HdmiInRate::Fixed(rate) = self.inner.diagnostics().hdmi_in_rate
            && rate != st.hw.rate
        {
            log::info!("hdmi-in rate changed to {rate}, restarting capture");
            self.close_hw(st);
            self.start_locked(st)?;
        }

        let channels = self.config.channels as usize;
        let needed = (buf.len() / 2 / channels) * channels;
        while st.pending.len() < needed {
            let Some(endpoint) = st.endpoint.as_mut() else {
                return Err(HalError::NotFound("capture pcm"));
            };
            st.raw.resize(st.hw.period_bytes(), 0);
            endpoint.read_period(&mut st.raw)?;
            bytes_to_samples(&st.raw, &mut st.hw_samples);
            convert_frames(
                &st.hw_samples,
                st.hw.channels,
                st.hw.rate,
                self.config.channels,
                self.config.rate,
                &mut st.pos,
                &mut st.pending,
            );
        }

        samples_to_bytes(&st.pending[..needed], buf);
        st.delivered.clear();
        st.delivered.extend_from_slice(&st.pending[..needed]);
        st.pending.drain(..needed);

        if let Some(dump) = st.dump.as_mut() {
            dump.write(&buf[..needed * 2]);
            if dump.exhausted() {
                st.dump = None;
            }
        }

        if self.voice_capture
            && self.inner.voice.is_active()
            && let Some(ring) = self.inner.voice.ring()
        {
            let converted = st
                .tap
                .process(&st.delivered, self.config.channels, self.config.rate);
            ring.push(converted);
        }
        Ok(())
    }

    fn start_locked(&self, st: &mut InState) -> Result<()> {
        let inner = &self.inner;
        let topology = inner.rescan_cards();
        let diag = inner.diagnostics();

        let role = if self.devices.contains(InputDevices::TELEPHONY_RX) {
            InputRole::ModemIn
        } else if self.devices.contains(InputDevices::HDMI) {
            InputRole::HdmiIn
        } else {
            InputRole::Mic
        };
        let address = topology
            .input(role)
            .ok_or(HalError::NotFound(role.as_str()))?;

        let route = routing::input_route_for(self.devices);
        if let Err(e) = inner.routes.open_route(address.card, route) {
            log::warn!("input route open failed on card {}: {e}", address.card);
        }

        let hw = match role {
            InputRole::ModemIn => PcmConfig::modem_capture(),
            InputRole::HdmiIn => {
                let mut config = PcmConfig::default_capture();
                if let HdmiInRate::Fixed(rate) = diag.hdmi_in_rate {
                    config.rate = rate;
                }
                config
            }
            InputRole::Mic => {
                let mut config = PcmConfig::default_capture();
                if matches!(self.config.rate, 44_100 | 48_000) {
                    config.rate = self.config.rate;
                }
                config
            }
        };

        let mut endpoint = PcmEndpoint::open(
            inner.pcm.as_ref(),
            address.card,
            address.device,
            Direction::Capture,
            hw,
        )?;
        endpoint.prepare()?;
        endpoint.start()?;

        log::debug!(
            "input stream {} started (role={} card={} rate={} channels={})",
            self.id,
            role.as_str(),
            address.card,
            hw.rate,
            hw.channels
        );

        st.hw = hw;
        st.endpoint = Some(endpoint);
        st.pos = 0.0;
        st.pending.clear();
        st.dump = if diag.dump_in_bytes > 0 {
            let path = inner.config.dump_dir.join(format!("in_{}.pcm", self.id));
            PcmDumper::create(&path, diag.dump_in_bytes)
        } else {
            None
        };
        Ok(())
    }

    fn close_hw(&self, st: &mut InState) {
        if let Some(mut endpoint) = st.endpoint.take() {
            endpoint.stop();
            endpoint.close();
        }
    }

    /// Puts the stream into standby. The capture route stays armed
    /// while the voice pipeline needs the microphone.
    pub fn standby(&self) {
        let mut st = self.state.lock().unwrap();
        self.standby_locked(&mut st);
    }

    fn standby_locked(&self, st: &mut InState) {
        if st.standby {
            return;
        }
        self.close_hw(st);
        st.standby = true;
        st.dump = None;

        let voice = &self.inner.voice;
        if !voice.is_active()
            && !voice
                .mic_route_active
                .load(std::sync::atomic::Ordering::SeqCst)
        {
            self.inner.routes.close_route(RouteId::CaptureOff);
        }
    }

    pub fn is_standby(&self) -> bool {
        self.state.lock().unwrap().standby
    }

    pub fn set_parameters(&self, kvpairs: &str) -> Result<()> {
        let parsed = Params::parse(kvpairs);
        if parsed.has(params::KEY_ROUTING) || parsed.has(params::KEY_INPUT_SOURCE) {
            // Routing changes take effect on the next read.
            let mut st = self.state.lock().unwrap();
            self.standby_locked(&mut st);
        }
        Ok(())
    }

    pub fn get_parameters(&self, keys: &str) -> String {
        let query = Params::parse(keys);
        let mut reply = Params::new();
        if query.has(params::KEY_SUP_RATES) {
            reply.set(params::KEY_SUP_RATES, "44100|48000");
        }
        if query.has(params::KEY_SUP_CHANNELS) {
            reply.set(
                params::KEY_SUP_CHANNELS,
                "AUDIO_CHANNEL_IN_STEREO|AUDIO_CHANNEL_IN_MONO",
            );
        }
        if query.has(params::KEY_SUP_FORMATS) {
            reply.set(params::KEY_SUP_FORMATS, "AUDIO_FORMAT_PCM_16_BIT");
        }
        reply.to_string()
    }

    /// Human-readable stream dump.
    pub fn dump(&self) -> String {
        let st = self.state.lock().unwrap();
        format!(
            "input {}: devices={:?} rate={} channels={} standby={} voice_tap={}\n",
            self.id,
            self.devices,
            self.config.rate,
            self.config.channels,
            st.standby,
            self.voice_capture
        )
    }
}

/// Adapts interleaved frames between channel counts and rates.
/// Channel adaptation averages down and duplicates up; rate
/// adaptation linearly interpolates with a phase carried in `pos`.
fn convert_frames(
    src: &[i16],
    src_channels: u32,
    src_rate: u32,
    dst_channels: u32,
    dst_rate: u32,
    pos: &mut f64,
    out: &mut Vec<i16>,
) {
    let src_ch = src_channels.max(1) as usize;
    let dst_ch = dst_channels.max(1) as usize;
    let frames = src.len() / src_ch;
    if frames == 0 {
        return;
    }

    if src_rate == dst_rate {
        for frame in 0..frames {
            for channel in 0..dst_ch {
                out.push(channel_value(src, frame, src_ch, channel, dst_ch) as i16);
            }
        }
        return;
    }

    let step = f64::from(src_rate) / f64::from(dst_rate);
    let mut p = *pos;
    while p < frames as f64 {
        let idx = p as usize;
        let frac = p - idx as f64;
        for channel in 0..dst_ch {
            let s0 = channel_value(src, idx, src_ch, channel, dst_ch);
            let s1 = if idx + 1 < frames {
                channel_value(src, idx + 1, src_ch, channel, dst_ch)
            } else {
                s0
            };
            out.push((s0 + (f64::from(s1 - s0) * frac) as i32) as i16);
        }
        p += step;
    }
    *pos = if p >= frames as f64 {
        p - frames as f64
    } else {
        p
    };
}

fn channel_value(src: &[i16], frame: usize, src_ch: usize, channel: usize, dst_ch: usize) -> i32 {
    if src_ch == dst_ch {
        i32::from(src[frame * src_ch + channel])
    } else if src_ch == 1 {
        i32::from(src[frame])
    } else if dst_ch == 1 {
        let sum: i32 = (0..src_ch).map(|c| i32::from(src[frame * src_ch + c])).sum();
        sum / src_ch as i32
    } else {
        i32::from(src[frame * src_ch + (channel % src_ch)])
    }
}
