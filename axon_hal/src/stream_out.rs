//! Playback streams and the per-write fan-out across sound cards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axon_alsa::{Direction, OutputRole, PcmConfig, PcmEndpoint, PcmIoError};

use crate::device::{AudioMode, DeviceInner, StreamConfig};
use crate::devices::OutputDevices;
use crate::dump::PcmDumper;
use crate::error::{HalError, Result};
use crate::params::{self, Params};
use crate::routing;
use crate::uplink::{self, DownlinkPath};
use crate::usecase::{UsecaseId, UsecaseKind};

pub(crate) struct OutState {
    pub(crate) devices: OutputDevices,
    pub(crate) standby: bool,
    pub(crate) muted: bool,
    pub(crate) pcm: HashMap<OutputRole, PcmEndpoint>,
    pub(crate) downlink: Option<DownlinkPath>,
    pub(crate) written_frames: u64,
    pub(crate) usecase: (UsecaseId, UsecaseKind),
    dump: Option<PcmDumper>,
    scratch: Vec<u8>,
}

/// One playback stream.
///
/// The framework drives `write` from a dedicated thread per stream;
/// everything mutable lives behind the stream lock. PCM handles are
/// owned here, per sink role; exclusive-sink arbitration goes through
/// the device ownership table keyed by the stream id.
pub struct OutputStream {
    id: u64,
    inner: Arc<DeviceInner>,
    config: StreamConfig,
    state: Mutex<OutState>,
}

impl OutputStream {
    pub(crate) fn new(
        inner: Arc<DeviceInner>,
        devices: OutputDevices,
        config: StreamConfig,
    ) -> Self {
        let id = inner.alloc_stream_id();
        Self {
            id,
            inner,
            config,
            state: Mutex::new(OutState {
                devices,
                standby: true,
                muted: false,
                pcm: HashMap::new(),
                downlink: None,
                written_frames: 0,
                usecase: (UsecaseId::PrimaryPlayback, UsecaseKind::PcmPlayback),
                dump: None,
                scratch: Vec::new(),
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

    /// Mixer latency in milliseconds.
    pub fn latency_ms(&self) -> u32 {
        let frames = self.config.period_size as u64 * u64::from(self.config.period_count);
        (frames * 1000 / u64::from(self.config.rate)) as u32
    }

    pub fn frames_written(&self) -> u64 {
        self.state.lock().unwrap().written_frames
    }

    pub fn devices(&self) -> OutputDevices {
        self.state.lock().unwrap().devices
    }

    pub fn set_mute(&self, muted: bool) {
        self.state.lock().unwrap().muted = muted;
    }

    /// Writes one buffer of interleaved S16LE frames.
    ///
    /// The framework does not tolerate partial writes: the full byte
    /// count is always reported consumed. Internal errors are logged
    /// and paid for with one period of wall-clock sleep so a wedged
    /// sink cannot spin the playback thread.
    pub fn write(&self, buf: &[u8]) -> usize {
        let result = self.write_inner(buf);

        {
            let mut st = self.state.lock().unwrap();
            st.written_frames += (buf.len() / self.config.frame_bytes()) as u64;
        }

        if let Err(e) = result {
            log::debug!("out write error, keeping silence: {e}");
            let micros =
                buf.len() as u64 * 1_000_000 / self.config.frame_bytes() as u64
                    / u64::from(self.config.rate);
            std::thread::sleep(Duration::from_micros(micros));
        }
        buf.len()
    }

    fn write_inner(&self, buf: &[u8]) -> Result<()> {
        // Leaving standby re-runs routing and PCM setup under the
        // all-outputs lock, so concurrent starts see a consistent
        // ownership table.
        if self.state.lock().unwrap().standby {
            let _outputs = self.inner.outputs.lock().unwrap();
            let mut st = self.state.lock().unwrap();
            if st.standby {
                self.start_locked(&mut st)?;
                st.standby = false;
            }
        }

        let mut guard = self.state.lock().unwrap();
        let st = &mut *guard;

        let debug = self.inner.diagnostics().debug_audio;
        if st.muted {
            st.scratch.clear();
            st.scratch.resize(buf.len(), 0);
        }
        let data: &[u8] = if st.muted { &st.scratch } else { buf };

        if let Some(dump) = st.dump.as_mut() {
            dump.write(data);
            if dump.exhausted() {
                st.dump = None;
            }
        }

        let mut outcome = Ok(());
        for role in OutputRole::ALL {
            match role {
                OutputRole::Modem => {
                    if !st.pcm.contains_key(&role) {
                        continue;
                    }
                    if !self.inner.owns(role, self.id) {
                        // Lost the sink (or never had it); the write is
                        // complete as far as this stream is concerned.
                        st.pcm.remove(&role);
                        continue;
                    }
                    let voice_active = self.inner.voice.is_active();
                    st.usecase = if voice_active {
                        (UsecaseId::SimcomVoiceCall, UsecaseKind::VoiceCall)
                    } else {
                        (UsecaseId::PrimaryPlayback, UsecaseKind::PcmPlayback)
                    };

                    let Some(endpoint) = st.pcm.get_mut(&role) else {
                        continue;
                    };
                    let write_result = if voice_active {
                        match self.inner.voice.ring() {
                            Some(ring) => {
                                uplink::drain_uplink(&ring, endpoint, debug).map(|_| ())
                            }
                            None => Ok(()),
                        }
                    } else {
                        let downlink = st.downlink.get_or_insert_with(DownlinkPath::new);
                        downlink
                            .write(endpoint, data, self.config.channels, self.config.rate, debug)
                            .map(|_| ())
                    };

                    match write_result {
                        Ok(()) => {}
                        Err(PcmIoError::Busy) => {
                            // The endpoint closed itself; give the sink
                            // back and abort this call.
                            st.pcm.remove(&role);
                            self.inner.release_owner(role, self.id);
                            outcome = Err(HalError::Io(PcmIoError::Busy));
                            break;
                        }
                        Err(e) => {
                            outcome = Err(HalError::Io(e));
                            break;
                        }
                    }
                }
                OutputRole::Hdmi | OutputRole::Spdif => {
                    // Skip exclusive sinks another stream has taken.
                    if let Some(owner) = self.inner.owner(role)
                        && owner != self.id
                    {
                        continue;
                    }
                    let Some(endpoint) = st.pcm.get_mut(&role) else {
                        continue;
                    };
                    if let Err(e) = endpoint.write_period(data) {
                        if e == PcmIoError::Busy {
                            st.pcm.remove(&role);
                            self.inner.release_owner(role, self.id);
                        }
                        outcome = Err(HalError::Io(e));
                        break;
                    }
                }
                OutputRole::Speaker => {
                    let Some(endpoint) = st.pcm.get_mut(&role) else {
                        continue;
                    };
                    if let Err(e) = endpoint.write_period(data) {
                        if e == PcmIoError::Busy {
                            st.pcm.remove(&role);
                        }
                        outcome = Err(HalError::Io(e));
                        break;
                    }
                }
            }
        }
        outcome
    }

    /// Routing and PCM setup for a stream leaving standby. Caller
    /// holds the outputs-list lock and the stream lock.
    fn start_locked(&self, st: &mut OutState) -> Result<()> {
        let inner = &self.inner;
        let topology = inner.rescan_cards();
        let mode = inner.mode();

        log::debug!(
            "start output stream {} (mode={mode:?} devices={:?})",
            self.id,
            st.devices
        );

        // Program the output route on the codec card, then re-arm the
        // mic path: route programming on the shared codec can knock
        // out a live capture route.
        let route = routing::route_for_mode(routing::output_route_for(st.devices), mode);
        if let Some(speaker) = topology.output(OutputRole::Speaker)
            && let Err(e) = inner.routes.open_route(speaker.card, route)
        {
            log::warn!("output route open failed on card {}: {e}", speaker.card);
        }
        inner.rearm_mic_route(&topology);

        if st.devices.contains(OutputDevices::HDMI) {
            match inner.owner(OutputRole::Hdmi) {
                Some(owner) if owner != self.id => {
                    // Direct stream holds HDMI; fall back to speaker.
                    log::debug!("hdmi held by stream {owner}, rerouting to speaker");
                    st.devices |= OutputDevices::SPEAKER;
                }
                _ => {
                    if let Some(address) = topology.output(OutputRole::Hdmi) {
                        let endpoint = PcmEndpoint::open(
                            inner.pcm.as_ref(),
                            address.card,
                            address.device,
                            Direction::Playback,
                            self.pcm_config(),
                        )?;
                        st.pcm.insert(OutputRole::Hdmi, endpoint);
                        if self.config.direct {
                            inner.try_claim(OutputRole::Hdmi, self.id);
                        }
                    }
                }
            }
        }

        if st.devices.wants_speaker_card()
            && let Some(address) = topology.output(OutputRole::Speaker)
        {
            let endpoint = PcmEndpoint::open(
                inner.pcm.as_ref(),
                address.card,
                address.device,
                Direction::Playback,
                self.pcm_config(),
            )?;
            st.pcm.insert(OutputRole::Speaker, endpoint);
        }

        if st.devices.contains(OutputDevices::SPDIF) {
            match inner.owner(OutputRole::Spdif) {
                Some(owner) if owner != self.id => {
                    log::debug!("spdif held by stream {owner}, skipping");
                }
                _ => {
                    if let Some(address) = topology.output(OutputRole::Spdif) {
                        let endpoint = PcmEndpoint::open(
                            inner.pcm.as_ref(),
                            address.card,
                            address.device,
                            Direction::Playback,
                            self.pcm_config(),
                        )?;
                        st.pcm.insert(OutputRole::Spdif, endpoint);
                        if self.config.direct {
                            inner.try_claim(OutputRole::Spdif, self.id);
                        }
                    }
                }
            }
        }

        self.open_modem_sink(st, &topology, mode);

        st.dump = self.make_dump();
        inner.record_active_out(self.id, st.devices);
        Ok(())
    }

    /// Opens the telephony sink when appropriate. During a call the
    /// modem is duplicated onto any stream that asks for it (first
    /// one wins the ownership race); plain SCO routing reuses the same
    /// card without the voice-call gating.
    fn open_modem_sink(&self, st: &mut OutState, topology: &axon_alsa::CardTopology, mode: AudioMode) {
        let inner = &self.inner;
        let Some(address) = topology.output(OutputRole::Modem) else {
            return;
        };

        let voice_modem = topology.modem_is_voice();
        let in_call = mode == AudioMode::InCall || mode == AudioMode::InCommunication;
        let wants = st.devices.wants_modem_card() || (voice_modem && in_call);
        if !wants || st.pcm.contains_key(&OutputRole::Modem) {
            return;
        }
        // The modem PCM only accepts its strict configuration, and only
        // makes sense once the call is up.
        if voice_modem && !in_call {
            return;
        }

        if !inner.try_claim(OutputRole::Modem, self.id) {
            log::debug!(
                "modem sink owned by stream {:?}, skipping",
                inner.owner(OutputRole::Modem)
            );
            return;
        }

        let config = if voice_modem {
            PcmConfig::modem_playback()
        } else {
            PcmConfig::sco()
        };
        match PcmEndpoint::open(
            inner.pcm.as_ref(),
            address.card,
            address.device,
            Direction::Playback,
            config,
        ) {
            Ok(mut endpoint) => {
                // Boot sequence: prepare now, start on first write (or
                // on the first write error, inside the endpoint).
                if let Err(e) = endpoint.prepare() {
                    log::error!("modem pcm prepare failed: {e}");
                    endpoint.close();
                    inner.release_owner(OutputRole::Modem, self.id);
                    return;
                }
                log::info!(
                    "modem sink opened (card={} stream={})",
                    address.card,
                    self.id
                );
                st.pcm.insert(OutputRole::Modem, endpoint);
            }
            Err(e) => {
                log::error!("modem pcm open failed: {e}");
                inner.release_owner(OutputRole::Modem, self.id);
            }
        }
    }

    fn make_dump(&self) -> Option<PcmDumper> {
        let diag = self.inner.diagnostics();
        if diag.dump_out_bytes == 0 {
            return None;
        }
        let path = self
            .inner
            .config
            .dump_dir
            .join(format!("out_{}.pcm", self.id));
        PcmDumper::create(&path, diag.dump_out_bytes)
    }

    /// Puts the stream into standby: closes every PCM handle, frees
    /// the downlink accumulator (the resampler phase is kept), drops
    /// exclusive-sink ownership, and re-programs routes for whatever
    /// other streams remain active.
    pub fn standby(&self) {
        let _outputs = self.inner.outputs.lock().unwrap();
        let mut st = self.state.lock().unwrap();
        self.standby_locked(&mut st);
    }

    pub(crate) fn standby_locked(&self, st: &mut OutState) {
        if st.standby {
            return;
        }
        for endpoint in st.pcm.values_mut() {
            endpoint.stop();
            endpoint.close();
        }
        st.pcm.clear();
        if let Some(downlink) = st.downlink.as_mut() {
            downlink.reset_accumulator();
        }
        st.standby = true;
        st.dump = None;

        for role in [OutputRole::Hdmi, OutputRole::Spdif, OutputRole::Modem] {
            self.inner.release_owner(role, self.id);
        }

        let remaining = self.inner.clear_active_out(self.id);
        self.inner.routes.close_route(axon_alsa::RouteId::PlaybackOff);
        if !remaining.is_empty() {
            let mode = self.inner.mode();
            let route = routing::route_for_mode(routing::output_route_for(remaining), mode);
            let topology = self.inner.state.lock().unwrap().topology.clone();
            if let Some(speaker) = topology.output(OutputRole::Speaker)
                && let Err(e) = self.inner.routes.open_route(speaker.card, route)
            {
                log::warn!("route reprogram after standby failed: {e}");
            }
            self.inner.rearm_mic_route(&topology);
        }
    }

    /// Per-stream key-value parameters; `routing` redirects the stream
    /// to a new device mask through a standby cycle.
    pub fn set_parameters(&self, kvpairs: &str) -> Result<()> {
        let parsed = Params::parse(kvpairs);
        if let Some(mask) = parsed.get_u32(params::KEY_ROUTING) {
            let devices = OutputDevices::from_bits_truncate(mask);
            let _outputs = self.inner.outputs.lock().unwrap();
            let mut st = self.state.lock().unwrap();
            if devices != st.devices {
                self.standby_locked(&mut st);
                st.devices = devices;
            }
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
            reply.set(params::KEY_SUP_CHANNELS, "AUDIO_CHANNEL_OUT_STEREO");
        }
        if query.has(params::KEY_SUP_FORMATS) {
            reply.set(params::KEY_SUP_FORMATS, "AUDIO_FORMAT_PCM_16_BIT");
        }
        reply.to_string()
    }

    /// Current usecase tag of this stream.
    pub fn usecase(&self) -> (UsecaseId, UsecaseKind) {
        self.state.lock().unwrap().usecase
    }

    /// Whether the stream is in standby.
    pub fn is_standby(&self) -> bool {
        self.state.lock().unwrap().standby
    }

    /// Whether this stream currently holds an open PCM for `role`.
    pub fn has_sink(&self, role: OutputRole) -> bool {
        self.state.lock().unwrap().pcm.contains_key(&role)
    }

    /// Human-readable stream dump.
    pub fn dump(&self) -> String {
        let st = self.state.lock().unwrap();
        format!(
            "stream {}: devices={:?} rate={} channels={} standby={} written={}\n",
            self.id,
            st.devices,
            self.config.rate,
            self.config.channels,
            st.standby,
            st.written_frames
        )
    }

    fn pcm_config(&self) -> PcmConfig {
        PcmConfig {
            rate: self.config.rate,
            channels: self.config.channels,
            period_size: self.config.period_size,
            period_count: self.config.period_count,
            format: self.config.format,
        }
    }
}
