//! The HAL device: top-level state, mode transitions, stream factory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axon_alsa::{
    CardAddress, CardScanner, CardTopology, InputRole, MixerBackend, OutputRole, PcmBackend,
    RouteController, RouteId, SampleFormat,
};
use axon_core::Diagnostics;

use crate::devices::{InputDevices, OutputDevices};
use crate::error::{HalError, Result};
use crate::modem::{DEFAULT_MODEM_TTY, ModemControl};
use crate::params::{self, Params};
use crate::stream_in::{InputSource, InputStream};
use crate::stream_out::OutputStream;
use crate::usecase::{Usecase, UsecaseId};
use crate::voice::{self, VoicePipeline};

/// Framework audio session type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioMode {
    #[default]
    Normal,
    InCall,
    InCommunication,
}

impl AudioMode {
    /// Whether this mode runs the voice pipeline.
    pub fn is_call(self) -> bool {
        matches!(self, AudioMode::InCall | AudioMode::InCommunication)
    }
}

/// Format requested when opening a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub rate: u32,
    pub channels: u32,
    pub format: SampleFormat,
    pub period_size: usize,
    pub period_count: u32,
    /// Exclusive (direct) output: the stream owns its sinks and no
    /// other stream may write them while it is open.
    pub direct: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            rate: 44_100,
            channels: 2,
            format: SampleFormat::S16Le,
            period_size: 512,
            period_count: 3,
            direct: false,
        }
    }
}

impl StreamConfig {
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    pub fn buffer_bytes(&self) -> usize {
        self.period_size * self.frame_bytes()
    }
}

/// Platform wiring of a device instance. Defaults address real
/// hardware; tests point everything at temporary files.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Root of the ALSA proc topology.
    pub proc_root: PathBuf,
    /// Modem control TTY.
    pub modem_tty: PathBuf,
    /// Directory receiving raw PCM dumps when enabled.
    pub dump_dir: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc/asound"),
            modem_tty: PathBuf::from(DEFAULT_MODEM_TTY),
            dump_dir: PathBuf::from("/data"),
        }
    }
}

/// Microphone descriptor reported to the framework.
#[derive(Debug, Clone)]
pub struct MicrophoneInfo {
    pub device_id: String,
    pub address: Option<CardAddress>,
}

pub(crate) struct DeviceState {
    pub(crate) mode: AudioMode,
    pub(crate) mic_mute: bool,
    pub(crate) screen_off: bool,
    pub(crate) topology: CardTopology,
    /// Exclusive-sink ownership, keyed by stream id.
    pub(crate) owners: HashMap<OutputRole, u64>,
    pub(crate) usecases: Vec<Usecase>,
    /// Device masks of started (non-standby) playback streams.
    pub(crate) active_out: HashMap<u64, OutputDevices>,
}

impl DeviceState {
    pub(crate) fn voice_call_active(&self) -> bool {
        self.usecases
            .iter()
            .any(|usecase| usecase.id == UsecaseId::SimcomVoiceCall)
    }
}

pub(crate) struct DeviceInner {
    pub(crate) config: DeviceConfig,
    pub(crate) pcm: Arc<dyn PcmBackend>,
    pub(crate) routes: Arc<RouteController>,
    pub(crate) scanner: CardScanner,
    pub(crate) modem: ModemControl,
    pub(crate) voice: VoicePipeline,
    pub(crate) state: Mutex<DeviceState>,
    pub(crate) outputs: Mutex<Vec<Arc<OutputStream>>>,
    pub(crate) diag: Mutex<Diagnostics>,
    next_stream_id: AtomicU64,
}

impl DeviceInner {
    pub(crate) fn alloc_stream_id(&self) -> u64 {
        self.next_stream_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn mode(&self) -> AudioMode {
        self.state.lock().unwrap().mode
    }

    pub(crate) fn diagnostics(&self) -> Diagnostics {
        self.diag.lock().unwrap().clone()
    }

    /// Re-reads the card topology and caches it on the device.
    pub(crate) fn rescan_cards(&self) -> CardTopology {
        let topology = self.scanner.scan();
        self.state.lock().unwrap().topology = topology.clone();
        topology
    }

    pub(crate) fn owner(&self, role: OutputRole) -> Option<u64> {
        self.state.lock().unwrap().owners.get(&role).copied()
    }

    /// Claims `role` for `stream` unless another stream holds it.
    /// Returns whether the caller owns the sink afterwards.
    pub(crate) fn try_claim(&self, role: OutputRole, stream: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.owners.get(&role) {
            None => {
                state.owners.insert(role, stream);
                true
            }
            Some(&owner) => owner == stream,
        }
    }

    pub(crate) fn owns(&self, role: OutputRole, stream: u64) -> bool {
        self.owner(role) == Some(stream)
    }

    /// Releases `role` if `stream` holds it. Ownership never transfers
    /// implicitly; the sink stays free until another stream starts.
    pub(crate) fn release_owner(&self, role: OutputRole, stream: u64) {
        let mut state = self.state.lock().unwrap();
        if state.owners.get(&role) == Some(&stream) {
            state.owners.remove(&role);
        }
    }

    pub(crate) fn record_active_out(&self, stream: u64, devices: OutputDevices) {
        self.state.lock().unwrap().active_out.insert(stream, devices);
    }

    pub(crate) fn clear_active_out(&self, stream: u64) -> OutputDevices {
        let mut state = self.state.lock().unwrap();
        state.active_out.remove(&stream);
        state
            .active_out
            .values()
            .fold(OutputDevices::empty(), |acc, &d| acc | d)
    }

    /// Post-condition of every output-route open: opening or closing
    /// output routes must not leave the mic path disarmed while a
    /// capture pipeline is live. Re-issues the mic capture route if
    /// the voice pipeline, the capture worker, the capture PCM or the
    /// route bookkeeping says capture is (or should be) up.
    pub(crate) fn rearm_mic_route(&self, topology: &CardTopology) {
        let Some(mic) = topology.input(InputRole::Mic) else {
            return;
        };
        let voice = &self.voice;
        let should_rearm = voice.is_active()
            || voice.worker_running()
            || voice.capture_pcm_open.load(Ordering::SeqCst)
            || voice.mic_route_active.load(Ordering::SeqCst);
        if !should_rearm {
            return;
        }
        log::debug!("re-arming mic capture route after output route churn");
        if let Err(e) = self.routes.open_route(mic.card, RouteId::MainMicCapture) {
            log::warn!("mic route re-arm failed on card {}: {e}", mic.card);
        }
        voice.mic_route_active.store(true, Ordering::SeqCst);
    }
}

/// One opened HAL instance.
///
/// Constructed with injected hardware backends, in the same spirit as
/// a player taking a custom output backend; the `alsa-backend` feature
/// adds [`Device::open_default`] for real hardware.
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Opens the device with the given backends.
    pub fn open(
        config: DeviceConfig,
        pcm: Arc<dyn PcmBackend>,
        mixer: Arc<dyn MixerBackend>,
    ) -> Self {
        let scanner = CardScanner::new(&config.proc_root);
        let modem = ModemControl::new(&config.modem_tty);
        let topology = scanner.scan();
        let inner = Arc::new(DeviceInner {
            pcm,
            routes: Arc::new(RouteController::new(mixer)),
            scanner,
            modem,
            voice: VoicePipeline::new(),
            state: Mutex::new(DeviceState {
                mode: AudioMode::Normal,
                mic_mute: false,
                screen_off: false,
                topology,
                owners: HashMap::new(),
                usecases: Vec::new(),
                active_out: HashMap::new(),
            }),
            outputs: Mutex::new(Vec::new()),
            diag: Mutex::new(Diagnostics::from_env()),
            next_stream_id: AtomicU64::new(1),
            config,
        });
        Self { inner }
    }

    /// Opens the device against real hardware through alsa-lib.
    #[cfg(feature = "alsa-backend")]
    pub fn open_default(config: DeviceConfig) -> Self {
        use axon_alsa::backends::{AlsaMixerBackend, AlsaPcmBackend};
        Self::open(
            config,
            Arc::new(AlsaPcmBackend),
            Arc::new(AlsaMixerBackend),
        )
    }

    /// Post-open health check.
    pub fn init_check(&self) -> Result<()> {
        Ok(())
    }

    /// Applies an audio-mode transition, driving the voice-call
    /// pipeline. Transitions that would tear down a pipeline still
    /// settling are ignored; the framework retries once call teardown
    /// actually happens.
    pub fn set_mode(&self, mode: AudioMode) {
        let current = self.inner.mode();
        log::info!("set_mode: {current:?} -> {mode:?}");

        if mode.is_call() && !current.is_call() {
            if let Err(e) = voice::activate(&self.inner) {
                log::error!("set_mode: voice activation failed: {e}");
            }
            self.inner.state.lock().unwrap().mode = mode;
        } else if !mode.is_call() && current.is_call() {
            match voice::deactivate(&self.inner) {
                voice::Deactivation::Ignored => {
                    log::warn!("set_mode: dropping {mode:?} while voice pipeline settling");
                }
                voice::Deactivation::Done | voice::Deactivation::Nothing => {
                    self.inner.state.lock().unwrap().mode = mode;
                }
            }
        } else {
            self.inner.state.lock().unwrap().mode = mode;
        }
    }

    pub fn mode(&self) -> AudioMode {
        self.inner.mode()
    }

    /// In-call voice volume, clamped to the unit range and programmed
    /// on the speaker codec.
    pub fn set_voice_volume(&self, volume: f32) -> Result<()> {
        let state = self.inner.state.lock().unwrap();
        if state.mode != AudioMode::InCall {
            return Ok(());
        }
        let Some(speaker) = state.topology.output(OutputRole::Speaker) else {
            return Err(HalError::NotFound("speaker card"));
        };
        drop(state);
        self.inner.routes.set_voice_volume(speaker.card, volume)?;
        Ok(())
    }

    pub fn set_mic_mute(&self, muted: bool) {
        self.inner.state.lock().unwrap().mic_mute = muted;
    }

    pub fn mic_mute(&self) -> bool {
        self.inner.state.lock().unwrap().mic_mute
    }

    /// Device-level key-value parameters.
    pub fn set_parameters(&self, kvpairs: &str) -> Result<()> {
        let parsed = Params::parse(kvpairs);

        if let Some(value) = parsed.get(params::KEY_SCREEN_STATE) {
            self.inner.state.lock().unwrap().screen_off = value == "off";
        }

        if let Some(device) = parsed.get_u32(params::KEY_CONNECT) {
            // HDMI reconnect hint: force affected streams through a
            // standby cycle so the next write reopens the sink.
            if OutputDevices::from_bits_truncate(device).contains(OutputDevices::HDMI) {
                log::info!("hdmi reconnect hint, cycling hdmi streams");
                let outputs = self.inner.outputs.lock().unwrap().clone();
                for stream in outputs {
                    if stream.devices().contains(OutputDevices::HDMI) {
                        stream.standby();
                    }
                }
            }
        }

        // Dump/debug switches may have changed under us.
        *self.inner.diag.lock().unwrap() = Diagnostics::from_env();
        Ok(())
    }

    /// Device-level parameter queries.
    pub fn get_parameters(&self, keys: &str) -> String {
        let query = Params::parse(keys);
        let mut reply = Params::new();
        if query.has(params::KEY_EC_SUPPORTED) {
            reply.set(params::KEY_EC_SUPPORTED, "yes");
        }
        if query.has(params::KEY_SUP_BITSTREAM_FORMATS) {
            // Bitstream format discovery needs the HDMI EDID parser,
            // which lives outside this layer.
            reply.set(params::KEY_SUP_BITSTREAM_FORMATS, "");
        }
        reply.to_string()
    }

    /// Size of the capture buffer the framework should allocate for a
    /// stream of this configuration: the hardware period scaled to the
    /// requested rate, aligned down to 16 frames.
    pub fn input_buffer_size(&self, config: &StreamConfig) -> usize {
        let base = axon_alsa::PcmConfig::default_capture();
        let frames = (base.period_size * config.rate as usize) / base.rate as usize;
        let frames = frames & !15;
        frames.max(16) * config.frame_bytes()
    }

    /// Opens a playback stream routed at `devices`.
    pub fn open_output_stream(
        &self,
        devices: OutputDevices,
        config: StreamConfig,
    ) -> Result<Arc<OutputStream>> {
        if config.channels == 0 || config.rate == 0 {
            return Err(HalError::Misconfiguration("zero rate or channel count"));
        }
        let stream = Arc::new(OutputStream::new(Arc::clone(&self.inner), devices, config));
        self.inner.outputs.lock().unwrap().push(Arc::clone(&stream));
        Ok(stream)
    }

    /// Closes a playback stream: standby, release ownership, unlist.
    pub fn close_output_stream(&self, stream: &Arc<OutputStream>) {
        stream.standby();
        self.inner.clear_active_out(stream.id());
        let mut outputs = self.inner.outputs.lock().unwrap();
        outputs.retain(|existing| existing.id() != stream.id());
    }

    /// Opens a capture stream. Only stereo capture is accepted;
    /// telephony downlink streams additionally tap into the voice
    /// pipeline.
    pub fn open_input_stream(
        &self,
        devices: InputDevices,
        config: StreamConfig,
        source: InputSource,
    ) -> Result<Arc<InputStream>> {
        if config.channels != 2 {
            return Err(HalError::Misconfiguration("capture must be stereo"));
        }
        let stream = Arc::new(InputStream::new(
            Arc::clone(&self.inner),
            devices,
            config,
            source,
        ));
        self.inner
            .state
            .lock()
            .unwrap()
            .usecases
            .push(Usecase {
                id: UsecaseId::PrimaryCapture,
                kind: crate::usecase::UsecaseKind::PcmCapture,
                devices: OutputDevices::empty(),
            });
        Ok(stream)
    }

    pub fn close_input_stream(&self, stream: &Arc<InputStream>) {
        stream.standby();
        let mut state = self.inner.state.lock().unwrap();
        if let Some(pos) = state
            .usecases
            .iter()
            .position(|usecase| usecase.id == UsecaseId::PrimaryCapture)
        {
            state.usecases.remove(pos);
        }
    }

    /// Microphones known to the device.
    pub fn microphones(&self) -> Vec<MicrophoneInfo> {
        let state = self.inner.state.lock().unwrap();
        vec![MicrophoneInfo {
            device_id: "builtin-mic".to_string(),
            address: state.topology.input(InputRole::Mic),
        }]
    }

    /// Whether a voice call usecase is registered.
    pub fn voice_call_active(&self) -> bool {
        self.inner.state.lock().unwrap().voice_call_active()
    }

    /// Stream currently holding an exclusive sink, if any.
    pub fn exclusive_owner(&self, role: OutputRole) -> Option<u64> {
        self.inner.owner(role)
    }

    /// Active usecases, for introspection.
    pub fn usecases(&self) -> Vec<Usecase> {
        self.inner.state.lock().unwrap().usecases.clone()
    }

    /// Human-readable state dump.
    pub fn dump(&self) -> String {
        let state = self.inner.state.lock().unwrap();
        let mut out = String::new();
        out.push_str(&format!(
            "mode: {:?}\nmic_mute: {}\nscreen_off: {}\n",
            state.mode, state.mic_mute, state.screen_off
        ));
        out.push_str(&format!("usecases: {:?}\n", state.usecases));
        out.push_str(&format!("owners: {:?}\n", state.owners));
        for role in OutputRole::ALL {
            out.push_str(&format!(
                "out {}: {:?}\n",
                role.as_str(),
                state.topology.output(role)
            ));
        }
        for role in InputRole::ALL {
            out.push_str(&format!(
                "in {}: {:?}\n",
                role.as_str(),
                state.topology.input(role)
            ));
        }
        if let Some(ring) = self.inner.voice.ring() {
            let (used, capacity) = ring.occupancy();
            out.push_str(&format!(
                "voice ring: {used}/{capacity} active={}\n",
                ring.is_active()
            ));
        }
        out
    }

    /// Stops the voice pipeline and quiesces every stream. Called
    /// automatically on drop.
    pub fn close(&self) {
        voice::force_teardown(&self.inner);
        let outputs = std::mem::take(&mut *self.inner.outputs.lock().unwrap());
        for stream in outputs {
            stream.standby();
        }
    }

}

impl Drop for Device {
    fn drop(&mut self) {
        self.close();
    }
}
