//! The voice capture worker.
//!
//! A dedicated thread that pumps the microphone while a call is
//! active: read one period, downmix and resample to 8 kHz mono, push
//! into the uplink ring. The thread owns its PCM handle; it is the
//! only code that touches the handle after start, and it closes the
//! handle on the way out so teardown can simply join.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use axon_alsa::mixer::MIC_CAPTURE_SETTINGS;
use axon_alsa::{CardAddress, Direction, InputRole, PcmConfig, PcmEndpoint, PcmIoError, RouteId};
use axon_core::{CancelToken, VoiceResampler};

use crate::device::DeviceInner;
use crate::error::{HalError, Result};
use crate::uplink::bytes_to_samples;

/// Fallback microphone card used when topology detection comes up
/// empty on platforms whose codec registers late.
const FALLBACK_MIC: CardAddress = CardAddress { card: 2, device: 0 };

/// Pause after an unrecoverable read error before retrying.
const READ_RETRY_DELAY: Duration = Duration::from_millis(20);

pub(crate) struct WorkerHandle {
    cancel: CancelToken,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Cancels the worker and joins it.
    pub(crate) fn stop(self) {
        self.cancel.cancel();
        if self.thread.join().is_err() {
            log::error!("voice capture worker panicked");
        }
    }
}

/// Arms the microphone and starts the capture thread.
pub(crate) fn start_worker(inner: &Arc<DeviceInner>) -> Result<WorkerHandle> {
    let voice = &inner.voice;
    let topology = inner.rescan_cards();

    let mic = topology.input(InputRole::Mic).unwrap_or_else(|| {
        log::warn!(
            "voice: microphone card unknown, forcing card {} device {}",
            FALLBACK_MIC.card,
            FALLBACK_MIC.device
        );
        FALLBACK_MIC
    });

    if !voice.mic_route_active.load(Ordering::SeqCst) {
        if let Err(e) = inner.routes.open_route(mic.card, RouteId::MainMicCapture) {
            log::warn!("voice: mic route open failed on card {}: {e}", mic.card);
        }
        voice.mic_route_active.store(true, Ordering::SeqCst);
    }
    configure_mic_controls(inner, mic.card);

    let config = PcmConfig::voice_mic();
    let endpoint = open_mic_endpoint(inner, mic, config);
    let Some(mut endpoint) = endpoint else {
        inner.routes.close_route(RouteId::CaptureOff);
        voice.mic_route_active.store(false, Ordering::SeqCst);
        return Err(HalError::NotFound("microphone pcm"));
    };

    if let Err(e) = endpoint.prepare().and_then(|_| endpoint.start()) {
        log::error!("voice: mic pcm prepare/start failed: {e}");
        endpoint.close();
        inner.routes.close_route(RouteId::CaptureOff);
        voice.mic_route_active.store(false, Ordering::SeqCst);
        return Err(HalError::Io(e));
    }

    log::info!(
        "voice: capture started (card={} device={} rate={} channels={})",
        endpoint.card(),
        endpoint.device(),
        config.rate,
        config.channels
    );

    let cancel = CancelToken::new();
    let ring = voice.ensure_ring();
    let stats = Arc::clone(&voice.stats);
    let pcm_open = Arc::clone(&voice.capture_pcm_open);
    let pushed = Arc::clone(&voice.pushed_samples);
    let debug = inner.diagnostics().debug_audio;
    pcm_open.store(true, Ordering::SeqCst);

    let worker_cancel = cancel.clone();
    let thread = thread::Builder::new()
        .name("voice-capture".into())
        .spawn(move || {
            capture_loop(&mut endpoint, &ring, &stats, &pushed, &worker_cancel, debug);
            endpoint.stop();
            endpoint.close();
            pcm_open.store(false, Ordering::SeqCst);
        })
        .map_err(|e| {
            voice.capture_pcm_open.store(false, Ordering::SeqCst);
            HalError::System(e)
        })?;

    Ok(WorkerHandle { cancel, thread })
}

/// Opens the mic PCM, walking the device candidates when the primary
/// device refuses.
fn open_mic_endpoint(
    inner: &Arc<DeviceInner>,
    mic: CardAddress,
    config: PcmConfig,
) -> Option<PcmEndpoint> {
    let mut tried = Vec::new();
    for device in [mic.device, 0, 1] {
        if tried.contains(&device) {
            continue;
        }
        tried.push(device);
        match PcmEndpoint::open(
            inner.pcm.as_ref(),
            mic.card,
            device,
            Direction::Capture,
            config,
        ) {
            Ok(endpoint) => return Some(endpoint),
            Err(e) => {
                log::warn!(
                    "voice: mic pcm open failed (card={} device={device}): {e}",
                    mic.card
                );
            }
        }
    }
    None
}

/// Programs the mic capture controls once per card.
fn configure_mic_controls(inner: &Arc<DeviceInner>, card: u32) {
    let mut cache = inner.voice.mixer_card.lock().unwrap();
    if *cache == Some(card) {
        return;
    }
    match inner.routes.program_mixer(card, MIC_CAPTURE_SETTINGS) {
        Ok(changed) => {
            log::info!("voice: mic mixer programmed on card {card} ({changed} writes)");
            *cache = Some(card);
        }
        Err(e) => {
            log::error!("voice: mic mixer programming failed on card {card}: {e}");
            return;
        }
    }
    drop(cache);

    if inner.diagnostics().debug_audio
        && let Ok(mismatched) = inner.routes.verify_mixer(card, MIC_CAPTURE_SETTINGS)
        && !mismatched.is_empty()
    {
        log::warn!("voice: mic mixer verify mismatches: {mismatched:?}");
    }
}

fn capture_loop(
    endpoint: &mut PcmEndpoint,
    ring: &axon_core::VoiceRing,
    stats: &std::sync::Mutex<axon_core::CaptureStats>,
    pushed: &std::sync::atomic::AtomicUsize,
    cancel: &CancelToken,
    debug: bool,
) {
    let config = *endpoint.config();
    let mut raw = vec![0u8; config.period_bytes()];
    let mut samples = Vec::with_capacity(config.period_size * config.channels as usize);
    let mut resampler = VoiceResampler::new();
    let mut silent_run = 0u32;

    while !cancel.is_cancelled() {
        match endpoint.read_period(&mut raw) {
            Ok(_) => {}
            Err(PcmIoError::XRun) => {
                // read_period already prepared and retried once; go
                // around and read again.
                continue;
            }
            Err(PcmIoError::Busy) => {
                log::error!("voice capture: mic pcm busy, stopping worker loop");
                break;
            }
            Err(e) => {
                log::warn!("voice capture: read failed: {e}");
                thread::sleep(READ_RETRY_DELAY);
                continue;
            }
        }

        bytes_to_samples(&raw, &mut samples);
        let all_zero = stats.lock().unwrap().record(&samples);
        if all_zero {
            silent_run += 1;
            if silent_run % 16 == 0 {
                log::warn!(
                    "voice capture: {silent_run} consecutive silent periods \
                     (rate={} channels={})",
                    config.rate,
                    config.channels
                );
            }
        } else {
            silent_run = 0;
        }

        let converted = resampler.process(&samples, config.channels, config.rate);
        ring.push(converted);
        pushed.fetch_add(converted.len(), Ordering::SeqCst);
        if debug && !all_zero {
            log::trace!("voice capture: pushed {} samples", converted.len());
        }
    }
}
