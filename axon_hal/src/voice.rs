//! Voice-call pipeline coordination.
//!
//! A small state machine driven by audio-mode transitions. Entering a
//! call enables the modem PCM endpoint over AT, waits for it to come
//! up, arms the microphone and starts the capture worker; leaving a
//! call unwinds in the opposite order. Mode transitions that arrive
//! while a transition is still in flight are ignored rather than
//! tearing the pipeline down mid-activation, because the framework is
//! known to flap the mode around call setup.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axon_alsa::RouteId;
use axon_core::constants::{MODEM_PERIOD_SAMPLES, MODEM_SETTLE, VOICE_RING_CAPACITY};
use axon_core::{CaptureStats, VoiceRing};

use crate::capture::{self, WorkerHandle};
use crate::device::DeviceInner;
use crate::error::Result;
use crate::usecase::{Usecase, UsecaseId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VoicePhase {
    Idle,
    Activating,
    Active,
    Deactivating,
}

/// Outcome of a deactivation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deactivation {
    /// Pipeline torn down.
    Done,
    /// A transition is still in flight; the mode change was dropped.
    Ignored,
    /// No pipeline was running.
    Nothing,
}

/// Passive state of the voice pipeline, owned by the device.
pub(crate) struct VoicePipeline {
    phase: Mutex<VoicePhase>,
    /// Allocated lazily on first activation, retained until the device
    /// closes.
    ring: Mutex<Option<Arc<VoiceRing>>>,
    pub(crate) stats: Arc<Mutex<CaptureStats>>,
    worker: Mutex<Option<WorkerHandle>>,
    /// Capture route believed armed on the codec.
    pub(crate) mic_route_active: AtomicBool,
    /// Mic PCM held open by the worker thread.
    pub(crate) capture_pcm_open: Arc<AtomicBool>,
    /// Card whose mic controls were last programmed, so the sequence
    /// is not repeated per activation on the same card.
    pub(crate) mixer_card: Mutex<Option<u32>>,
    /// Uplink samples the worker has pushed since activation. Until a
    /// full modem period has been produced the pipeline counts as
    /// still settling and teardown requests are dropped.
    pub(crate) pushed_samples: Arc<AtomicUsize>,
}

impl VoicePipeline {
    pub(crate) fn new() -> Self {
        Self {
            phase: Mutex::new(VoicePhase::Idle),
            ring: Mutex::new(None),
            stats: Arc::new(Mutex::new(CaptureStats::new())),
            worker: Mutex::new(None),
            mic_route_active: AtomicBool::new(false),
            capture_pcm_open: Arc::new(AtomicBool::new(false)),
            mixer_card: Mutex::new(None),
            pushed_samples: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Whether uplink samples should flow. Authoritative flag lives in
    /// the ring so waiters observe teardown under the ring lock.
    pub(crate) fn is_active(&self) -> bool {
        self.ring
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|ring| ring.is_active())
    }

    pub(crate) fn worker_running(&self) -> bool {
        self.worker.lock().unwrap().is_some()
    }

    pub(crate) fn ring(&self) -> Option<Arc<VoiceRing>> {
        self.ring.lock().unwrap().clone()
    }

    /// Returns the ring, allocating it on first use.
    pub(crate) fn ensure_ring(&self) -> Arc<VoiceRing> {
        let mut slot = self.ring.lock().unwrap();
        slot.get_or_insert_with(|| Arc::new(VoiceRing::new(VOICE_RING_CAPACITY)))
            .clone()
    }

    fn release_ring(&self) {
        *self.ring.lock().unwrap() = None;
    }
}

/// Brings the voice pipeline up. Idempotent: a pipeline that is
/// already active (or still activating) is left alone.
pub(crate) fn activate(inner: &Arc<DeviceInner>) -> Result<()> {
    let voice = &inner.voice;
    {
        let mut phase = voice.phase.lock().unwrap();
        match *phase {
            VoicePhase::Idle => *phase = VoicePhase::Activating,
            VoicePhase::Activating | VoicePhase::Active => {
                log::info!("voice: already active, skipping activation");
                return Ok(());
            }
            VoicePhase::Deactivating => {
                log::warn!("voice: activation requested during teardown, skipping");
                return Ok(());
            }
        }
    }

    log::info!("voice call: begin");
    if !inner.modem.set_pcm_register(true) {
        log::error!("voice: failed to enable modem pcm endpoint");
    }
    // Let the modem's USB audio function enumerate before the first
    // open. Held without any lock.
    std::thread::sleep(MODEM_SETTLE);

    let ring = voice.ensure_ring();
    ring.reset();
    ring.set_active(true);
    voice.stats.lock().unwrap().reset();
    *voice.mixer_card.lock().unwrap() = None;
    voice.pushed_samples.store(0, Ordering::SeqCst);

    match capture::start_worker(inner) {
        Ok(handle) => {
            *voice.worker.lock().unwrap() = Some(handle);
        }
        Err(e) => {
            log::error!("voice: capture path failed to start: {e}");
            ring.set_active(false);
            *voice.phase.lock().unwrap() = VoicePhase::Idle;
            return Err(e);
        }
    }

    {
        let mut state = inner.state.lock().unwrap();
        if !state.voice_call_active() {
            state.usecases.push(Usecase::voice_call());
        }
    }
    *voice.phase.lock().unwrap() = VoicePhase::Active;
    log::info!("voice call: pipeline active");
    Ok(())
}

/// Winds the voice pipeline down. A transition still in flight is
/// reported as [`Deactivation::Ignored`] and left untouched.
pub(crate) fn deactivate(inner: &Arc<DeviceInner>) -> Deactivation {
    let voice = &inner.voice;
    let mut idle = false;
    {
        let mut phase = voice.phase.lock().unwrap();
        match *phase {
            VoicePhase::Active => {
                // The framework flaps the mode around call setup; a
                // pipeline that has not yet delivered one full uplink
                // period is still settling and keeps running.
                if voice.pushed_samples.load(Ordering::SeqCst) < MODEM_PERIOD_SAMPLES {
                    log::warn!(
                        "voice: ignoring mode drop before first uplink period \
                         (worker={} route={} pcm={})",
                        voice.worker_running(),
                        voice.mic_route_active.load(Ordering::SeqCst),
                        voice.capture_pcm_open.load(Ordering::SeqCst),
                    );
                    return Deactivation::Ignored;
                }
                *phase = VoicePhase::Deactivating;
            }
            VoicePhase::Activating | VoicePhase::Deactivating => {
                log::warn!("voice: ignoring mode drop during phase transition");
                return Deactivation::Ignored;
            }
            VoicePhase::Idle => idle = true,
        }
    }
    if idle {
        // Nothing to unwind, but a failed activation may have left the
        // modem endpoint enabled.
        inner.modem.set_pcm_register(false);
        return Deactivation::Nothing;
    }

    teardown(inner);
    *voice.phase.lock().unwrap() = VoicePhase::Idle;
    log::info!("voice call: end");
    Deactivation::Done
}

/// Forced teardown for device close: unwinds from any phase and
/// releases the ring allocation.
pub(crate) fn force_teardown(inner: &Arc<DeviceInner>) {
    let voice = &inner.voice;
    {
        let mut phase = voice.phase.lock().unwrap();
        if *phase == VoicePhase::Idle {
            voice.release_ring();
            return;
        }
        *phase = VoicePhase::Deactivating;
    }
    teardown(inner);
    *voice.phase.lock().unwrap() = VoicePhase::Idle;
    voice.release_ring();
}

fn teardown(inner: &Arc<DeviceInner>) {
    let voice = &inner.voice;

    if !inner.modem.set_pcm_register(false) {
        log::error!("voice: failed to disable modem pcm endpoint");
    }

    // Clear the active flag first: every blocked uplink waiter wakes,
    // re-checks, and abandons its period.
    if let Some(ring) = voice.ring() {
        ring.set_active(false);
        ring.reset();
    }
    voice.stats.lock().unwrap().report_summary("final");

    // The worker joins before anything it uses is released; it closes
    // its own mic PCM on the way out.
    let worker = voice.worker.lock().unwrap().take();
    if let Some(handle) = worker {
        handle.stop();
    }

    if voice.mic_route_active.swap(false, Ordering::SeqCst) {
        inner.routes.close_route(RouteId::CaptureOff);
    }

    let mut state = inner.state.lock().unwrap();
    state
        .usecases
        .retain(|usecase| usecase.id != UsecaseId::SimcomVoiceCall);
}
