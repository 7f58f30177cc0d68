//! Named mixer routes.
//!
//! A route is a preset that wires one signal path inside the codec.
//! Opening a route programs its controls on the target card and records
//! it active; closing is idempotent. The concrete control lists are
//! platform data: the main-mic capture route carries the full codec
//! programming, the remaining routes exist as switching points whose
//! presets live in the board support layer.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::mixer::{self, MIC_CAPTURE_SETTINGS, MixerBackend, MixerSetting};

/// Identifier of a named route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteId {
    SpeakerNormal,
    SpeakerIncall,
    EarpieceNormal,
    EarpieceIncall,
    HeadphoneNormal,
    HeadphoneIncall,
    HeadsetNormal,
    HeadsetIncall,
    SpeakerHeadphoneNormal,
    BluetoothNormal,
    BluetoothIncall,
    HdmiNormal,
    MainMicCapture,
    HandsFreeMicCapture,
    BluetoothScoMicCapture,
    UsbCapture,
    HdmiInCapture,
    PlaybackOff,
    CaptureOff,
}

impl RouteId {
    /// Whether this is a capture-side route.
    pub fn is_capture(self) -> bool {
        matches!(
            self,
            RouteId::MainMicCapture
                | RouteId::HandsFreeMicCapture
                | RouteId::BluetoothScoMicCapture
                | RouteId::UsbCapture
                | RouteId::HdmiInCapture
                | RouteId::CaptureOff
        )
    }

    /// The in-call variant of a normal-mode output route. Routes with
    /// no in-call counterpart map to themselves.
    pub fn incall_variant(self) -> RouteId {
        match self {
            RouteId::SpeakerNormal => RouteId::SpeakerIncall,
            RouteId::EarpieceNormal => RouteId::EarpieceIncall,
            RouteId::HeadphoneNormal => RouteId::HeadphoneIncall,
            RouteId::HeadsetNormal => RouteId::HeadsetIncall,
            RouteId::BluetoothNormal => RouteId::BluetoothIncall,
            RouteId::SpeakerHeadphoneNormal => RouteId::SpeakerIncall,
            other => other,
        }
    }

    /// Control preset behind the route. Only the voice-critical mic
    /// route ships a full preset here.
    fn settings(self) -> &'static [MixerSetting] {
        match self {
            RouteId::MainMicCapture => MIC_CAPTURE_SETTINGS,
            _ => &[],
        }
    }
}

/// Programs and tracks named routes across cards.
pub struct RouteController {
    backend: Arc<dyn MixerBackend>,
    active: Mutex<HashSet<RouteId>>,
}

impl RouteController {
    pub fn new(backend: Arc<dyn MixerBackend>) -> Self {
        Self {
            backend,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Opens `route` on `card`: programs its preset and marks it
    /// active. Reopening an active route reprograms it (the underlying
    /// controls may have been disturbed by another route).
    pub fn open_route(&self, card: u32, route: RouteId) -> Result<()> {
        let settings = route.settings();
        if !settings.is_empty() {
            let mut mixer = self.backend.open(card)?;
            let changed = mixer::program_settings(mixer.as_mut(), settings);
            log::debug!("route {route:?} on card {card}: {changed} controls written");
        }
        self.active.lock().unwrap().insert(route);
        Ok(())
    }

    /// Closes `route`. Idempotent; closing an inactive route is a
    /// no-op. The off-routes clear their whole direction.
    pub fn close_route(&self, route: RouteId) {
        let mut active = self.active.lock().unwrap();
        match route {
            RouteId::PlaybackOff => active.retain(|r| r.is_capture()),
            RouteId::CaptureOff => active.retain(|r| !r.is_capture()),
            _ => {
                active.remove(&route);
            }
        }
    }

    pub fn is_active(&self, route: RouteId) -> bool {
        self.active.lock().unwrap().contains(&route)
    }

    /// Applies `settings` to `card` directly, outside any named route.
    pub fn program_mixer(&self, card: u32, settings: &[MixerSetting]) -> Result<usize> {
        let mut mixer = self.backend.open(card)?;
        Ok(mixer::program_settings(mixer.as_mut(), settings))
    }

    /// Reads back `settings` from `card`; returns mismatching control
    /// names. Diagnostics only.
    pub fn verify_mixer<'a>(
        &self,
        card: u32,
        settings: &'a [MixerSetting],
    ) -> Result<Vec<&'a str>> {
        let mixer = self.backend.open(card)?;
        Ok(mixer::verify_settings(mixer.as_ref(), settings))
    }

    /// Programs the in-call voice volume. `volume` is clamped to the
    /// unit range and scaled into the control's span.
    pub fn set_voice_volume(&self, card: u32, volume: f32) -> Result<()> {
        const CONTROL: &str = "Speaker Playback Volume";
        let volume = volume.clamp(0.0, 1.0);

        let mut mixer = self.backend.open(card)?;
        if !mixer.has_control(CONTROL) {
            log::warn!("voice volume: control '{CONTROL}' missing on card {card}");
            return Ok(());
        }
        let (min, max) = mixer.range(CONTROL).unwrap_or((0, 100));
        let span = (max - min) as f32;
        let target = min + (span * volume + 0.5) as i64;
        for index in 0..mixer.value_count(CONTROL) {
            mixer.set_value(CONTROL, index, target);
        }
        Ok(())
    }
}
