//! Diagnostics configuration.
//!
//! The platform exposes a handful of vendor properties that gate
//! verbose voice-path logging and raw PCM dumps. They are evaluated
//! once when the device opens and re-evaluated whenever the framework
//! pushes new parameters, instead of being polled from the hot path.

use std::env;

/// Property enabling verbose voice-path diagnostics.
pub const PROP_DEBUG_AUDIO: &str = "persist.vendor.simcom.debug_audio";
/// Property holding the playback dump budget, in megabytes.
pub const PROP_RECORD_OUT: &str = "vendor.audio.record";
/// Property holding the capture dump budget, in megabytes.
pub const PROP_RECORD_IN: &str = "vendor.audio.recordin";
/// Property pinning the HDMI-in sample rate.
pub const PROP_HDMI_IN_RATE: &str = "vendor.hdmiin.audiorate";

/// HDMI-in sample-rate selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HdmiInRate {
    /// Follow whatever the capture card reports.
    #[default]
    Auto,
    /// Pin the capture stream to a fixed rate.
    Fixed(u32),
}

/// Snapshot of the diagnostic switches.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    /// Verbose voice-path logging.
    pub debug_audio: bool,
    /// Raw playback dump budget in bytes; 0 disables.
    pub dump_out_bytes: usize,
    /// Raw capture dump budget in bytes; 0 disables.
    pub dump_in_bytes: usize,
    pub hdmi_in_rate: HdmiInRate,
}

impl Diagnostics {
    /// Reads the vendor properties from the process environment.
    pub fn from_env() -> Self {
        Self {
            debug_audio: env_bool(PROP_DEBUG_AUDIO),
            dump_out_bytes: env_megabytes(PROP_RECORD_OUT),
            dump_in_bytes: env_megabytes(PROP_RECORD_IN),
            hdmi_in_rate: match env_u32(PROP_HDMI_IN_RATE) {
                Some(rate) if rate > 0 => HdmiInRate::Fixed(rate),
                _ => HdmiInRate::Auto,
            },
        }
    }
}

fn env_bool(name: &str) -> bool {
    matches!(
        env::var(name).ok().as_deref(),
        Some("1") | Some("true") | Some("on")
    )
}

fn env_u32(name: &str) -> Option<u32> {
    env::var(name).ok()?.trim().parse().ok()
}

fn env_megabytes(name: &str) -> usize {
    env_u32(name).map_or(0, |mb| mb as usize * 1024 * 1024)
}
