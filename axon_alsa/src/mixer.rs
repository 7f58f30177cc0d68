//! Mixer control programming.
//!
//! Discrete mixer controls are addressed by name and written to a
//! target value clamped into the control's advertised range. Controls
//! marked optional vary between codec revisions and are skipped
//! silently when absent; missing required controls are warned about
//! but never fail the caller, since a partially wired codec still
//! passes audio.

use crate::error::Result;

/// One control assignment.
#[derive(Debug, Clone, Copy)]
pub struct MixerSetting {
    pub name: &'static str,
    pub value: i64,
    /// Boolean switch rather than a volume.
    pub switch: bool,
    /// Absent on some codec revisions.
    pub optional: bool,
}

const fn volume(name: &'static str, value: i64) -> MixerSetting {
    MixerSetting {
        name,
        value,
        switch: false,
        optional: false,
    }
}

const fn volume_opt(name: &'static str, value: i64) -> MixerSetting {
    MixerSetting {
        name,
        value,
        switch: false,
        optional: true,
    }
}

const fn switch(name: &'static str) -> MixerSetting {
    MixerSetting {
        name,
        value: 1,
        switch: true,
        optional: false,
    }
}

const fn switch_opt(name: &'static str) -> MixerSetting {
    MixerSetting {
        name,
        value: 1,
        switch: true,
        optional: true,
    }
}

/// Capture-side programming for the main microphone path. Applied when
/// the voice pipeline arms the microphone.
pub const MIC_CAPTURE_SETTINGS: &[MixerSetting] = &[
    volume("IN Capture Volume", 40),
    volume("ADC Capture Volume", 55),
    volume_opt("Mono ADC Capture Volume", 55),
    switch("ADC Capture Switch"),
    switch("RECMIXL BST3 Switch"),
    switch("RECMIXR BST3 Switch"),
    volume_opt("MIC1 Boost Capture Volume", 40),
    volume_opt("IN3 Boost", 3),
    switch_opt("Stereo1 ADC MIXL ADC1 Switch"),
    switch_opt("Stereo1 ADC MIXR ADC1 Switch"),
    switch_opt("Stereo2 ADC MIXL ADC1 Switch"),
    switch_opt("Stereo2 ADC MIXR ADC1 Switch"),
];

/// Factory for mixer device handles.
pub trait MixerBackend: Send + Sync {
    fn open(&self, card: u32) -> Result<Box<dyn MixerDevice>>;
}

/// One open mixer.
pub trait MixerDevice {
    fn has_control(&self, name: &str) -> bool;

    /// `(min, max)` of the control, when it advertises a range.
    fn range(&self, name: &str) -> Option<(i64, i64)>;

    /// Number of values (channels) behind the control.
    fn value_count(&self, name: &str) -> usize;

    fn value(&self, name: &str, index: usize) -> Option<i64>;

    /// Returns whether the write was accepted.
    fn set_value(&mut self, name: &str, index: usize, value: i64) -> bool;
}

/// Programs `settings` on an open mixer. Each target is clamped to the
/// control's range and written only where the current value differs.
/// Returns the number of values actually rewritten.
pub fn program_settings(mixer: &mut dyn MixerDevice, settings: &[MixerSetting]) -> usize {
    let mut changed = 0;
    for setting in settings {
        if !mixer.has_control(setting.name) {
            if setting.optional {
                log::debug!("mixer: optional control '{}' missing", setting.name);
            } else {
                log::warn!("mixer: control '{}' not found", setting.name);
            }
            continue;
        }

        let mut target = setting.value;
        if let Some((min, max)) = mixer.range(setting.name)
            && max >= min
        {
            target = target.clamp(min, max);
        }

        for index in 0..mixer.value_count(setting.name) {
            if mixer.value(setting.name, index) == Some(target) {
                continue;
            }
            if mixer.set_value(setting.name, index, target) {
                changed += 1;
            } else {
                log::warn!("mixer: failed to set '{}'[{index}] to {target}", setting.name);
            }
        }
    }
    changed
}

/// Compares every setting against the mixer's current values. Returns
/// the names of controls whose first value differs from the target.
/// Diagnostics only.
pub fn verify_settings<'a>(
    mixer: &dyn MixerDevice,
    settings: &'a [MixerSetting],
) -> Vec<&'a str> {
    let mut mismatched = Vec::new();
    for setting in settings {
        if !mixer.has_control(setting.name) {
            if !setting.optional {
                log::warn!("mixer verify: control '{}' missing", setting.name);
            }
            continue;
        }
        let current = mixer.value(setting.name, 0);
        let mut target = setting.value;
        if let Some((min, max)) = mixer.range(setting.name)
            && max >= min
        {
            target = target.clamp(min, max);
        }
        if current != Some(target) {
            log::info!(
                "mixer verify: {} mismatch (current={current:?} target={target})",
                setting.name
            );
            mismatched.push(setting.name);
        }
    }
    mismatched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeMixerBackend;

    #[test]
    fn test_program_clamps_to_range() {
        let backend = FakeMixerBackend::new();
        backend.add_control(0, "IN Capture Volume", 0, 31, 1);
        let mut mixer = backend.open(0).unwrap();

        let settings = [volume("IN Capture Volume", 40)];
        assert_eq!(program_settings(mixer.as_mut(), &settings), 1);
        assert_eq!(mixer.value("IN Capture Volume", 0), Some(31));
    }

    #[test]
    fn test_program_skips_values_already_set() {
        let backend = FakeMixerBackend::new();
        backend.add_control(0, "ADC Capture Switch", 0, 1, 2);
        let mut mixer = backend.open(0).unwrap();

        let settings = [switch("ADC Capture Switch")];
        assert_eq!(program_settings(mixer.as_mut(), &settings), 2);
        // Second pass finds both values in place.
        assert_eq!(program_settings(mixer.as_mut(), &settings), 0);
    }

    #[test]
    fn test_missing_optional_control_is_silent() {
        let backend = FakeMixerBackend::new();
        let mut mixer = backend.open(0).unwrap();
        let settings = [volume_opt("Mono ADC Capture Volume", 55)];
        assert_eq!(program_settings(mixer.as_mut(), &settings), 0);
    }

    #[test]
    fn test_full_mic_table_against_partial_codec() {
        let backend = FakeMixerBackend::new();
        backend.add_control(0, "IN Capture Volume", 0, 63, 1);
        backend.add_control(0, "ADC Capture Volume", 0, 127, 2);
        backend.add_control(0, "ADC Capture Switch", 0, 1, 2);
        backend.add_control(0, "RECMIXL BST3 Switch", 0, 1, 1);
        backend.add_control(0, "RECMIXR BST3 Switch", 0, 1, 1);
        let mut mixer = backend.open(0).unwrap();

        program_settings(mixer.as_mut(), MIC_CAPTURE_SETTINGS);
        assert_eq!(mixer.value("IN Capture Volume", 0), Some(40));
        assert_eq!(mixer.value("ADC Capture Volume", 0), Some(55));
        assert_eq!(mixer.value("ADC Capture Volume", 1), Some(55));
        assert_eq!(mixer.value("ADC Capture Switch", 0), Some(1));
        assert!(verify_settings(mixer.as_ref(), MIC_CAPTURE_SETTINGS).is_empty());
    }

    #[test]
    fn test_verify_reports_mismatch() {
        let backend = FakeMixerBackend::new();
        backend.add_control(0, "IN Capture Volume", 0, 63, 1);
        let mixer = backend.open(0).unwrap();

        let settings = [volume("IN Capture Volume", 40)];
        let mismatched = verify_settings(mixer.as_ref(), &settings);
        assert_eq!(mismatched, ["IN Capture Volume"]);
    }
}
