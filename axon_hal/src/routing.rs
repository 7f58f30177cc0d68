//! Device-mask to mixer-route mapping.

use axon_alsa::RouteId;

use crate::device::AudioMode;
use crate::devices::{InputDevices, OutputDevices};

/// Route for an output device selection in normal mode.
pub fn output_route_for(devices: OutputDevices) -> RouteId {
    if devices.contains(OutputDevices::SPEAKER | OutputDevices::WIRED_HEADPHONE)
        || devices.contains(OutputDevices::SPEAKER | OutputDevices::WIRED_HEADSET)
    {
        return RouteId::SpeakerHeadphoneNormal;
    }
    if devices.contains(OutputDevices::SPEAKER) {
        RouteId::SpeakerNormal
    } else if devices.contains(OutputDevices::WIRED_HEADSET) {
        RouteId::HeadsetNormal
    } else if devices.contains(OutputDevices::WIRED_HEADPHONE) {
        RouteId::HeadphoneNormal
    } else if devices.contains(OutputDevices::BLUETOOTH_SCO) {
        RouteId::BluetoothNormal
    } else if devices.contains(OutputDevices::HDMI) {
        RouteId::HdmiNormal
    } else {
        RouteId::PlaybackOff
    }
}

/// Route for an input device selection.
pub fn input_route_for(devices: InputDevices) -> RouteId {
    if devices.contains(InputDevices::TELEPHONY_RX) {
        // Far-end voice rides the modem card, but the near-end mic path
        // must stay armed.
        return RouteId::MainMicCapture;
    }
    if devices.contains(InputDevices::BUILTIN_MIC) {
        RouteId::MainMicCapture
    } else if devices.contains(InputDevices::WIRED_HEADSET) {
        RouteId::HandsFreeMicCapture
    } else if devices.contains(InputDevices::BLUETOOTH_SCO) {
        RouteId::BluetoothScoMicCapture
    } else if devices.contains(InputDevices::USB) {
        RouteId::UsbCapture
    } else if devices.contains(InputDevices::HDMI) {
        RouteId::HdmiInCapture
    } else {
        RouteId::CaptureOff
    }
}

/// Applies the in-call remap to a normal-mode output route.
pub fn route_for_mode(route: RouteId, mode: AudioMode) -> RouteId {
    if mode.is_call() {
        route.incall_variant()
    } else {
        route
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_mapping() {
        assert_eq!(
            output_route_for(OutputDevices::SPEAKER),
            RouteId::SpeakerNormal
        );
        assert_eq!(
            output_route_for(OutputDevices::SPEAKER | OutputDevices::WIRED_HEADPHONE),
            RouteId::SpeakerHeadphoneNormal
        );
        assert_eq!(output_route_for(OutputDevices::HDMI), RouteId::HdmiNormal);
        assert_eq!(output_route_for(OutputDevices::empty()), RouteId::PlaybackOff);
    }

    #[test]
    fn test_input_mapping() {
        assert_eq!(
            input_route_for(InputDevices::BUILTIN_MIC),
            RouteId::MainMicCapture
        );
        assert_eq!(
            input_route_for(InputDevices::TELEPHONY_RX),
            RouteId::MainMicCapture
        );
        assert_eq!(input_route_for(InputDevices::HDMI), RouteId::HdmiInCapture);
        assert_eq!(input_route_for(InputDevices::empty()), RouteId::CaptureOff);
    }

    #[test]
    fn test_incall_remap() {
        assert_eq!(
            route_for_mode(RouteId::SpeakerNormal, AudioMode::InCall),
            RouteId::SpeakerIncall
        );
        assert_eq!(
            route_for_mode(RouteId::SpeakerNormal, AudioMode::Normal),
            RouteId::SpeakerNormal
        );
        assert_eq!(
            route_for_mode(RouteId::HdmiNormal, AudioMode::InCommunication),
            RouteId::HdmiNormal
        );
    }
}
