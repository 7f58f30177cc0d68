//! Routing device masks.

use bitflags::bitflags;

bitflags! {
    /// Output devices a playback stream may be routed to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OutputDevices: u32 {
        const SPEAKER         = 1 << 0;
        const WIRED_HEADSET   = 1 << 1;
        const WIRED_HEADPHONE = 1 << 2;
        const HDMI            = 1 << 3;
        const SPDIF           = 1 << 4;
        const BLUETOOTH_SCO   = 1 << 5;
        /// Telephony uplink towards the modem.
        const TELEPHONY       = 1 << 6;
    }
}

bitflags! {
    /// Input devices a capture stream may be routed from.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputDevices: u32 {
        const BUILTIN_MIC   = 1 << 0;
        const WIRED_HEADSET = 1 << 1;
        const BLUETOOTH_SCO = 1 << 2;
        const HDMI          = 1 << 3;
        /// Telephony downlink (far-end voice) from the modem.
        const TELEPHONY_RX  = 1 << 4;
        const USB           = 1 << 5;
    }
}

impl OutputDevices {
    /// Devices served by the speaker codec card.
    pub fn wants_speaker_card(self) -> bool {
        self.intersects(
            OutputDevices::SPEAKER | OutputDevices::WIRED_HEADSET | OutputDevices::WIRED_HEADPHONE,
        )
    }

    /// Devices served by the bluetooth/modem card.
    pub fn wants_modem_card(self) -> bool {
        self.intersects(OutputDevices::BLUETOOTH_SCO | OutputDevices::TELEPHONY)
    }
}
