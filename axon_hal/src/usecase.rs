//! Active usecase bookkeeping.
//!
//! Every logical concurrent audio activity on the device is tagged
//! with a usecase record, so "is a voice call running?" is a list scan
//! instead of a walk over stream state.

use crate::devices::OutputDevices;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsecaseId {
    PrimaryPlayback,
    PrimaryCapture,
    SimcomVoiceCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsecaseKind {
    PcmPlayback,
    PcmCapture,
    VoiceCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usecase {
    pub id: UsecaseId,
    pub kind: UsecaseKind,
    pub devices: OutputDevices,
}

impl Usecase {
    pub fn voice_call() -> Self {
        Self {
            id: UsecaseId::SimcomVoiceCall,
            kind: UsecaseKind::VoiceCall,
            devices: OutputDevices::BLUETOOTH_SCO | OutputDevices::TELEPHONY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voice_call_record() {
        let usecase = Usecase::voice_call();
        assert_eq!(usecase.id, UsecaseId::SimcomVoiceCall);
        assert_eq!(usecase.kind, UsecaseKind::VoiceCall);
        assert!(usecase.devices.contains(OutputDevices::TELEPHONY));
    }
}
