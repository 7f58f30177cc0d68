//! Shared fixture: a device wired to fake hardware over a synthetic
//! `/proc/asound` tree and a temp-file modem TTY.

// Not every test binary touches every helper.
#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use axon_hal::{Device, DeviceConfig};

use axon_alsa::fake::{FakeBus, FakeMixerBackend, FakePcmBackend};

/// Card indices of the synthetic topology.
pub const MODEM_CARD: u32 = 0;
pub const CODEC_CARD: u32 = 1;

pub struct TestRig {
    pub device: Arc<Device>,
    pub bus: FakeBus,
    pub mixer: Arc<FakeMixerBackend>,
    pub tty: PathBuf,
    _dir: tempfile::TempDir,
}

impl TestRig {
    pub fn tty_contents(&self) -> String {
        fs::read_to_string(&self.tty).unwrap_or_default()
    }

    pub fn clear_tty(&self) {
        fs::write(&self.tty, "").unwrap();
    }
}

fn add_card(root: &std::path::Path, index: u32, id: &str) {
    let card = root.join(format!("card{index}"));
    fs::create_dir_all(&card).unwrap();
    fs::write(card.join("id"), format!("{id}\n")).unwrap();
}

/// Builds a rig with a SIMCOM modem on card 0 and an ES8316 codec
/// (speaker + mic) on card 1. The fake mic replays a 1 kHz-ish tone.
pub fn rig() -> TestRig {
    let dir = tempfile::tempdir().unwrap();
    let proc_root = dir.path().join("asound");
    add_card(&proc_root, MODEM_CARD, "SIMCOMAudio");
    add_card(&proc_root, CODEC_CARD, "rockchipes8316c");

    let tty = dir.path().join("ttyUSB3");
    fs::write(&tty, "").unwrap();

    let pcm = FakePcmBackend::new();
    let bus = pcm.bus();

    // 48 kHz stereo tone for the microphone.
    let tone: Vec<i16> = (0..480)
        .flat_map(|i| {
            let v = (3000.0 * (i as f64 * std::f64::consts::TAU / 48.0).sin()) as i16;
            [v, v]
        })
        .collect();
    bus.set_capture_pattern(CODEC_CARD, 0, tone);

    let mixer = Arc::new(FakeMixerBackend::new());
    mixer.add_control(CODEC_CARD, "IN Capture Volume", 0, 63, 1);
    mixer.add_control(CODEC_CARD, "ADC Capture Volume", 0, 127, 2);
    mixer.add_control(CODEC_CARD, "ADC Capture Switch", 0, 1, 2);
    mixer.add_control(CODEC_CARD, "RECMIXL BST3 Switch", 0, 1, 1);
    mixer.add_control(CODEC_CARD, "RECMIXR BST3 Switch", 0, 1, 1);
    mixer.add_control(CODEC_CARD, "Speaker Playback Volume", 0, 63, 2);

    let config = DeviceConfig {
        proc_root,
        modem_tty: tty.clone(),
        dump_dir: dir.path().to_path_buf(),
    };
    let device = Arc::new(Device::open(
        config,
        Arc::new(pcm),
        mixer.clone() as Arc<dyn axon_alsa::MixerBackend>,
    ));

    TestRig {
        device,
        bus,
        mixer,
        tty,
        _dir: dir,
    }
}
