//! Stream dispatcher behaviour: fan-out, ownership arbitration, the
//! downlink accumulator and the framework write contract.

mod common;

use std::thread;
use std::time::Duration;

use axon_alsa::{Direction, OutputRole, PcmIoError};
use axon_hal::{AudioMode, HalError, InputDevices, OutputDevices, StreamConfig};

use common::{CODEC_CARD, MODEM_CARD, rig};

/// Makes voice activation fail so the modem sink runs the downlink
/// accumulator instead of the ring drain.
fn rig_with_dead_mic() -> common::TestRig {
    let rig = rig();
    for device in 0..3 {
        rig.bus.fail_open(CODEC_CARD, device, Direction::Capture);
        rig.bus.fail_open(2, device, Direction::Capture);
    }
    rig
}

fn stereo_44100() -> StreamConfig {
    StreamConfig {
        rate: 44_100,
        channels: 2,
        ..StreamConfig::default()
    }
}

#[test]
fn test_downlink_accumulates_to_period_boundary() {
    let rig = rig_with_dead_mic();
    rig.device.set_mode(AudioMode::InCall);
    assert!(!rig.device.voice_call_active());

    let stream = rig
        .device
        .open_output_stream(OutputDevices::TELEPHONY, stereo_44100())
        .unwrap();

    // 400 frames of 44.1 kHz stereo resample to ~73 mono frames at
    // 8 kHz: not enough for a period, nothing reaches the modem.
    let buf = vec![0x11u8; 400 * 4];
    stream.write(&buf);
    let sink = rig.bus.playback_sink(MODEM_CARD, 0).unwrap();
    assert!(sink.periods.is_empty());

    // Subsequent writes push the accumulator over 320 frames: exactly
    // one 640-byte period goes out, the residual stays buffered.
    stream.write(&buf);
    stream.write(&buf);
    stream.write(&buf);
    stream.write(&buf);
    let sink = rig.bus.playback_sink(MODEM_CARD, 0).unwrap();
    assert_eq!(sink.periods.len(), 1);
    assert_eq!(sink.periods[0].len(), 640);
}

#[test]
fn test_exclusive_modem_sink_contention() {
    let rig = rig();
    rig.device.set_mode(AudioMode::InCall);
    thread::sleep(Duration::from_millis(50));

    let devices = OutputDevices::TELEPHONY | OutputDevices::SPEAKER;
    let first = rig
        .device
        .open_output_stream(devices, StreamConfig::default())
        .unwrap();
    let second = rig
        .device
        .open_output_stream(devices, StreamConfig::default())
        .unwrap();

    let buf = vec![0u8; 1024];
    first.write(&buf);
    second.write(&buf);

    // Only the first stream owns the modem; the second still reaches
    // the shared speaker.
    assert_eq!(rig.device.exclusive_owner(OutputRole::Modem), Some(first.id()));
    assert!(first.has_sink(OutputRole::Modem));
    assert!(!second.has_sink(OutputRole::Modem));
    assert!(second.has_sink(OutputRole::Speaker));

    let speaker = rig.bus.playback_sink(CODEC_CARD, 0).unwrap();
    assert!(speaker.periods.len() >= 2);

    // Closing the owner clears ownership without transferring it.
    rig.device.close_output_stream(&first);
    assert_eq!(rig.device.exclusive_owner(OutputRole::Modem), None);
    assert!(!second.has_sink(OutputRole::Modem));

    // The next start that finds ownership free claims the sink.
    second.standby();
    second.write(&buf);
    assert_eq!(
        rig.device.exclusive_owner(OutputRole::Modem),
        Some(second.id())
    );
    assert!(second.has_sink(OutputRole::Modem));
}

#[test]
fn test_write_always_consumes_bytes() {
    let rig = rig();
    let stream = rig
        .device
        .open_output_stream(OutputDevices::SPEAKER, StreamConfig::default())
        .unwrap();

    let buf = vec![0u8; 512];
    assert_eq!(stream.write(&buf), 512);

    // Even with the speaker erroring persistently, the contract holds.
    rig.bus
        .queue_write_error(CODEC_CARD, 0, PcmIoError::Io(5));
    rig.bus
        .queue_write_error(CODEC_CARD, 0, PcmIoError::Io(5));
    assert_eq!(stream.write(&buf), 512);
}

#[test]
fn test_mute_zeroes_fanout() {
    let rig = rig();
    let stream = rig
        .device
        .open_output_stream(OutputDevices::SPEAKER, StreamConfig::default())
        .unwrap();

    stream.set_mute(true);
    stream.write(&vec![0x7fu8; 512]);

    let speaker = rig.bus.playback_sink(CODEC_CARD, 0).unwrap();
    assert!(speaker.periods[0].iter().all(|&b| b == 0));
}

#[test]
fn test_standby_cycle_reopens_pcm() {
    let rig = rig();
    let stream = rig
        .device
        .open_output_stream(OutputDevices::SPEAKER, StreamConfig::default())
        .unwrap();

    assert!(stream.is_standby());
    stream.write(&vec![0u8; 512]);
    assert!(!stream.is_standby());
    assert!(stream.has_sink(OutputRole::Speaker));

    stream.standby();
    assert!(stream.is_standby());
    assert!(!stream.has_sink(OutputRole::Speaker));

    stream.write(&vec![0u8; 512]);
    assert!(!stream.is_standby());
    assert!(stream.has_sink(OutputRole::Speaker));

    let speaker = rig.bus.playback_sink(CODEC_CARD, 0).unwrap();
    assert_eq!(speaker.periods.len(), 2);
}

#[test]
fn test_frames_written_accounting() {
    let rig = rig();
    let stream = rig
        .device
        .open_output_stream(OutputDevices::SPEAKER, StreamConfig::default())
        .unwrap();

    // 512 bytes of stereo S16 is 128 frames.
    stream.write(&vec![0u8; 512]);
    assert_eq!(stream.frames_written(), 128);
    stream.write(&vec![0u8; 512]);
    assert_eq!(stream.frames_written(), 256);
}

#[test]
fn test_busy_modem_aborts_and_releases_ownership() {
    let rig = rig();
    rig.device.set_mode(AudioMode::InCall);
    thread::sleep(Duration::from_millis(50));

    let stream = rig
        .device
        .open_output_stream(OutputDevices::TELEPHONY, StreamConfig::default())
        .unwrap();

    let buf = vec![0u8; 1024];
    stream.write(&buf);
    assert!(stream.has_sink(OutputRole::Modem));

    // Another client grabs the modem device: the write sees EBUSY,
    // closes the endpoint and releases the sink.
    rig.bus.queue_write_error(MODEM_CARD, 0, PcmIoError::Busy);
    stream.write(&buf);
    assert!(!stream.has_sink(OutputRole::Modem));
    assert_eq!(rig.device.exclusive_owner(OutputRole::Modem), None);
}

#[test]
fn test_input_stream_requires_stereo() {
    let rig = rig();
    let mono = StreamConfig {
        channels: 1,
        ..StreamConfig::default()
    };
    let result =
        rig.device
            .open_input_stream(InputDevices::BUILTIN_MIC, mono, Default::default());
    assert!(matches!(result, Err(HalError::Misconfiguration(_))));
}

#[test]
fn test_input_stream_reads_from_codec() {
    let rig = rig();
    let stream = rig
        .device
        .open_input_stream(
            InputDevices::BUILTIN_MIC,
            StreamConfig {
                rate: 44_100,
                channels: 2,
                ..StreamConfig::default()
            },
            Default::default(),
        )
        .unwrap();

    let mut buf = vec![0u8; 1024];
    assert_eq!(stream.read(&mut buf), 1024);
    assert!(!stream.is_standby());
    assert!(rig.bus.capture_reads(CODEC_CARD, 0) > 0);
    // The synthetic mic tone comes through non-silent.
    assert!(buf.iter().any(|&b| b != 0));

    rig.device.close_input_stream(&stream);
    assert!(stream.is_standby());
}

#[test]
fn test_input_buffer_size_alignment() {
    let rig = rig();
    let config = StreamConfig {
        rate: 48_000,
        channels: 2,
        ..StreamConfig::default()
    };
    let size = rig.device.input_buffer_size(&config);
    // Whole 16-frame multiples of stereo S16 frames.
    assert_eq!(size % (16 * 4), 0);
    assert!(size > 0);
}
