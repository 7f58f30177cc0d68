//! # Axon HAL
//!
//! An audio hardware abstraction layer for boards that pair
//! conventional outputs (speaker codec, HDMI, S/PDIF) with a cellular
//! modem exposing a strict PCM voice interface: mono 16-bit
//! little-endian at 8 kHz, transfers aligned to exact 640-byte
//! periods.
//!
//! Playback streams fan out to every sound card their routing selects.
//! During a voice call the HAL additionally runs a bidirectional voice
//! path: a capture worker pumps the microphone through a
//! downmix/resample kernel into a bounded ring, and the uplink writer
//! drains that ring into period-aligned modem writes on the playback
//! thread, while application audio directed at the modem is
//! accumulated and emitted on the same strict period cadence.
//!
//! Hardware access is injected through the [`axon_alsa`] backend
//! traits; with the `alsa-backend` feature the HAL drives real sound
//! cards through alsa-lib.

pub mod device;
pub mod devices;
pub mod error;
pub mod modem;
pub mod params;
pub mod routing;
pub mod stream_in;
pub mod stream_out;
pub mod usecase;

mod capture;
mod dump;
mod uplink;
mod voice;

pub use device::{AudioMode, Device, DeviceConfig, MicrophoneInfo, StreamConfig};
pub use devices::{InputDevices, OutputDevices};
pub use error::{HalError, Result};
pub use stream_in::{InputSource, InputStream};
pub use stream_out::OutputStream;
pub use usecase::{Usecase, UsecaseId, UsecaseKind};
